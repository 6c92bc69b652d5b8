//! SSML sentence splitting
//!
//! Walks a `<speak>` document with quick-xml, tracking the style context in
//! effect (language, voice, prosody, emphasis, paragraph/sentence language) on
//! one stack per dimension. Each sentence is emitted as a complete `<speak>`
//! fragment that reopens every enclosing context, so any unit can be spoken on
//! its own.
//!
//! Unknown elements are dropped but their text is kept.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::error::{Error, Result};

const SPEAK_KEYS: &[&str] = &["xml:lang"];
const VOICE_KEYS: &[&str] = &["xml:lang", "gender", "age", "name", "variant"];
const PROSODY_KEYS: &[&str] = &["pitch", "contour", "range", "rate", "duration", "volume"];
const EMPHASIS_KEYS: &[&str] = &["level"];
const BREAK_KEYS: &[&str] = &["strength", "time"];

/// Inherited attributes for one style dimension
struct ContextStack {
    tag: &'static str,
    keys: &'static [&'static str],
    frames: Vec<Vec<Option<String>>>,
}

impl ContextStack {
    fn new(tag: &'static str, keys: &'static [&'static str]) -> Self {
        Self {
            tag,
            keys,
            frames: Vec::new(),
        }
    }

    /// Push a frame: parent attributes overridden by those present on the element
    fn push(&mut self, attrs: &[(String, String)]) {
        let mut frame = self
            .frames
            .last()
            .cloned()
            .unwrap_or_else(|| vec![None; self.keys.len()]);
        for (key, value) in attrs {
            if let Some(i) = self.keys.iter().position(|k| k == key) {
                frame[i] = Some(value.clone());
            }
        }
        self.frames.push(frame);
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    fn render_attrs(&self, out: &mut String) {
        if let Some(frame) = self.frames.last() {
            for (key, value) in self.keys.iter().zip(frame) {
                if let Some(value) = value {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape(value.as_str()));
                    out.push('"');
                }
            }
        }
    }

    fn open(&self, out: &mut String) {
        out.push('<');
        out.push_str(self.tag);
        self.render_attrs(out);
        out.push('>');
    }

    fn close(&self, out: &mut String) {
        out.push_str("</");
        out.push_str(self.tag);
        out.push('>');
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Speak,
    Voice,
    Prosody,
    Emphasis,
    ParagraphOrSentence,
    Break,
    Other,
}

impl Element {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"speak" => Element::Speak,
            b"voice" => Element::Voice,
            b"prosody" => Element::Prosody,
            b"emphasis" => Element::Emphasis,
            b"p" | b"s" | b"paragraph" | b"sentence" => Element::ParagraphOrSentence,
            b"break" => Element::Break,
            _ => Element::Other,
        }
    }
}

struct SsmlSplitter<'a> {
    delimiter: &'a Regex,
    speak: ContextStack,
    voice: ContextStack,
    prosody: ContextStack,
    emphasis: ContextStack,
    sentence: ContextStack,
    open: Vec<Element>,
    /// Escaped content of the sentence being collected
    buffer: String,
    units: Vec<String>,
}

impl<'a> SsmlSplitter<'a> {
    fn new(delimiter: &'a Regex) -> Self {
        Self {
            delimiter,
            speak: ContextStack::new("speak", SPEAK_KEYS),
            voice: ContextStack::new("voice", VOICE_KEYS),
            prosody: ContextStack::new("prosody", PROSODY_KEYS),
            emphasis: ContextStack::new("emphasis", EMPHASIS_KEYS),
            sentence: ContextStack::new("s", SPEAK_KEYS),
            open: Vec::new(),
            buffer: String::new(),
            units: Vec::new(),
        }
    }

    fn start(&mut self, element: Element, attrs: &[(String, String)]) {
        match element {
            Element::Speak => {
                self.flush();
                self.speak.push(attrs);
            }
            Element::Voice => {
                self.flush();
                self.voice.push(attrs);
            }
            Element::Prosody => {
                self.flush();
                self.prosody.push(attrs);
            }
            Element::Emphasis => {
                self.flush();
                self.emphasis.push(attrs);
            }
            Element::ParagraphOrSentence => {
                self.flush();
                self.sentence.push(attrs);
            }
            Element::Break => self.push_break(attrs),
            Element::Other => {}
        }
        self.open.push(element);
    }

    fn end(&mut self) {
        let Some(element) = self.open.pop() else {
            return;
        };
        if matches!(element, Element::Break | Element::Other) {
            return;
        }
        // Content collected so far belongs to the context being closed
        self.flush();
        match element {
            Element::Speak => self.speak.pop(),
            Element::Voice => self.voice.pop(),
            Element::Prosody => self.prosody.pop(),
            Element::Emphasis => self.emphasis.pop(),
            Element::ParagraphOrSentence => self.sentence.pop(),
            Element::Break | Element::Other => {}
        }
    }

    fn push_break(&mut self, attrs: &[(String, String)]) {
        let mut stack = ContextStack::new("break", BREAK_KEYS);
        stack.push(attrs);
        self.buffer.push_str("<break");
        stack.render_attrs(&mut self.buffer);
        self.buffer.push_str("/>");
    }

    /// Add character data, cutting a unit at every delimiter match
    fn text(&mut self, text: &str) {
        let marked = self.delimiter.replace_all(text, "${1}\u{0}");
        let mut pieces = marked.split('\u{0}').peekable();
        while let Some(piece) = pieces.next() {
            self.buffer.push_str(&escape(piece));
            if pieces.peek().is_some() {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        if !self.buffer.trim().is_empty() {
            let unit = self.make_sentence();
            self.units.push(unit);
        }
        self.buffer.clear();
    }

    fn make_sentence(&self) -> String {
        let mut out = String::new();
        self.speak.open(&mut out);
        if self.voice.is_active() {
            self.voice.open(&mut out);
        }
        if self.prosody.is_active() {
            self.prosody.open(&mut out);
        }
        self.sentence.open(&mut out);
        if self.emphasis.is_active() {
            self.emphasis.open(&mut out);
        }

        out.push_str(self.buffer.trim());

        if self.emphasis.is_active() {
            self.emphasis.close(&mut out);
        }
        self.sentence.close(&mut out);
        if self.prosody.is_active() {
            self.prosody.close(&mut out);
        }
        if self.voice.is_active() {
            self.voice.close(&mut out);
        }
        self.speak.close(&mut out);
        out
    }
}

fn attributes(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Markup(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| Error::Markup(err.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

/// Split an SSML document into sentence fragments.
///
/// Returns `Ok(None)` if the text is not a single `<speak>` document.
pub(super) fn split_ssml(text: &str, delimiter: &Regex) -> Result<Option<Vec<String>>> {
    if !text.trim_start().starts_with('<') {
        return Ok(None);
    }

    let mut reader = Reader::from_str(text);
    let mut splitter = SsmlSplitter::new(delimiter);
    let mut seen_root = false;
    let mut root_closed = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Markup(format!("at {}: {}", reader.buffer_position(), e)))?;

        match event {
            Event::Start(e) => {
                let element = Element::from_name(e.local_name().as_ref());
                if root_closed || (!seen_root && element != Element::Speak) {
                    return Ok(None);
                }
                seen_root = true;
                let attrs = attributes(&e)?;
                splitter.start(element, &attrs);
            }
            Event::Empty(e) => {
                let element = Element::from_name(e.local_name().as_ref());
                if !seen_root || root_closed {
                    return Ok(None);
                }
                if element == Element::Break {
                    let attrs = attributes(&e)?;
                    splitter.push_break(&attrs);
                }
            }
            Event::End(_) => {
                splitter.end();
                if splitter.open.is_empty() {
                    root_closed = true;
                }
            }
            Event::Text(t) => {
                let content = t.unescape().map_err(|e| Error::Markup(e.to_string()))?;
                if !seen_root || root_closed {
                    if content.trim().is_empty() {
                        continue;
                    }
                    return Ok(None);
                }
                splitter.text(&content);
            }
            Event::CData(c) => {
                if !seen_root || root_closed {
                    return Ok(None);
                }
                let content = String::from_utf8_lossy(&c.into_inner()).into_owned();
                splitter.text(&content);
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctypes carry no speech
            _ => {}
        }
    }

    if !seen_root {
        return Ok(None);
    }
    if !root_closed {
        return Err(Error::Markup("unterminated <speak> element".to_string()));
    }
    Ok(Some(splitter.units))
}
