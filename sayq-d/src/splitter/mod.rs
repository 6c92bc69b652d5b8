//! Sentence boundary detection
//!
//! Classifies text as SSML, source code, or plain text and splits it into
//! ordered sentence units:
//! - **SSML**: one self-contained `<speak>` fragment per sentence, carrying the
//!   full voice/prosody/emphasis context in effect (see [`ssml`])
//! - **Code**: one unit per physical line, verbatim
//! - **Plain**: boundaries inserted by the sentence delimiter pattern; an empty
//!   unit marks a paragraph break
//!
//! Units are joined with [`UNIT_SEPARATOR`] in the text form. Code and markup
//! units may themselves contain tabs, so the filter chain carries the unit list
//! alongside the text and jobs are built from the list when there is one.

mod ssml;

use regex::Regex;
use tracing::warn;

use crate::error::Result;

/// Separator between sentence units in filtered text
pub const UNIT_SEPARATOR: char = '\t';

/// Default sentence delimiter: sentence-ending punctuation followed by whitespace.
///
/// Capture group 1 is kept; the whitespace is replaced by a boundary.
pub const DEFAULT_SENTENCE_DELIMITER: &str = r"([\.\?\!\:\;])\s";

/// Substrings that mark text as source code
const CODE_MARKERS: [&str; 3] = ["/*", "if (", "#include"];

/// Content type detected for a text blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Markup,
    Code,
    Plain,
}

/// Result of splitting a text blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub kind: TextKind,
    pub sentences: Vec<String>,
    /// False if joining the units reproduces the input exactly
    pub modified: bool,
}

impl Split {
    /// Units joined with [`UNIT_SEPARATOR`]
    pub fn joined(&self) -> String {
        join_units(&self.sentences)
    }
}

/// Join sentence units with the unit separator
pub fn join_units(units: &[String]) -> String {
    let mut out = String::new();
    for (i, unit) in units.iter().enumerate() {
        if i > 0 {
            out.push(UNIT_SEPARATOR);
        }
        out.push_str(unit);
    }
    out
}

/// Split filtered text back into sentence units.
///
/// Blank input has no units. Empty units between separators are kept.
pub fn split_units(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(UNIT_SEPARATOR).map(str::to_string).collect()
}

/// Sentence splitter with a configured default delimiter
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    delimiter: Regex,
}

impl SentenceSplitter {
    /// Create a splitter whose default delimiter is `pattern`
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            delimiter: Regex::new(pattern)?,
        })
    }

    /// The configured default delimiter
    pub fn delimiter(&self) -> &Regex {
        &self.delimiter
    }

    /// Split using the configured delimiter
    pub fn split(&self, text: &str) -> Split {
        classify_and_split(text, &self.delimiter)
    }

    /// Split using a caller-supplied delimiter (per-application override)
    pub fn split_with(&self, text: &str, delimiter: &Regex) -> Split {
        classify_and_split(text, delimiter)
    }
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
        }
    }
}

/// The built-in sentence delimiter, compiled
pub fn default_delimiter() -> Regex {
    Regex::new(DEFAULT_SENTENCE_DELIMITER).expect("built-in delimiter is a valid regex")
}

/// Classify `text` and split it into sentence units
pub fn classify_and_split(text: &str, delimiter: &Regex) -> Split {
    let (kind, sentences) = match ssml::split_ssml(text, delimiter) {
        Ok(Some(units)) => (TextKind::Markup, units),
        Ok(None) => split_non_markup(text, delimiter),
        Err(e) => {
            warn!("Malformed SSML, treating as plain text: {}", e);
            split_non_markup(text, delimiter)
        }
    };

    let modified = join_units(&sentences) != text;
    Split {
        kind,
        sentences,
        modified,
    }
}

/// Content type of `text` without producing units
pub fn classify(text: &str) -> TextKind {
    match ssml::split_ssml(text, &default_delimiter()) {
        Ok(Some(_)) => TextKind::Markup,
        _ if is_code(text) => TextKind::Code,
        _ => TextKind::Plain,
    }
}

fn split_non_markup(text: &str, delimiter: &Regex) -> (TextKind, Vec<String>) {
    if is_code(text) {
        (TextKind::Code, split_code(text))
    } else {
        (TextKind::Plain, split_plain(text, delimiter))
    }
}

fn is_code(text: &str) -> bool {
    CODE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Each physical line is one unit, verbatim
fn split_code(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

fn split_plain(text: &str, delimiter: &Regex) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let marked = delimiter.replace_all(text, "${1}\n");
    let marked = marked.replace("\r\n", "\n").replace('\r', "\n");

    let mut units: Vec<String> = Vec::new();
    let mut previous_blank = false;
    for line in marked.split('\n') {
        let line = line.trim().replace(UNIT_SEPARATOR, " ");
        if line.is_empty() {
            // Cap paragraph gaps at one blank unit
            if previous_blank {
                continue;
            }
            previous_blank = true;
        } else {
            previous_blank = false;
        }
        units.push(line);
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(text: &str) -> Vec<String> {
        SentenceSplitter::default().split(text).sentences
    }

    #[test]
    fn test_plain_text_sentences() {
        let split = SentenceSplitter::default().split("Hello world. How are you? Fine.");
        assert_eq!(split.kind, TextKind::Plain);
        assert_eq!(split.sentences, vec!["Hello world.", "How are you?", "Fine."]);
        assert!(split.modified);
    }

    #[test]
    fn test_single_sentence_not_modified() {
        let split = SentenceSplitter::default().split("Just one sentence");
        assert_eq!(split.sentences, vec!["Just one sentence"]);
        assert!(!split.modified);
    }

    #[test]
    fn test_paragraph_marker_preserved() {
        assert_eq!(
            units("First para.\n\nSecond para."),
            vec!["First para.", "", "Second para."]
        );
    }

    #[test]
    fn test_excess_blank_lines_collapsed() {
        assert_eq!(
            units("One.\n\n\n\n\nTwo.\n   \n\t\nThree"),
            vec!["One.", "", "Two.", "", "Three"]
        );
    }

    #[test]
    fn test_whitespace_stripped_per_line() {
        assert_eq!(
            units("   Hello there!   General Kenobi.  "),
            vec!["Hello there!", "General Kenobi."]
        );
    }

    #[test]
    fn test_blank_input_has_no_units() {
        assert!(units("").is_empty());
        assert!(units("  \n\n ").is_empty());
    }

    #[test]
    fn test_custom_delimiter() {
        let comma = Regex::new(r"(,)\s").unwrap();
        let split = SentenceSplitter::default().split_with("red, green, blue", &comma);
        assert_eq!(split.sentences, vec!["red,", "green,", "blue"]);
    }

    #[test]
    fn test_code_one_unit_per_line() {
        let text = "#include <stdio.h>\nint main() {}";
        let split = SentenceSplitter::default().split(text);
        assert_eq!(split.kind, TextKind::Code);
        assert_eq!(split.sentences, vec!["#include <stdio.h>", "int main() {}"]);
    }

    #[test]
    fn test_code_lines_not_split_on_punctuation() {
        let text = "/* note. really */\nif (x) { y(); z(); }";
        assert_eq!(classify(text), TextKind::Code);
        assert_eq!(units(text), vec!["/* note. really */", "if (x) { y(); z(); }"]);
    }

    #[test]
    fn test_plain_round_trip_normalizes_whitespace() {
        let text = "Alpha beta. Gamma delta!\n\nEpsilon.";
        let split = SentenceSplitter::default().split(text);
        let rejoined = split.sentences.join("\n");
        assert_eq!(rejoined, "Alpha beta.\nGamma delta!\n\nEpsilon.");
    }

    #[test]
    fn test_split_units_keeps_empty_units() {
        assert_eq!(split_units("a\t\tb"), vec!["a", "", "b"]);
        assert!(split_units("").is_empty());
        assert_eq!(join_units(&split_units("a\t\tb")), "a\t\tb");
    }

    #[test]
    fn test_invalid_delimiter_rejected() {
        assert!(SentenceSplitter::new("([unclosed").is_err());
    }
}
