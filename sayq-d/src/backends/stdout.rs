use std::io::Write;

use super::SpeechBackend;
use crate::error::Result;

/// Prints each sentence on its own line, optionally prefixed
pub struct StdoutBackend {
    name: String,
    prefix: Option<String>,
}

impl StdoutBackend {
    pub fn new(name: impl Into<String>, prefix: Option<String>) -> Self {
        Self {
            name: name.into(),
            prefix,
        }
    }
}

impl SpeechBackend for StdoutBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn say_text(&self, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        match &self.prefix {
            Some(prefix) => writeln!(out, "{}{}", prefix, text)?,
            None => writeln!(out, "{}", text)?,
        }
        out.flush()?;
        Ok(())
    }
}
