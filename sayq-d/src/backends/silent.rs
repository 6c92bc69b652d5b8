use tracing::trace;

use super::SpeechBackend;
use crate::error::Result;

/// Discards all text
pub struct SilentBackend {
    name: String,
}

impl SilentBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SpeechBackend for SilentBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn say_text(&self, text: &str) -> Result<()> {
        trace!(backend = %self.name, len = text.len(), "Discarding text");
        Ok(())
    }
}
