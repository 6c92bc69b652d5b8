//! Talker selection stage
//!
//! Overrides the job's talker when the text matches a pattern and/or the
//! owner is listed. Text passes through unchanged.

use regex::Regex;

use super::{Conversion, FilterInput, FilterStage, StageOutput};

pub struct TalkerChooserStage {
    name: String,
    pattern: Option<Regex>,
    /// Empty means every owner
    owners: Vec<String>,
    talker: String,
}

impl TalkerChooserStage {
    pub fn new(
        name: impl Into<String>,
        pattern: Option<Regex>,
        owners: Vec<String>,
        talker: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            owners,
            talker: talker.into(),
        }
    }

    fn matches(&self, input: &FilterInput) -> bool {
        let owner_ok = self.owners.is_empty() || self.owners.iter().any(|o| *o == input.owner_id);
        let text_ok = self
            .pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(&input.text));
        owner_ok && text_ok
    }
}

impl FilterStage for TalkerChooserStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn convert(&self, input: &FilterInput) -> Conversion {
        if !self.matches(input) {
            return None;
        }
        Some(StageOutput {
            text: input.text.clone(),
            modified: false,
            talker: Some(self.talker.clone()),
            sentences: None,
        })
    }
}
