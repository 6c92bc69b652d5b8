//! Regex replacement stage
//!
//! Applies ordered `pattern -> replacement` rules. Optionally limited to a set
//! of owner ids.

use regex::Regex;

use super::{Conversion, FilterInput, FilterStage, StageOutput};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ReplaceRule {
    pub pattern: Regex,
    /// Replacement text; `$1`-style group references are expanded
    pub replacement: String,
}

impl ReplaceRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }
}

pub struct StringReplacerStage {
    name: String,
    rules: Vec<ReplaceRule>,
    /// Empty means every owner
    owners: Vec<String>,
}

impl StringReplacerStage {
    pub fn new(name: impl Into<String>, rules: Vec<ReplaceRule>, owners: Vec<String>) -> Self {
        Self {
            name: name.into(),
            rules,
            owners,
        }
    }

    fn applies_to(&self, owner_id: &str) -> bool {
        self.owners.is_empty() || self.owners.iter().any(|o| o == owner_id)
    }
}

impl FilterStage for StringReplacerStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn convert(&self, input: &FilterInput) -> Conversion {
        if !self.applies_to(&input.owner_id) {
            return None;
        }

        let mut text = input.text.clone();
        let mut matched = false;
        for rule in &self.rules {
            if rule.pattern.is_match(&text) {
                matched = true;
                text = rule
                    .pattern
                    .replace_all(&text, rule.replacement.as_str())
                    .into_owned();
            }
        }

        if !matched {
            return None;
        }
        let modified = text != input.text;
        Some(StageOutput {
            text,
            modified,
            talker: None,
            sentences: None,
        })
    }
}
