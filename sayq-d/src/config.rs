//! Service configuration
//!
//! A single TOML file read once at startup and handed to the components that
//! need it. Every key is optional; a missing file yields [`ServiceConfig::default`],
//! which has one sentence boundary filter and a stdout backend for the default
//! talker.
//!
//! ```toml
//! default_talker = "en"
//!
//! [logging]
//! level = "debug"
//!
//! [announcements]
//! par_pre_msg = "Warning."
//! par_pre_msg_enabled = true
//!
//! [[filters]]
//! name = "sbd"
//! kind = "sbd"
//!
//! [[talkers]]
//! talker = "en"
//! backend = "command"
//! program = "espeak-ng"
//! args = ["--stdin"]
//! ```

use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::dispatch::Announcements;
use crate::error::{Error, Result};

fn default_talker() -> String {
    "en".to_string()
}

fn default_event_capacity() -> usize {
    1000
}

fn default_enabled() -> bool {
    true
}

fn default_filters() -> Vec<FilterConfig> {
    vec![FilterConfig {
        name: "sbd".to_string(),
        enabled: true,
        kind: FilterKind::Sbd { delimiter: None },
    }]
}

fn default_talkers() -> Vec<TalkerConfig> {
    vec![TalkerConfig {
        talker: default_talker(),
        backend: BackendConfig::Stdout { prefix: None },
    }]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceConfig {
    /// Talker used when a job or interruption names none
    #[serde(default = "default_talker")]
    pub default_talker: String,

    /// Event bus buffer size
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub announcements: AnnouncementConfig,

    /// Filter stages in execution order
    #[serde(default = "default_filters")]
    pub filters: Vec<FilterConfig>,

    #[serde(default = "default_talkers")]
    pub talkers: Vec<TalkerConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins if set
    #[serde(default)]
    pub level: Option<String>,
}

/// Spoken framing for interruptions; each text needs its `_enabled` flag
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnnouncementConfig {
    pub text_pre_msg: String,
    pub text_pre_msg_enabled: bool,
    pub text_post_msg: String,
    pub text_post_msg_enabled: bool,
    pub par_pre_msg: String,
    pub par_pre_msg_enabled: bool,
    pub par_post_msg: String,
    pub par_post_msg_enabled: bool,
}

impl AnnouncementConfig {
    pub fn to_announcements(&self) -> Announcements {
        fn pick(text: &str, enabled: bool) -> Option<String> {
            (enabled && !text.is_empty()).then(|| text.to_string())
        }
        Announcements {
            text_pre_msg: pick(&self.text_pre_msg, self.text_pre_msg_enabled),
            text_post_msg: pick(&self.text_post_msg, self.text_post_msg_enabled),
            par_pre_msg: pick(&self.par_pre_msg, self.par_pre_msg_enabled),
            par_post_msg: pick(&self.par_post_msg, self.par_post_msg_enabled),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: FilterKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    /// Sentence boundary detection
    Sbd {
        /// Overrides the built-in sentence delimiter pattern
        #[serde(default)]
        delimiter: Option<String>,
    },
    StringReplacer {
        #[serde(default)]
        rules: Vec<ReplaceRuleConfig>,
        #[serde(default)]
        owners: Vec<String>,
    },
    TalkerChooser {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        owners: Vec<String>,
        talker: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplaceRuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TalkerConfig {
    pub talker: String,
    #[serde(flatten)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    Stdout {
        #[serde(default)]
        prefix: Option<String>,
    },
    Silent,
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_talker: default_talker(),
            event_capacity: default_event_capacity(),
            logging: LoggingConfig::default(),
            announcements: AnnouncementConfig::default(),
            filters: default_filters(),
            talkers: default_talkers(),
        }
    }
}

impl ServiceConfig {
    /// Load from `path`, or built-in defaults if no file was resolved
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = sayq_common::config::read_config_file(path)?;
                let config = Self::from_toml_str(&text)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_talker.is_empty() {
            return Err(Error::Config("default_talker must not be empty".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        if let Some(talker) = self.talkers.iter().find(|t| t.talker.is_empty()) {
            return Err(Error::Config(format!(
                "talker entry with backend {:?} has no talker name",
                talker.backend
            )));
        }
        if let Some(filter) = self.filters.iter().find(|f| f.name.is_empty()) {
            return Err(Error::Config(format!(
                "filter entry {:?} has no name",
                filter.kind
            )));
        }
        Ok(())
    }

    /// `tracing` directive for the configured log level
    pub fn log_directive(&self) -> String {
        let level = self.logging.level.as_deref().unwrap_or("info");
        format!("sayq_d={}", level)
    }
}
