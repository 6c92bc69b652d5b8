//! Error types for sayq-d
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Job-queue operations never return these: invalid job references are no-ops.

use thiserror::Error;

/// Main error type for sayq-d
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration content errors (unknown keys, bad values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A configured sentence delimiter or filter pattern is not a valid regex
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Malformed markup handed to the SSML splitter
    #[error("Markup error: {0}")]
    Markup(String),

    /// Output backend failed to speak a sentence
    #[error("Backend error: {0}")]
    Backend(String),

    /// No enabled sentence boundary detection stage was configured
    #[error("No sentence boundary detection filter configured")]
    NoBoundaryDetector,

    /// No backend could be created
    #[error("No speech backend could be loaded")]
    NoBackends,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from shared sayq-common code
    #[error(transparent)]
    Common(#[from] sayq_common::Error),
}

/// Convenience Result type using sayq-d Error
pub type Result<T> = std::result::Result<T, Error>;
