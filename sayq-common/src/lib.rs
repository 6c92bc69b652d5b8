//! # Sayq Common Library
//!
//! Shared code for the sayq speech service and its clients:
//! - Event types (SayqEvent enum) and the EventBus
//! - Job state and job snapshot types
//! - Configuration file resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod job;

pub use error::{Error, Result};
pub use job::{JobId, JobInfo, JobState};
