//! # sayq-d
//!
//! Text-to-speech job service: applications submit text jobs, the service
//! splits them into sentences through a filter chain, and a single dispatch
//! worker hands sentences one at a time to speech backends.
//!
//! **Components:**
//! - [`splitter`]: content-aware sentence boundary detection (SSML, code, plain)
//! - [`filters`]: ordered filter stages, sync or async
//! - [`jobs`]: the job store with its lifecycle and navigation
//! - [`interrupts`]: warning/message queues that preempt job text
//! - [`dispatch`]: the consumer loop
//! - [`backends`]: speech output per talker
//! - [`service`]: composition from [`config::ServiceConfig`]

pub mod backends;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filters;
pub mod interrupts;
pub mod jobs;
pub mod service;
pub mod splitter;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use jobs::{JobStore, Sentence};
pub use service::SpeechService;
