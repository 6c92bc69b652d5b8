//! Speech output backends
//!
//! A backend consumes one sentence at a time. Synchronous backends return
//! once the text is spoken; asynchronous ones return immediately, report
//! their progress through [`SpeechBackend::state`] and signal completion to
//! [`SpeechBackend::wait_finished`].
//!
//! Backends are registered per talker. Lookups for an unknown talker fall back
//! to the default talker's backend.

mod command;
mod silent;
mod stdout;

pub use command::CommandBackend;
pub use silent::SilentBackend;
pub use stdout::StdoutBackend;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

/// Progress of an asynchronous utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Idle,
    Saying,
    Finished,
}

pub trait SpeechBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Speak `text`. Asynchronous backends return as soon as speech started.
    fn say_text(&self, text: &str) -> Result<()>;

    fn supports_async(&self) -> bool {
        false
    }

    fn state(&self) -> BackendState {
        BackendState::Idle
    }

    /// Block until the current utterance has finished
    fn wait_finished(&self) {}

    /// Abort the current utterance
    fn stop(&self) {}
}

/// Talker to backend routing
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn SpeechBackend>>,
    default_talker: String,
}

impl BackendRegistry {
    pub fn new(default_talker: impl Into<String>) -> Self {
        Self {
            backends: HashMap::new(),
            default_talker: default_talker.into(),
        }
    }

    pub fn register(&mut self, talker: impl Into<String>, backend: Arc<dyn SpeechBackend>) {
        let talker = talker.into();
        debug!(talker = %talker, backend = %backend.name(), "Backend registered");
        self.backends.insert(talker, backend);
    }

    /// Backend for `talker`, else the default talker's backend
    pub fn resolve(&self, talker: &str) -> Option<Arc<dyn SpeechBackend>> {
        self.backends
            .get(talker)
            .or_else(|| self.backends.get(&self.default_talker))
            .cloned()
    }

    pub fn default_talker(&self) -> &str {
        &self.default_talker
    }

    pub fn talkers(&self) -> Vec<String> {
        let mut talkers: Vec<String> = self.backends.keys().cloned().collect();
        talkers.sort();
        talkers
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Stop every backend's current utterance
    pub fn stop_all(&self) {
        for backend in self.backends.values() {
            backend.stop();
        }
    }
}
