//! Backend that records what it is asked to speak

use sayq_d::backends::SpeechBackend;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// One utterance as seen by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spoken {
    pub backend: String,
    pub text: String,
}

/// Shared record of everything spoken, across backends
#[derive(Debug, Clone, Default)]
pub struct SpokenLog {
    entries: Arc<Mutex<Vec<Spoken>>>,
}

impl SpokenLog {
    pub fn push(&self, spoken: Spoken) {
        self.entries.lock().unwrap().push(spoken);
    }

    pub fn entries(&self) -> Vec<Spoken> {
        self.entries.lock().unwrap().clone()
    }

    /// Spoken texts in order
    pub fn texts(&self) -> Vec<String> {
        self.entries().into_iter().map(|s| s.text).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[derive(Default)]
struct GateState {
    reached: bool,
    released: bool,
}

/// Holds the backend inside `say_text` for one specific sentence
pub struct Gate {
    text: String,
    state: Mutex<GateState>,
    condvar: Condvar,
}

impl Gate {
    pub fn new(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            text: text.into(),
            state: Mutex::new(GateState::default()),
            condvar: Condvar::new(),
        })
    }

    /// Wait until the backend is blocked on the gated sentence
    pub fn wait_reached(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while !state.reached {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.condvar.wait_timeout(state, deadline - now).unwrap().0;
        }
        true
    }

    pub fn release(&self) {
        self.state.lock().unwrap().released = true;
        self.condvar.notify_all();
    }

    fn pass(&self, text: &str) {
        if text != self.text {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.reached = true;
        self.condvar.notify_all();
        while !state.released {
            state = self.condvar.wait(state).unwrap();
        }
    }
}

pub struct RecordingBackend {
    name: String,
    log: SpokenLog,
    gate: Option<Arc<Gate>>,
}

impl RecordingBackend {
    pub fn new(name: &str, log: SpokenLog, gate: Option<Arc<Gate>>) -> Self {
        Self {
            name: name.to_string(),
            log,
            gate,
        }
    }
}

impl SpeechBackend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn say_text(&self, text: &str) -> sayq_d::Result<()> {
        self.log.push(Spoken {
            backend: self.name.clone(),
            text: text.to_string(),
        });
        if let Some(gate) = &self.gate {
            gate.pass(text);
        }
        Ok(())
    }
}
