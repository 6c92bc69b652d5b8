//! Event collection helpers

use sayq_common::events::SayqEvent;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

const POLL: Duration = Duration::from_millis(5);

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL);
    }
    condition()
}

/// Accumulates events from a bus subscription
pub struct EventLog {
    rx: broadcast::Receiver<SayqEvent>,
    events: Vec<SayqEvent>,
}

impl EventLog {
    pub fn new(rx: broadcast::Receiver<SayqEvent>) -> Self {
        Self {
            rx,
            events: Vec::new(),
        }
    }

    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.events.push(event),
                Err(TryRecvError::Lagged(n)) => panic!("event log lagged by {} events", n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Wait until an event matching `predicate` has been received
    pub fn wait_for(
        &mut self,
        timeout: Duration,
        predicate: impl Fn(&SayqEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain();
            if self.events.iter().any(&predicate) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL);
        }
    }

    /// Wait for `JobFinished` of `job_id`
    pub fn wait_finished(&mut self, job_id: u32, timeout: Duration) -> bool {
        self.wait_for(timeout, |e| {
            matches!(e, SayqEvent::JobFinished { job_id: id, .. } if *id == job_id)
        })
    }

    pub fn events(&mut self) -> &[SayqEvent] {
        self.drain();
        &self.events
    }

    /// Variant names received so far
    pub fn kinds(&mut self) -> Vec<&'static str> {
        self.drain();
        self.events.iter().map(SayqEvent::kind).collect()
    }

    /// Variant names of events about `job_id`
    pub fn job_kinds(&mut self, job_id: u32) -> Vec<&'static str> {
        self.drain();
        self.events
            .iter()
            .filter(|e| e.job_id() == Some(job_id))
            .map(SayqEvent::kind)
            .collect()
    }
}
