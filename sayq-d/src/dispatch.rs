//! Dispatch loop
//!
//! A single dedicated worker thread that sleeps until there is activity (a new
//! job, an interruption, an explicit wake), then:
//!
//! 1. speaks all queued warnings
//! 2. speaks queued messages, checking for warnings before each one
//! 3. reads the current job sentence by sentence. Warnings interrupt between
//!    sentences; messages wait for the next paragraph boundary
//!
//! No lock is held while a backend speaks or while events are published.

use sayq_common::events::{EventBus, SayqEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::backends::BackendRegistry;
use crate::error::Result;
use crate::interrupts::{InterruptItem, InterruptQueues};
use crate::jobs::{JobStore, Sentence};

/// Wake-up signal shared by everything that produces work for the dispatcher
#[derive(Debug, Default)]
pub struct Activity {
    pending: Mutex<bool>,
    condvar: Condvar,
    stop_flag: AtomicBool,
    /// Worker is between wake-up and its next wait
    busy: AtomicBool,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wake(&self) {
        *self.lock() = true;
        self.condvar.notify_one();
    }

    /// Has a wake-up been signalled and not yet consumed
    pub fn is_pending(&self) -> bool {
        *self.lock()
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _guard = self.lock();
        self.condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Block until woken. Returns false if the worker should exit.
    pub fn wait(&self) -> bool {
        let mut pending = self.lock();
        self.busy.store(false, Ordering::Relaxed);
        while !*pending && !self.is_stopped() {
            pending = self
                .condvar
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if self.is_stopped() {
            return false;
        }
        *pending = false;
        self.busy.store(true, Ordering::Relaxed);
        true
    }

    /// No wake-up pending and the worker is waiting
    pub fn is_idle(&self) -> bool {
        let pending = self.lock();
        !*pending && !self.busy.load(Ordering::Relaxed)
    }
}

/// Text spoken around interruptions; `None` when disabled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcements {
    /// Before messages interrupting job text
    pub text_pre_msg: Option<String>,
    pub text_post_msg: Option<String>,
    /// Before warnings interrupting a paragraph
    pub par_pre_msg: Option<String>,
    pub par_post_msg: Option<String>,
}

/// Everything the worker needs; moved onto the worker thread
pub struct Dispatcher {
    pub jobs: Arc<JobStore>,
    pub interrupts: Arc<InterruptQueues>,
    pub backends: Arc<BackendRegistry>,
    pub events: EventBus,
    pub announcements: Announcements,
    pub activity: Arc<Activity>,
}

impl Dispatcher {
    fn emit(&self, event: SayqEvent) {
        self.events.emit_lossy(event);
    }

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    /// Worker main loop
    fn run(self) {
        debug!("Dispatch worker started");
        while self.activity.wait() {
            self.say_warnings();
            self.say_messages();
            self.say_text();
        }
        debug!("Dispatch worker received shutdown signal");
    }

    /// Hand text to the backend for `talker`, waiting for asynchronous speech
    fn route(&self, talker: &str, text: &str) {
        let talker = if talker.is_empty() {
            self.backends.default_talker()
        } else {
            talker
        };
        let Some(backend) = self.backends.resolve(talker) else {
            warn!(talker = %talker, "No backend for talker or default talker, dropping text");
            return;
        };
        if let Err(e) = backend.say_text(text) {
            warn!(talker = %talker, backend = %backend.name(), "Backend failed: {}", e);
            return;
        }
        if backend.supports_async() {
            backend.wait_finished();
        }
    }

    fn say_item(&self, item: &InterruptItem) {
        debug!(owner = %item.owner_id, "Speaking interruption");
        self.route(&item.talker, &item.text);
    }

    fn announce(&self, text: &Option<String>) {
        if let Some(text) = text {
            self.route("", text);
        }
    }

    fn say_warnings(&self) {
        while let Some(warning) = self.interrupts.next_warning() {
            self.say_item(&warning);
        }
    }

    fn say_messages(&self) {
        loop {
            self.say_warnings();
            match self.interrupts.next_message() {
                Some(message) => self.say_item(&message),
                None => break,
            }
        }
    }

    fn has_interruptions(&self) -> bool {
        self.interrupts.has_warnings() || self.interrupts.has_messages()
    }

    fn say_sentence(&self, sentence: &Sentence) {
        self.emit(SayqEvent::SentenceStarted {
            job_id: sentence.job_id,
            seq: sentence.seq,
            text: sentence.text.clone(),
            talker: sentence.talker.clone(),
            timestamp: Self::now(),
        });
        self.route(&sentence.talker, &sentence.text);
        self.emit(SayqEvent::SentenceFinished {
            job_id: sentence.job_id,
            seq: sentence.seq,
            timestamp: Self::now(),
        });
    }

    /// Speak pending messages at a paragraph boundary
    fn interrupt_for_messages(&self) {
        if !self.interrupts.has_messages() {
            return;
        }
        self.emit(SayqEvent::ReadingInterrupted { timestamp: Self::now() });
        self.announce(&self.announcements.text_pre_msg);
        self.say_messages();
        self.announce(&self.announcements.text_post_msg);
        self.emit(SayqEvent::ReadingResumed { timestamp: Self::now() });
    }

    fn say_text(&self) {
        if self.jobs.start_next() == 0 {
            return;
        }

        self.emit(SayqEvent::ReadingStarted { timestamp: Self::now() });
        self.emit(SayqEvent::ParagraphStarted { timestamp: Self::now() });

        while !self.activity.is_stopped() && (self.jobs.is_speaking() || self.has_interruptions()) {
            if self.interrupts.has_warnings() {
                self.emit(SayqEvent::ReadingInterrupted { timestamp: Self::now() });
                self.announce(&self.announcements.par_pre_msg);
                self.say_warnings();
                self.announce(&self.announcements.par_post_msg);
                self.emit(SayqEvent::ReadingResumed { timestamp: Self::now() });
                continue;
            }

            match self.jobs.next_sentence() {
                Some(sentence) if !sentence.text.is_empty() => self.say_sentence(&sentence),
                Some(_) => {
                    self.emit(SayqEvent::ParagraphFinished { timestamp: Self::now() });
                    self.interrupt_for_messages();
                    self.emit(SayqEvent::ParagraphStarted { timestamp: Self::now() });
                }
                None => self.interrupt_for_messages(),
            }
        }

        self.emit(SayqEvent::ParagraphFinished { timestamp: Self::now() });
        self.emit(SayqEvent::ReadingStopped { timestamp: Self::now() });
    }
}

/// Handle to the running dispatch worker
pub struct DispatchLoop {
    activity: Arc<Activity>,
    backends: Arc<BackendRegistry>,
    thread: Option<JoinHandle<()>>,
}

impl DispatchLoop {
    /// Spawn the worker thread
    pub fn spawn(dispatcher: Dispatcher) -> Result<Self> {
        let activity = Arc::clone(&dispatcher.activity);
        let backends = Arc::clone(&dispatcher.backends);
        let handle = thread::Builder::new()
            .name("sayq-dispatch".to_string())
            .spawn(move || dispatcher.run())?;

        info!("Dispatch loop started");
        Ok(Self {
            activity,
            backends,
            thread: Some(handle),
        })
    }

    /// Signal stop, abort current speech and join the worker
    pub fn shutdown(mut self) {
        info!("Shutting down dispatch loop");
        self.activity.request_stop();
        self.backends.stop_all();

        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(()) => debug!("Dispatch worker joined successfully"),
                Err(e) => error!("Dispatch worker join failed: {:?}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wait_consumes_wake() {
        let activity = Activity::new();
        activity.wake();
        assert!(activity.is_pending());
        assert!(activity.wait());
        assert!(!activity.is_pending());
    }

    #[test]
    fn test_stop_releases_waiter() {
        let activity = Arc::new(Activity::new());
        let waiter = {
            let activity = Arc::clone(&activity);
            thread::spawn(move || activity.wait())
        };
        thread::sleep(Duration::from_millis(20));
        activity.request_stop();
        assert!(!waiter.join().unwrap());
    }
}
