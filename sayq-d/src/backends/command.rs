//! External program backend
//!
//! Runs the configured program once per sentence with the text on stdin.
//! Speech is asynchronous: a watcher thread polls the child and signals when
//! it exits. `stop` kills the child.

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BackendState, SpeechBackend};
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Running {
    state: BackendState,
    child: Option<Child>,
}

struct Shared {
    running: Mutex<Running>,
    finished: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_finished(&self, running: &mut Running) {
        running.child = None;
        running.state = BackendState::Finished;
        self.finished.notify_all();
    }

    /// Poll the child until it exits
    fn watch(&self) {
        loop {
            {
                let mut running = self.lock();
                let exited = match running.child.as_mut() {
                    None => true,
                    Some(child) => match child.try_wait() {
                        Ok(Some(status)) => {
                            debug!(%status, "Speech command exited");
                            true
                        }
                        Ok(None) => false,
                        Err(e) => {
                            warn!("Lost track of speech command: {}", e);
                            true
                        }
                    },
                };
                if exited {
                    self.mark_finished(&mut running);
                    return;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

pub struct CommandBackend {
    name: String,
    program: String,
    args: Vec<String>,
    shared: Arc<Shared>,
}

impl CommandBackend {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            shared: Arc::new(Shared {
                running: Mutex::new(Running {
                    state: BackendState::Idle,
                    child: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }
}

impl SpeechBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn say_text(&self, text: &str) -> Result<()> {
        // One utterance at a time
        self.wait_finished();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Backend(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(text.as_bytes()) {
                debug!(program = %self.program, "Speech command closed stdin early: {}", e);
            }
        }

        {
            let mut running = self.shared.lock();
            running.child = Some(child);
            running.state = BackendState::Saying;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("sayq-command".to_string())
            .spawn(move || shared.watch());
        if let Err(e) = spawned {
            let mut running = self.shared.lock();
            if let Some(child) = running.child.as_mut() {
                let _ = child.kill();
                let _ = child.wait();
            }
            self.shared.mark_finished(&mut running);
            return Err(Error::Backend(format!("cannot watch speech command: {}", e)));
        }
        Ok(())
    }

    fn supports_async(&self) -> bool {
        true
    }

    fn state(&self) -> BackendState {
        self.shared.lock().state
    }

    fn wait_finished(&self) {
        let mut running = self.shared.lock();
        while running.state == BackendState::Saying {
            running = self
                .shared
                .finished
                .wait(running)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn stop(&self) {
        let mut running = self.shared.lock();
        if let Some(child) = running.child.as_mut() {
            debug!(program = %self.program, "Killing speech command");
            if let Err(e) = child.kill() {
                debug!("Speech command already gone: {}", e);
            }
        }
    }
}
