//! Job store
//!
//! Thread-safe repository of text jobs. Each job owns an immutable sentence
//! sequence and an integer cursor (index of the next sentence to emit), so
//! navigation and removal never invalidate a position.
//!
//! # State machine
//!
//! ```text
//! Queued -> Speakable -> Speaking -> Paused -> Speakable
//!                                 -> Finished
//! ```
//!
//! At most one job is `Speaking`. While `reading` is set, the current job is
//! the `Speaking` one. Only the most recently finished job is retained.
//!
//! # Job resolution
//!
//! Operations take a job id plus the caller's owner id. Job id 0 resolves to
//! the owner's most recently submitted job, falling back to the most recent job
//! overall. Unknown jobs make every operation a no-op.
//!
//! Notifications are collected while the lock is held and published after it
//! is released, so handlers may call back into the store.

use regex::Regex;
use sayq_common::events::{EventBus, SayqEvent};
use sayq_common::{JobId, JobInfo, JobState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::dispatch::Activity;
use crate::error::{Error, Result};
use crate::filters::{ChainOutcome, ChainResult, FilterChain, FilterInput};
use crate::splitter::{split_units, SentenceSplitter};

/// A sentence handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub job_id: JobId,
    pub owner_id: String,
    pub talker: String,
    /// 1-based position within the job
    pub seq: usize,
}

#[derive(Debug)]
struct Job {
    id: JobId,
    owner_id: String,
    talker: String,
    sentences: Vec<String>,
    cursor: usize,
    state: JobState,
}

impl Job {
    fn info(&self) -> JobInfo {
        JobInfo {
            job_id: self.id,
            state: self.state,
            owner_id: self.owner_id.clone(),
            talker: self.talker.clone(),
            seq: self.cursor,
            sentence_count: self.sentences.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Notice {
    Submitted,
    Started,
    Finished,
    Stopped,
    Paused,
    Resumed,
    Removed,
}

fn notice(kind: Notice, job_id: JobId, owner_id: &str) -> SayqEvent {
    let owner_id = owner_id.to_string();
    let timestamp = chrono::Utc::now();
    match kind {
        Notice::Submitted => SayqEvent::JobSubmitted {
            job_id,
            owner_id,
            timestamp,
        },
        Notice::Started => SayqEvent::JobStarted {
            job_id,
            owner_id,
            timestamp,
        },
        Notice::Finished => SayqEvent::JobFinished {
            job_id,
            owner_id,
            timestamp,
        },
        Notice::Stopped => SayqEvent::JobStopped {
            job_id,
            owner_id,
            timestamp,
        },
        Notice::Paused => SayqEvent::JobPaused {
            job_id,
            owner_id,
            timestamp,
        },
        Notice::Resumed => SayqEvent::JobResumed {
            job_id,
            owner_id,
            timestamp,
        },
        Notice::Removed => SayqEvent::JobRemoved {
            job_id,
            owner_id,
            timestamp,
        },
    }
}

struct JobQueue {
    jobs: Vec<Job>,
    /// Job the dispatcher is iterating
    current: Option<JobId>,
    reading: bool,
    next_id: JobId,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            jobs: Vec::new(),
            current: None,
            reading: false,
            next_id: 1,
        }
    }

    fn index_of(&self, job_id: JobId) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == job_id)
    }

    fn resolve(&self, job_id: JobId, owner_id: &str) -> Option<usize> {
        if job_id != 0 {
            return self.index_of(job_id);
        }
        if !owner_id.is_empty() {
            if let Some(index) = self.jobs.iter().rposition(|j| j.owner_id == owner_id) {
                return Some(index);
            }
        }
        self.jobs.len().checked_sub(1)
    }

    fn is_current(&self, job_id: JobId) -> bool {
        self.current == Some(job_id)
    }

    /// Promote the first speakable job to speaking and make it current.
    ///
    /// Emits `JobStarted` for a job at its beginning, `JobResumed` otherwise.
    fn start_next(&mut self, events: &mut Vec<SayqEvent>) -> JobId {
        self.reading = false;
        match self.jobs.iter_mut().find(|j| j.state == JobState::Speakable) {
            Some(job) => {
                job.state = JobState::Speaking;
                let kind = if job.cursor == 0 {
                    Notice::Started
                } else {
                    Notice::Resumed
                };
                events.push(notice(kind, job.id, &job.owner_id));
                debug!(job_id = job.id, cursor = job.cursor, "Job speaking");
                self.current = Some(job.id);
                self.reading = true;
                job.id
            }
            None => {
                self.current = None;
                0
            }
        }
    }

    /// Drop finished jobs other than `keep`
    fn delete_expired(&mut self, keep: JobId, events: &mut Vec<SayqEvent>) {
        self.jobs.retain(|job| {
            let expired = job.state == JobState::Finished && job.id != keep;
            if expired {
                events.push(notice(Notice::Removed, job.id, &job.owner_id));
            }
            !expired
        });
    }

    /// Forcibly finish and remove a job found in an impossible state
    fn discard_broken(&mut self, index: usize, events: &mut Vec<SayqEvent>) {
        let job = self.jobs.remove(index);
        error!(
            job_id = job.id,
            state = %job.state,
            cursor = job.cursor,
            "Inconsistent job state, removing job"
        );
        if self.is_current(job.id) {
            self.current = None;
            self.reading = false;
        }
        events.push(notice(Notice::Finished, job.id, &job.owner_id));
        events.push(notice(Notice::Removed, job.id, &job.owner_id));
    }
}

/// Repository of all jobs plus the current-job pointer
pub struct JobStore {
    queue: Mutex<JobQueue>,
    delimiters: Mutex<HashMap<String, Regex>>,
    chain: FilterChain,
    /// Fallback when filtering is stopped
    fallback_splitter: SentenceSplitter,
    events: EventBus,
    default_talker: String,
    activity: Arc<Activity>,
}

impl JobStore {
    /// Create a job store over `chain`.
    ///
    /// Fails if the chain has no enabled boundary detection stage.
    pub fn new(
        chain: FilterChain,
        events: EventBus,
        default_talker: impl Into<String>,
        activity: Arc<Activity>,
    ) -> Result<Self> {
        if !chain.has_boundary_detector() {
            return Err(Error::NoBoundaryDetector);
        }
        Ok(Self {
            queue: Mutex::new(JobQueue::new()),
            delimiters: Mutex::new(HashMap::new()),
            chain,
            fallback_splitter: SentenceSplitter::default(),
            events,
            default_talker: default_talker.into(),
            activity,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn default_talker(&self) -> &str {
        &self.default_talker
    }

    pub fn filter_chain(&self) -> &FilterChain {
        &self.chain
    }

    fn lock(&self) -> MutexGuard<'_, JobQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Vec<SayqEvent>) {
        for event in events {
            self.events.emit_lossy(event);
        }
    }

    fn talker_or_default(&self, talker: &str) -> String {
        if talker.is_empty() {
            self.default_talker.clone()
        } else {
            talker.to_string()
        }
    }

    // ========================================
    // Submission
    // ========================================

    fn filter_input(&self, text: &str, talker: &str, owner_id: &str) -> FilterInput {
        let delimiter = self
            .delimiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner_id)
            .cloned();
        FilterInput {
            text: text.to_string(),
            talker: self.talker_or_default(talker),
            owner_id: owner_id.to_string(),
            delimiter,
        }
    }

    /// Submit a job, running the filter chain synchronously.
    ///
    /// The job starts `Queued`; the current job is not changed.
    pub fn submit(&self, text: &str, talker: &str, owner_id: &str) -> JobId {
        let input = self.filter_input(text, talker, owner_id);
        let outcome = self.chain.process(input.clone());
        self.store(input, outcome)
    }

    /// Submit a job, awaiting asynchronous filter stages
    pub async fn submit_async(&self, text: &str, talker: &str, owner_id: &str) -> JobId {
        let input = self.filter_input(text, talker, owner_id);
        let outcome = self.chain.process_async(input.clone()).await;
        self.store(input, outcome)
    }

    fn store(&self, input: FilterInput, outcome: ChainOutcome) -> JobId {
        let ChainResult {
            text,
            talker,
            sentences,
            ..
        } = match outcome {
            ChainOutcome::Finished(result) => result,
            ChainOutcome::Stopped => {
                warn!(owner = %input.owner_id, "Filtering stopped, splitting unfiltered text");
                let split = match &input.delimiter {
                    Some(delimiter) => self.fallback_splitter.split_with(&input.text, delimiter),
                    None => self.fallback_splitter.split(&input.text),
                };
                ChainResult {
                    text: split.joined(),
                    talker: input.talker.clone(),
                    modified: split.modified,
                    sentences: Some(split.sentences),
                }
            }
        };
        let sentences = sentences.unwrap_or_else(|| split_units(&text));
        let talker = self.talker_or_default(&talker);

        let job_id = {
            let mut queue = self.lock();
            let job_id = queue.next_id;
            queue.next_id += 1;
            queue.jobs.push(Job {
                id: job_id,
                owner_id: input.owner_id.clone(),
                talker: talker.clone(),
                sentences,
                cursor: 0,
                state: JobState::Queued,
            });
            job_id
        };

        info!(job_id, owner = %input.owner_id, talker = %talker, "Job submitted");
        self.publish(vec![notice(Notice::Submitted, job_id, &input.owner_id)]);
        self.activity.wake();
        job_id
    }

    /// Submit and immediately start a job
    pub fn say(&self, text: &str, talker: &str, owner_id: &str) -> JobId {
        let job_id = self.submit(text, talker, owner_id);
        self.start(job_id, owner_id);
        job_id
    }

    /// Async counterpart of [`JobStore::say`]
    pub async fn say_async(&self, text: &str, talker: &str, owner_id: &str) -> JobId {
        let job_id = self.submit_async(text, talker, owner_id).await;
        self.start(job_id, owner_id);
        job_id
    }

    /// Override the sentence delimiter used for `owner_id`'s future submissions
    pub fn set_sentence_delimiter(&self, owner_id: &str, pattern: &str) -> Result<()> {
        let delimiter = Regex::new(pattern)?;
        self.delimiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner_id.to_string(), delimiter);
        debug!(owner = %owner_id, pattern, "Sentence delimiter set");
        Ok(())
    }

    // ========================================
    // Dispatcher interface
    // ========================================

    /// Make the first speakable job current if no job is being read.
    ///
    /// Returns the current job, or 0 if nothing is speakable.
    pub fn start_next(&self) -> JobId {
        let mut events = Vec::new();
        let job_id = {
            let mut queue = self.lock();
            if queue.reading {
                queue.current.unwrap_or(0)
            } else {
                queue.start_next(&mut events)
            }
        };
        self.publish(events);
        job_id
    }

    /// Pull the next sentence of the current job, advancing its cursor.
    ///
    /// A job whose cursor reached the end is finished and the next speakable
    /// job is started. `None` means there is nothing to speak.
    pub fn next_sentence(&self) -> Option<Sentence> {
        let mut events = Vec::new();
        let sentence = {
            let mut queue = self.lock();
            if !queue.reading {
                queue.start_next(&mut events);
            }

            loop {
                let Some(current) = queue.current.filter(|_| queue.reading) else {
                    break None;
                };
                let Some(index) = queue.index_of(current) else {
                    warn!(job_id = current, "Current job vanished");
                    queue.current = None;
                    queue.start_next(&mut events);
                    continue;
                };
                if queue.jobs[index].state != JobState::Speaking
                    || queue.jobs[index].cursor > queue.jobs[index].sentences.len()
                {
                    queue.discard_broken(index, &mut events);
                    queue.start_next(&mut events);
                    continue;
                }

                let job = &mut queue.jobs[index];
                if job.cursor < job.sentences.len() {
                    let text = job.sentences[job.cursor].clone();
                    job.cursor += 1;
                    break Some(Sentence {
                        text,
                        job_id: job.id,
                        owner_id: job.owner_id.clone(),
                        talker: job.talker.clone(),
                        seq: job.cursor,
                    });
                }

                job.state = JobState::Finished;
                let (job_id, owner_id) = (job.id, job.owner_id.clone());
                info!(job_id, "Job finished");
                events.push(notice(Notice::Finished, job_id, &owner_id));
                queue.reading = false;
                queue.current = None;
                queue.delete_expired(job_id, &mut events);
                if queue.start_next(&mut events) == 0 {
                    break None;
                }
            }
        };
        self.publish(events);
        sentence
    }

    /// Whether a job is being read
    pub fn is_speaking(&self) -> bool {
        self.lock().reading
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Delete a job. Removing the current job starts the next speakable one.
    pub fn remove(&self, job_id: JobId, owner_id: &str) {
        let mut events = Vec::new();
        let promoted = {
            let mut queue = self.lock();
            let Some(index) = queue.resolve(job_id, owner_id) else {
                return;
            };
            let job = queue.jobs.remove(index);
            let was_current = queue.is_current(job.id);
            if was_current {
                if queue.reading {
                    events.push(notice(Notice::Stopped, job.id, &job.owner_id));
                }
                queue.current = None;
                queue.reading = false;
            }
            events.push(notice(Notice::Removed, job.id, &job.owner_id));
            info!(job_id = job.id, "Job removed");
            was_current && queue.start_next(&mut events) != 0
        };
        self.publish(events);
        if promoted {
            self.activity.wake();
        }
    }

    /// Pause a job at its cursor
    pub fn pause(&self, job_id: JobId, owner_id: &str) {
        let mut events = Vec::new();
        {
            let mut queue = self.lock();
            let Some(index) = queue.resolve(job_id, owner_id) else {
                return;
            };
            if queue.jobs[index].state == JobState::Finished {
                return;
            }
            queue.jobs[index].state = JobState::Paused;
            let id = queue.jobs[index].id;
            if queue.is_current(id) && queue.reading {
                queue.reading = false;
                events.push(notice(Notice::Paused, id, &queue.jobs[index].owner_id));
            }
            debug!(job_id = id, "Job paused");
        }
        self.publish(events);
        self.activity.wake();
    }

    /// Stop a job and rewind it to the beginning
    pub fn stop(&self, job_id: JobId, owner_id: &str) {
        let mut events = Vec::new();
        {
            let mut queue = self.lock();
            let Some(index) = queue.resolve(job_id, owner_id) else {
                return;
            };
            let job = &mut queue.jobs[index];
            job.state = JobState::Queued;
            job.cursor = 0;
            let (id, owner) = (job.id, job.owner_id.clone());
            if queue.is_current(id) && queue.reading {
                queue.reading = false;
                events.push(notice(Notice::Stopped, id, &owner));
            }
            debug!(job_id = id, "Job stopped");
        }
        self.publish(events);
        self.activity.wake();
    }

    /// Make a job speakable from its first sentence
    pub fn start(&self, job_id: JobId, owner_id: &str) {
        let mut events = Vec::new();
        {
            let mut queue = self.lock();
            let Some(index) = queue.resolve(job_id, owner_id) else {
                return;
            };
            let id = queue.jobs[index].id;
            let restarting = queue.is_current(id) && queue.reading;
            let job = &mut queue.jobs[index];
            job.cursor = 0;
            if restarting {
                events.push(notice(Notice::Started, id, &job.owner_id));
            } else {
                job.state = JobState::Speakable;
                if !queue.reading {
                    queue.start_next(&mut events);
                }
            }
        }
        self.publish(events);
        self.activity.wake();
    }

    /// Continue a paused job at its cursor; otherwise behaves like [`JobStore::start`]
    pub fn resume(&self, job_id: JobId, owner_id: &str) {
        let mut events = Vec::new();
        {
            let mut queue = self.lock();
            let Some(index) = queue.resolve(job_id, owner_id) else {
                return;
            };
            if queue.jobs[index].state != JobState::Paused {
                drop(queue);
                self.start(job_id, owner_id);
                return;
            }
            queue.jobs[index].state = JobState::Speakable;
            if !queue.reading {
                queue.start_next(&mut events);
            }
        }
        self.publish(events);
        self.activity.wake();
    }

    /// Move a job one position later, pausing it if it was speaking
    pub fn move_later(&self, job_id: JobId, owner_id: &str) {
        let mut events = Vec::new();
        {
            let mut queue = self.lock();
            let Some(index) = queue.resolve(job_id, owner_id) else {
                return;
            };
            let id = queue.jobs[index].id;
            if queue.jobs[index].state == JobState::Speaking {
                queue.jobs[index].state = JobState::Paused;
                if queue.is_current(id) {
                    queue.reading = false;
                }
                events.push(notice(Notice::Paused, id, &queue.jobs[index].owner_id));
            }
            if index + 1 < queue.jobs.len() {
                queue.jobs.swap(index, index + 1);
            }
            if !queue.reading {
                queue.start_next(&mut events);
            }
            debug!(job_id = id, "Job moved later");
        }
        self.publish(events);
        self.activity.wake();
    }

    /// Change the talker used for a job's remaining sentences
    pub fn change_talker(&self, job_id: JobId, talker: &str, owner_id: &str) {
        let talker = self.talker_or_default(talker);
        let mut queue = self.lock();
        if let Some(index) = queue.resolve(job_id, owner_id) {
            debug!(job_id = queue.jobs[index].id, talker = %talker, "Talker changed");
            queue.jobs[index].talker = talker;
        }
    }

    // ========================================
    // Navigation
    // ========================================

    fn navigate(&self, job_id: JobId, owner_id: &str, step: impl FnOnce(&[String], usize) -> usize) {
        let mut queue = self.lock();
        if let Some(index) = queue.resolve(job_id, owner_id) {
            let job = &mut queue.jobs[index];
            job.cursor = step(job.sentences.as_slice(), job.cursor).min(job.sentences.len());
        }
    }

    /// Step the cursor back one sentence
    pub fn seek_prev_sentence(&self, job_id: JobId, owner_id: &str) {
        self.navigate(job_id, owner_id, |_, cursor| cursor.saturating_sub(1));
    }

    /// Step the cursor forward one sentence
    pub fn seek_next_sentence(&self, job_id: JobId, owner_id: &str) {
        self.navigate(job_id, owner_id, |sentences, cursor| {
            if cursor < sentences.len() {
                cursor + 1
            } else {
                cursor
            }
        });
    }

    /// Back to the start of the paragraph, or of the previous one if already there
    pub fn seek_prev_paragraph(&self, job_id: JobId, owner_id: &str) {
        self.navigate(job_id, owner_id, |sentences, cursor| {
            let mut cursor = cursor.saturating_sub(1);
            while cursor > 0 && !sentences[cursor - 1].is_empty() {
                cursor -= 1;
            }
            cursor
        });
    }

    /// Forward past the next paragraph marker, or to the end
    pub fn seek_next_paragraph(&self, job_id: JobId, owner_id: &str) {
        self.navigate(job_id, owner_id, |sentences, cursor| {
            let mut cursor = cursor;
            while cursor < sentences.len() && !sentences[cursor].is_empty() {
                cursor += 1;
            }
            if cursor < sentences.len() {
                cursor += 1;
            }
            cursor
        });
    }

    // ========================================
    // Introspection
    // ========================================

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Job numbers in queue order; an empty owner lists every job
    pub fn job_numbers(&self, owner_id: &str) -> Vec<JobId> {
        self.lock()
            .jobs
            .iter()
            .filter(|j| owner_id.is_empty() || j.owner_id == owner_id)
            .map(|j| j.id)
            .collect()
    }

    pub fn job_state(&self, job_id: JobId, owner_id: &str) -> Option<JobState> {
        let queue = self.lock();
        queue.resolve(job_id, owner_id).map(|i| queue.jobs[i].state)
    }

    /// Number of sentence units, 0 for an unknown job
    pub fn sentence_count(&self, job_id: JobId, owner_id: &str) -> usize {
        let queue = self.lock();
        queue
            .resolve(job_id, owner_id)
            .map_or(0, |i| queue.jobs[i].sentences.len())
    }

    /// Job the dispatcher is iterating, 0 if none
    pub fn current_job(&self) -> JobId {
        self.lock().current.unwrap_or(0)
    }

    pub fn job_info(&self, job_id: JobId, owner_id: &str) -> Option<JobInfo> {
        let queue = self.lock();
        queue.resolve(job_id, owner_id).map(|i| queue.jobs[i].info())
    }

    /// Every job in queue order, taken under one lock
    pub fn snapshot(&self) -> Vec<JobInfo> {
        self.lock().jobs.iter().map(Job::info).collect()
    }

    /// Sentence `seq` (1-based) of a job; empty if out of range
    pub fn job_sentence(&self, job_id: JobId, seq: usize, owner_id: &str) -> String {
        let queue = self.lock();
        queue
            .resolve(job_id, owner_id)
            .and_then(|i| seq.checked_sub(1).and_then(|s| queue.jobs[i].sentences.get(s)))
            .cloned()
            .unwrap_or_default()
    }
}
