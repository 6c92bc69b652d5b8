//! Job identifiers, states and snapshots
//!
//! These types cross the boundary between the service and its clients, so they
//! live here rather than in the job store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job number assigned at submission.
///
/// Numbers start at 1 and increase monotonically; 0 is never assigned and is
/// used by the API to mean "the caller's own most recent job" or "no job".
pub type JobId = u32;

/// Lifecycle state of a text job
///
/// ```text
/// Queued -> Speakable -> Speaking -> Paused -> Speakable
///                                 -> Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Submitted but not yet started
    Queued,
    /// Started and waiting for its turn
    Speakable,
    /// Currently being read by the dispatcher
    Speaking,
    /// Paused; resumes at its cursor
    Paused,
    /// All sentences emitted
    Finished,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Speakable => "speakable",
            JobState::Speaking => "speaking",
            JobState::Paused => "paused",
            JobState::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job, taken under the job store lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: JobId,
    pub state: JobState,
    /// Submitting application; empty for the service itself
    pub owner_id: String,
    pub talker: String,
    /// The cursor: count of sentences before the next one to emit
    pub seq: usize,
    pub sentence_count: usize,
}
