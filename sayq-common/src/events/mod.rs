//! Event types for the sayq notification system
//!
//! Provides the shared event definitions and the EventBus used by the job store
//! and the dispatcher to publish lifecycle notifications.

use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Sayq event types
///
/// Events are broadcast via EventBus and can be serialized (one JSON object per
/// event, tagged by `type`) for clients that log or forward them.
/// Emission is one-directional; handlers never block the emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SayqEvent {
    /// A text job was added to the queue
    JobSubmitted {
        job_id: JobId,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A job began speaking from its first sentence
    JobStarted {
        job_id: JobId,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A job emitted its last sentence
    JobFinished {
        job_id: JobId,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A speaking job was stopped before it finished
    JobStopped {
        job_id: JobId,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The current job was paused
    JobPaused {
        job_id: JobId,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A job continued speaking from a non-zero cursor
    JobResumed {
        job_id: JobId,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A job was deleted from the queue
    JobRemoved {
        job_id: JobId,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A sentence was handed to a backend
    SentenceStarted {
        job_id: JobId,
        /// 1-based sentence number within the job
        seq: usize,
        text: String,
        talker: String,
        timestamp: DateTime<Utc>,
    },

    /// The backend finished with a sentence
    SentenceFinished {
        job_id: JobId,
        seq: usize,
        timestamp: DateTime<Utc>,
    },

    ParagraphStarted {
        timestamp: DateTime<Utc>,
    },

    ParagraphFinished {
        timestamp: DateTime<Utc>,
    },

    /// The dispatcher woke up with a job to read
    ReadingStarted {
        timestamp: DateTime<Utc>,
    },

    /// The dispatcher ran out of work and is going back to sleep
    ReadingStopped {
        timestamp: DateTime<Utc>,
    },

    /// Job text was interrupted by a warning or message
    ReadingInterrupted {
        timestamp: DateTime<Utc>,
    },

    /// Job text continues after an interruption
    ReadingResumed {
        timestamp: DateTime<Utc>,
    },
}

impl SayqEvent {
    /// Job number carried by job and sentence events
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            SayqEvent::JobSubmitted { job_id, .. }
            | SayqEvent::JobStarted { job_id, .. }
            | SayqEvent::JobFinished { job_id, .. }
            | SayqEvent::JobStopped { job_id, .. }
            | SayqEvent::JobPaused { job_id, .. }
            | SayqEvent::JobResumed { job_id, .. }
            | SayqEvent::JobRemoved { job_id, .. }
            | SayqEvent::SentenceStarted { job_id, .. }
            | SayqEvent::SentenceFinished { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Variant name, matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            SayqEvent::JobSubmitted { .. } => "JobSubmitted",
            SayqEvent::JobStarted { .. } => "JobStarted",
            SayqEvent::JobFinished { .. } => "JobFinished",
            SayqEvent::JobStopped { .. } => "JobStopped",
            SayqEvent::JobPaused { .. } => "JobPaused",
            SayqEvent::JobResumed { .. } => "JobResumed",
            SayqEvent::JobRemoved { .. } => "JobRemoved",
            SayqEvent::SentenceStarted { .. } => "SentenceStarted",
            SayqEvent::SentenceFinished { .. } => "SentenceFinished",
            SayqEvent::ParagraphStarted { .. } => "ParagraphStarted",
            SayqEvent::ParagraphFinished { .. } => "ParagraphFinished",
            SayqEvent::ReadingStarted { .. } => "ReadingStarted",
            SayqEvent::ReadingStopped { .. } => "ReadingStopped",
            SayqEvent::ReadingInterrupted { .. } => "ReadingInterrupted",
            SayqEvent::ReadingResumed { .. } => "ReadingResumed",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish from any thread (no runtime required to emit)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use sayq_common::events::{EventBus, SayqEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SayqEvent::ReadingStarted {
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.kind(), "ReadingStarted");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SayqEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SayqEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SayqEvent,
    ) -> Result<usize, broadcast::error::SendError<SayqEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SayqEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        let result = bus.emit(SayqEvent::ReadingStopped {
            timestamp: Utc::now(),
        });
        assert!(result.is_err(), "No subscribers should yield SendError");

        // Lossy emit never fails
        bus.emit_lossy(SayqEvent::ReadingStopped {
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(SayqEvent::JobSubmitted {
            job_id: 1,
            owner_id: "app".to_string(),
            timestamp: Utc::now(),
        });
        bus.emit_lossy(SayqEvent::JobStarted {
            job_id: 1,
            owner_id: "app".to_string(),
            timestamp: Utc::now(),
        });

        assert_eq!(rx.try_recv().unwrap().kind(), "JobSubmitted");
        assert_eq!(rx.try_recv().unwrap().kind(), "JobStarted");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_job_id() {
        let event = SayqEvent::SentenceStarted {
            job_id: 7,
            seq: 1,
            text: "Hello.".to_string(),
            talker: "en".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.job_id(), Some(7));
        assert_eq!(
            SayqEvent::ParagraphStarted { timestamp: Utc::now() }.job_id(),
            None
        );
    }

    #[test]
    fn test_event_serialization_tagged() {
        let event = SayqEvent::JobRemoved {
            job_id: 4,
            owner_id: String::new(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"JobRemoved\""));
        assert!(json.contains("\"job_id\":4"));
        let back: SayqEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
