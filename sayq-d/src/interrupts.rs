//! Warning and message queues
//!
//! Interruptions preempt job text. Warnings always go before messages. Each
//! queue has its own lock, separate from the job store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::dispatch::Activity;

/// A warning or message waiting to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptItem {
    pub text: String,
    /// Empty means the default talker
    pub talker: String,
    pub owner_id: String,
}

pub struct InterruptQueues {
    warnings: Mutex<VecDeque<InterruptItem>>,
    messages: Mutex<VecDeque<InterruptItem>>,
    activity: Arc<Activity>,
}

fn lock(queue: &Mutex<VecDeque<InterruptItem>>) -> MutexGuard<'_, VecDeque<InterruptItem>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InterruptQueues {
    pub fn new(activity: Arc<Activity>) -> Self {
        Self {
            warnings: Mutex::new(VecDeque::new()),
            messages: Mutex::new(VecDeque::new()),
            activity,
        }
    }

    pub fn enqueue_warning(&self, text: &str, talker: &str, owner_id: &str) {
        debug!(owner = %owner_id, "Warning queued");
        lock(&self.warnings).push_back(InterruptItem {
            text: text.to_string(),
            talker: talker.to_string(),
            owner_id: owner_id.to_string(),
        });
        self.activity.wake();
    }

    pub fn enqueue_message(&self, text: &str, talker: &str, owner_id: &str) {
        debug!(owner = %owner_id, "Message queued");
        lock(&self.messages).push_back(InterruptItem {
            text: text.to_string(),
            talker: talker.to_string(),
            owner_id: owner_id.to_string(),
        });
        self.activity.wake();
    }

    pub fn next_warning(&self) -> Option<InterruptItem> {
        lock(&self.warnings).pop_front()
    }

    pub fn next_message(&self) -> Option<InterruptItem> {
        lock(&self.messages).pop_front()
    }

    pub fn has_warnings(&self) -> bool {
        !lock(&self.warnings).is_empty()
    }

    pub fn has_messages(&self) -> bool {
        !lock(&self.messages).is_empty()
    }

    pub fn warning_count(&self) -> usize {
        lock(&self.warnings).len()
    }

    pub fn message_count(&self) -> usize {
        lock(&self.messages).len()
    }
}
