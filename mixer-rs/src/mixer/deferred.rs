//! Cancellable deferred continuations.
//!
//! Tasks are polled from the presentation thread instead of sleeping on it.

use std::time::Instant;

struct Scheduled<T> {
    key: String,
    due: Instant,
    task: T,
}

/// Queue of keyed tasks that become runnable at a deadline.
///
/// At most one task is pending per key; scheduling again replaces it.
pub struct DeferredQueue<T> {
    tasks: Vec<Scheduled<T>>,
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Schedule `task` under `key`, replacing any task already pending for it.
    pub fn schedule(&mut self, key: &str, due: Instant, task: T) {
        self.cancel(key);
        self.tasks.push(Scheduled {
            key: key.to_string(),
            due,
            task,
        });
    }

    /// Cancel the task pending under `key`. Returns whether one existed.
    pub fn cancel(&mut self, key: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.key != key);
        self.tasks.len() != before
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Remove and return every task due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<T> {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.tasks.drain(..).partition(|t| t.due <= now);
        self.tasks = pending;
        due.sort_by_key(|t| t.due);
        due.into_iter().map(|t| t.task).collect()
    }

    /// Deadline of the earliest pending task.
    pub fn next_due(&self) -> Option<Instant> {
        self.tasks.iter().map(|t| t.due).min()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.tasks.iter().any(|t| t.key == key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
