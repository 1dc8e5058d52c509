//! Task control: cancellation tokens by task id.
//!
//! Each admitted task is registered with the cancellation token of its scope.
//! Submission sources (Ctrl-C handler, relay cancel endpoint) cancel by id;
//! the downloader observes the token at every suspension point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct TaskControl {
    tasks: Mutex<HashMap<String, CancellationToken>>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a task's token. Replaces any token registered under the same id.
    pub fn register(&self, id: &str, token: CancellationToken) {
        self.tasks().insert(id.to_string(), token);
    }

    /// Forget a task (call when it reaches a terminal state).
    pub fn unregister(&self, id: &str) {
        self.tasks().remove(id);
    }

    /// Request cancellation. Returns false if no such task is registered.
    pub fn cancel(&self, id: &str) -> bool {
        match self.tasks().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.tasks().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }
}
