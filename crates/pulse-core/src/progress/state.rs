//! Task status and the read-only snapshot type handed to consumers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of one task. `Done`, `Error` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Resolving,
    Probing,
    Downloading,
    Completing,
    Done,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Resolving => "resolving",
            TaskStatus::Probing => "probing",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completing => "completing",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a task's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub id: String,
    pub url: String,
    pub filename: Option<String>,
    pub final_path: Option<PathBuf>,
    pub status: TaskStatus,
    pub total_bytes: Option<u64>,
    pub bytes_done: u64,
    pub chunk_count: usize,
    /// Seconds since the task was admitted (frozen once terminal).
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// Completed fraction in `0.0..=1.0`, or `None` while the size is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(if self.status == TaskStatus::Done { 1.0 } else { 0.0 }),
            Some(total) => Some((self.bytes_done as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    /// Average transfer rate since admission.
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.bytes_done as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    /// Estimated seconds remaining, when both size and rate are known.
    pub fn eta_secs(&self) -> Option<f64> {
        let total = self.total_bytes?;
        let rate = self.bytes_per_sec();
        if rate <= 0.0 || self.is_terminal() {
            return None;
        }
        Some(total.saturating_sub(self.bytes_done) as f64 / rate)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
