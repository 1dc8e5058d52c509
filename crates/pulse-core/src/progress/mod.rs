//! Per-task progress state and its event stream.
//!
//! The owning downloader is the only writer. Byte counts are atomics so
//! transfer callbacks never take a lock; everything else sits behind one
//! mutex. Snapshots go out on a bounded broadcast channel (oldest events are
//! dropped for slow subscribers) and, when the task belongs to a pool, on the
//! pool-wide bus as well. The terminal event is always the last one.

mod state;

pub use state::{ProgressSnapshot, TaskStatus};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Per-task event buffer. Older events are overwritten for lagging receivers.
const EVENT_BUFFER: usize = 64;

#[derive(Debug)]
struct Meta {
    status: TaskStatus,
    total_bytes: Option<u64>,
    filename: Option<String>,
    final_path: Option<PathBuf>,
    chunk_count: usize,
    error: Option<String>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    last_published: Option<Instant>,
    last_published_bytes: u64,
}

#[derive(Debug)]
pub struct ProgressState {
    id: String,
    url: String,
    interval: Duration,
    bytes_done: AtomicU64,
    meta: Mutex<Meta>,
    tx: broadcast::Sender<ProgressSnapshot>,
    bus: Option<broadcast::Sender<ProgressSnapshot>>,
}

impl ProgressState {
    /// New state in `Queued`. `interval` is the minimum spacing of
    /// byte-count updates; status changes are always published.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        interval: Duration,
        bus: Option<broadcast::Sender<ProgressSnapshot>>,
    ) -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            id: id.into(),
            url: url.into(),
            interval,
            bytes_done: AtomicU64::new(0),
            meta: Mutex::new(Meta {
                status: TaskStatus::Queued,
                total_bytes: None,
                filename: None,
                final_path: None,
                chunk_count: 0,
                error: None,
                started_at: None,
                finished_at: None,
                last_published: None,
                last_published_bytes: 0,
            }),
            tx,
            bus,
        }
    }

    fn meta(&self) -> MutexGuard<'_, Meta> {
        self.meta.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> TaskStatus {
        self.meta().status
    }

    /// Record bytes written. Not published by itself; see [`publish_progress`](Self::publish_progress).
    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    /// Called when the pool admits the task; starts the elapsed clock.
    pub fn mark_started(&self) {
        let mut meta = self.meta();
        if meta.started_at.is_none() {
            meta.started_at = Some(Instant::now());
        }
    }

    pub fn set_total(&self, total: Option<u64>) {
        self.meta().total_bytes = total;
    }

    pub fn set_chunk_count(&self, n: usize) {
        self.meta().chunk_count = n;
    }

    pub fn set_destination(&self, filename: &str, final_path: PathBuf) {
        let mut meta = self.meta();
        meta.filename = Some(filename.to_string());
        meta.final_path = Some(final_path);
    }

    /// Move to a non-terminal status and publish. Ignored once terminal.
    pub fn set_status(&self, status: TaskStatus) {
        debug_assert!(!status.is_terminal(), "use finish() for terminal states");
        let mut meta = self.meta();
        if meta.status.is_terminal() {
            return;
        }
        meta.status = status;
        self.emit(&mut meta);
    }

    /// Publish the current state now, regardless of the rate limit.
    pub fn publish(&self) {
        let mut meta = self.meta();
        if meta.status.is_terminal() {
            return;
        }
        self.emit(&mut meta);
    }

    /// Publish a byte-count update if the byte count moved and the rate
    /// limit interval has passed since the last event.
    pub fn publish_progress(&self) {
        let mut meta = self.meta();
        if meta.status.is_terminal() {
            return;
        }
        if self.bytes_done() == meta.last_published_bytes {
            return;
        }
        if let Some(last) = meta.last_published {
            if last.elapsed() < self.interval {
                return;
            }
        }
        self.emit(&mut meta);
    }

    /// Enter a terminal state and publish the final event. Only the first
    /// call has an effect.
    pub fn finish(&self, status: TaskStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        let mut meta = self.meta();
        if meta.status.is_terminal() {
            return;
        }
        meta.status = status;
        meta.error = error;
        meta.finished_at = Some(Instant::now());
        self.emit(&mut meta);
    }

    fn emit(&self, meta: &mut Meta) {
        let snapshot = self.build_snapshot(meta);
        meta.last_published = Some(Instant::now());
        meta.last_published_bytes = snapshot.bytes_done;
        if let Some(bus) = &self.bus {
            let _ = bus.send(snapshot.clone());
        }
        // No receivers is fine; late subscribers read the retained state.
        let _ = self.tx.send(snapshot);
    }

    fn build_snapshot(&self, meta: &Meta) -> ProgressSnapshot {
        let elapsed_secs = match (meta.started_at, meta.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            (None, _) => 0.0,
        };
        ProgressSnapshot {
            id: self.id.clone(),
            url: self.url.clone(),
            filename: meta.filename.clone(),
            final_path: meta.final_path.clone(),
            status: meta.status,
            total_bytes: meta.total_bytes,
            bytes_done: self.bytes_done(),
            chunk_count: meta.chunk_count,
            elapsed_secs,
            error: meta.error.clone(),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.build_snapshot(&self.meta())
    }

    /// Subscribe to this task's events. A subscriber that arrives after the
    /// task ended receives the terminal snapshot once.
    pub fn subscribe(&self) -> ProgressReceiver {
        let meta = self.meta();
        let rx = self.tx.subscribe();
        let pending = meta
            .status
            .is_terminal()
            .then(|| self.build_snapshot(&meta));
        ProgressReceiver {
            rx,
            pending,
            finished: false,
        }
    }
}

/// Receiving end of one task's event stream.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: broadcast::Receiver<ProgressSnapshot>,
    pending: Option<ProgressSnapshot>,
    finished: bool,
}

impl ProgressReceiver {
    /// Next event, or `None` after the terminal event was delivered.
    /// Events lost to a full buffer are skipped.
    pub async fn recv(&mut self) -> Option<ProgressSnapshot> {
        if self.finished {
            return None;
        }
        if let Some(snapshot) = self.pending.take() {
            self.finished = true;
            return Some(snapshot);
        }
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => {
                    self.finished = snapshot.is_terminal();
                    return Some(snapshot);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// Read-only handle to a task's progress, given to submission sources.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    state: Arc<ProgressState>,
}

impl ProgressHandle {
    pub fn new(state: Arc<ProgressState>) -> Self {
        Self { state }
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.state.subscribe()
    }

    /// Wait for the terminal snapshot.
    pub async fn wait(&self) -> ProgressSnapshot {
        let mut rx = self.subscribe();
        while let Some(snapshot) = rx.recv().await {
            if snapshot.is_terminal() {
                return snapshot;
            }
        }
        self.snapshot()
    }
}
