//! Worker pool: bounded admission, FIFO queueing and drain.
//!
//! [`WorkerPool::add`] admits a task at once when fewer than
//! `max_concurrent` tasks are active and queues it otherwise. When an active
//! task reaches a terminal state its slot passes straight to the oldest
//! queued task. Shutdown closes admission, ends everything still queued as
//! `Cancelled`, then waits for the active downloaders.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::at_least_one;
use crate::control::TaskControl;
use crate::downloader::Downloader;
use crate::engine::Engine;
use crate::names::ReservedName;
use crate::progress::{ProgressHandle, ProgressSnapshot, ProgressState, TaskStatus};
use crate::task::TaskDescriptor;
use crate::url_model::{derive_filename, NameSources};

/// Capacity of the pool-wide event bus.
const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool is shutting down; no new tasks are accepted")]
    ShuttingDown,
    #[error("a task with id {0} was already submitted")]
    DuplicateId(String),
    #[error("unsupported URL {0}: only http and https are supported")]
    InvalidUrl(String),
}

/// A submitted task waiting for (or holding) a slot.
struct Admission {
    task: TaskDescriptor,
    progress: Arc<ProgressState>,
    reserved: Option<ReservedName>,
    cancel: CancellationToken,
}

struct PoolState {
    active: usize,
    queue: VecDeque<Admission>,
    accepting: bool,
    /// Submitted tasks in submission order. Terminal ones beyond the
    /// retention limit are dropped oldest first.
    known: Vec<ProgressHandle>,
}

impl PoolState {
    fn prune_finished(&mut self, retain: usize) {
        let finished = self.known.iter().filter(|h| h.snapshot().is_terminal()).count();
        let mut excess = finished.saturating_sub(retain);
        if excess == 0 {
            return;
        }
        tracing::debug!(count = excess, "forgetting old finished tasks");
        self.known.retain(|h| {
            if excess > 0 && h.snapshot().is_terminal() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

struct PoolInner {
    engine: Arc<Engine>,
    max_concurrent: usize,
    state: Mutex<PoolState>,
    control: TaskControl,
    tracker: TaskTracker,
    root: CancellationToken,
    bus: broadcast::Sender<ProgressSnapshot>,
}

/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Pool with the engine's configured concurrency limit.
    pub fn new(engine: Arc<Engine>) -> Self {
        let limit = engine.settings().max_concurrent_downloads;
        Self::build(engine, limit)
    }

    /// Pool with an explicit limit; values <= 0 are treated as 1.
    pub fn with_max_concurrent(engine: Arc<Engine>, max_concurrent: i64) -> Self {
        Self::build(engine, at_least_one(max_concurrent))
    }

    fn build(engine: Arc<Engine>, max_concurrent: usize) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(PoolInner {
                engine,
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(PoolState {
                    active: 0,
                    queue: VecDeque::new(),
                    accepting: true,
                    known: Vec::new(),
                }),
                control: TaskControl::new(),
                tracker: TaskTracker::new(),
                root: CancellationToken::new(),
                bus,
            }),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.inner.engine
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Submit a task. Must be called from within a tokio runtime.
    ///
    /// A requested filename is reserved here, under the pool lock, so tasks
    /// asking for the same name get distinct names in submission order.
    pub fn add(&self, task: TaskDescriptor) -> Result<ProgressHandle, PoolError> {
        match url::Url::parse(&task.url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => return Err(PoolError::InvalidUrl(task.url)),
        }

        let inner = &self.inner;
        let mut state = inner.state();
        if !state.accepting {
            return Err(PoolError::ShuttingDown);
        }
        if state.known.iter().any(|h| h.id() == task.id) {
            return Err(PoolError::DuplicateId(task.id));
        }

        let progress = Arc::new(ProgressState::new(
            task.id.clone(),
            task.url.clone(),
            inner.engine.settings().progress_interval,
            Some(inner.bus.clone()),
        ));
        let handle = ProgressHandle::new(Arc::clone(&progress));

        let reserved = task.filename.as_deref().map(|requested| {
            let name = derive_filename(NameSources {
                requested: Some(requested),
                url: &task.url,
                ..NameSources::default()
            });
            inner.engine.names().reserve(&task.output_dir, &name)
        });
        if let Some(r) = &reserved {
            progress.set_destination(r.name(), r.path());
        }

        let cancel = inner.root.child_token();
        inner.control.register(&task.id, cancel.clone());
        state.known.push(handle.clone());
        progress.publish();

        let admission = Admission {
            task,
            progress,
            reserved,
            cancel,
        };
        if state.active < inner.max_concurrent {
            state.active += 1;
            drop(state);
            inner.launch(admission);
        } else {
            tracing::debug!(
                task = %admission.task.id,
                queued = state.queue.len() + 1,
                "all slots busy, task queued"
            );
            state.queue.push_back(admission);
        }
        Ok(handle)
    }

    /// Cancel one queued or active task. Returns false for unknown or
    /// already finished tasks.
    pub fn cancel(&self, id: &str) -> bool {
        let queued = {
            let mut state = self.inner.state();
            let pos = state.queue.iter().position(|a| a.task.id == id);
            pos.and_then(|pos| state.queue.remove(pos))
        };
        if let Some(admission) = queued {
            self.inner.control.unregister(id);
            admission.progress.finish(TaskStatus::Cancelled, None);
            tracing::info!(task = %id, "queued task cancelled");
            self.inner.prune_finished();
            return true;
        }
        // The downloader publishes its terminal state before it unregisters.
        match self.handle(id) {
            Some(h) if !h.snapshot().is_terminal() => self.inner.control.cancel(id),
            _ => false,
        }
    }

    /// Stop admitting, leave running tasks alone, and wait until every
    /// admitted task is terminal. Queued tasks end as `Cancelled`.
    pub async fn graceful_shutdown(&self) {
        let drained: Vec<Admission> = {
            let mut state = self.inner.state();
            state.accepting = false;
            state.queue.drain(..).collect()
        };
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "dropping queued tasks at shutdown");
        }
        for admission in drained {
            self.inner.control.unregister(&admission.task.id);
            admission.progress.finish(
                TaskStatus::Cancelled,
                Some("pool shut down before the task started".to_string()),
            );
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.prune_finished();
        tracing::debug!("worker pool drained");
    }

    /// Cancel every task, then drain as in [`graceful_shutdown`](Self::graceful_shutdown).
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        self.graceful_shutdown().await;
    }

    /// Latest snapshot of every task still listed, in submission order.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.inner.state().known.iter().map(|h| h.snapshot()).collect()
    }

    pub fn handle(&self, id: &str) -> Option<ProgressHandle> {
        self.inner.state().known.iter().find(|h| h.id() == id).cloned()
    }

    pub fn snapshot(&self, id: &str) -> Option<ProgressSnapshot> {
        self.handle(id).map(|h| h.snapshot())
    }

    /// Receiver for every task's events. Lagging receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.inner.bus.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.inner.state().active
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state().queue.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.state().accepting
    }
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune_finished(&self) {
        let retain = self.engine.settings().retain_finished;
        self.state().prune_finished(retain);
    }

    /// Start a task in a slot already counted in `active`.
    fn launch(self: &Arc<Self>, admission: Admission) {
        let inner = Arc::clone(self);
        let Admission {
            task,
            progress,
            reserved,
            cancel,
        } = admission;
        progress.mark_started();
        tracing::debug!(task = %task.id, url = %task.url, "task admitted");

        self.tracker.spawn(async move {
            let id = task.id.clone();
            let mut downloader = Downloader::new(Arc::clone(&inner.engine), task, progress, cancel);
            if let Some(r) = reserved {
                downloader = downloader.with_reservation(r);
            }
            let status = downloader.run().await;
            tracing::debug!(task = %id, %status, "task finished");
            inner.control.unregister(&id);
            inner.prune_finished();
            inner.admit_next();
        });
    }

    /// Hand the freed slot to the oldest queued task, or give it back.
    fn admit_next(self: &Arc<Self>) {
        let next = {
            let mut state = self.state();
            match state.queue.pop_front() {
                Some(admission) => Some(admission),
                None => {
                    state.active = state.active.saturating_sub(1);
                    None
                }
            }
        };
        if let Some(admission) = next {
            self.launch(admission);
        }
    }
}
