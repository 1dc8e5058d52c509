//! Pulse download engine.
//!
//! A [`WorkerPool`] admits [`TaskDescriptor`]s up to a concurrency limit.
//! Each admitted task runs a [`Downloader`], which probes the resource,
//! splits it into chunks when the server supports byte ranges, and fetches
//! the chunks concurrently under a shared [`ConnectionBudget`]. Progress is
//! published as [`ProgressSnapshot`] events per task and on a pool-wide bus.

pub mod budget;
pub mod config;
pub mod control;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod host;
pub mod logging;
pub mod names;
pub mod paths;
pub mod plan;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod task;
pub mod url_model;

pub use budget::{BudgetPolicy, ConnectionBudget, ConnectionToken};
pub use config::PulseConfig;
pub use downloader::Downloader;
pub use engine::{Engine, EngineSettings};
pub use error::{DownloadError, FetchError};
pub use pool::{PoolError, WorkerPool};
pub use progress::{ProgressHandle, ProgressReceiver, ProgressSnapshot, ProgressState, TaskStatus};
pub use resolver::{ResolvedSource, Resolver, ResolverSet};
pub use task::TaskDescriptor;
