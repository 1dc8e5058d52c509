//! Per-task download state machine.
//!
//! `Queued → Resolving → Probing → {Ranged | SingleStream} → Completing →
//! {Done | Error | Cancelled}`. The downloader owns its task's
//! [`ProgressState`], the temp file and the reserved final name. Whatever the
//! outcome, every connection token is back in the budget and the temp file is
//! gone (or renamed) by the time [`Downloader::run`] returns.

mod finish;
mod ranged;
mod single;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::DownloadError;
use crate::host::HostKey;
use crate::names::ReservedName;
use crate::probe::{self, ProbeResult};
use crate::progress::{ProgressState, TaskStatus};
use crate::resolver::ResolvedSource;
use crate::storage::TempFileGuard;
use crate::task::TaskDescriptor;
use crate::url_model::{derive_filename, NameSources};

/// How the body is fetched, chosen after probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Ranged { total: u64 },
    Single { expected: Option<u64> },
}

impl TransferMode {
    /// Ranged only when the size is known, ranges work, and the resource is
    /// larger than the chunking threshold.
    pub fn choose(probe: &ProbeResult, min_chunk_threshold: u64) -> Self {
        match probe.total_size {
            Some(total) if probe.ranges_supported && total > min_chunk_threshold => {
                TransferMode::Ranged { total }
            }
            expected => TransferMode::Single { expected },
        }
    }
}

pub struct Downloader {
    engine: Arc<Engine>,
    task: TaskDescriptor,
    progress: Arc<ProgressState>,
    cancel: CancellationToken,
    reserved: Option<ReservedName>,
}

impl Downloader {
    pub fn new(
        engine: Arc<Engine>,
        task: TaskDescriptor,
        progress: Arc<ProgressState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            task,
            progress,
            cancel,
            reserved: None,
        }
    }

    /// Use a name reserved at submission instead of deriving one after the probe.
    pub fn with_reservation(mut self, reserved: ReservedName) -> Self {
        self.reserved = Some(reserved);
        self
    }

    /// Drive the task to a terminal state and publish it.
    pub async fn run(mut self) -> TaskStatus {
        self.progress.mark_started();
        let ticker_stop = CancellationToken::new();
        let ticker = tokio::spawn(publish_ticks(
            Arc::clone(&self.progress),
            self.engine.settings().progress_interval,
            ticker_stop.clone(),
        ));

        let result = self.execute().await;

        ticker_stop.cancel();
        let _ = ticker.await;

        let id = self.task.id.clone();
        match result {
            Ok(path) => {
                tracing::info!(task = %id, path = %path.display(), "download completed");
                self.progress.finish(TaskStatus::Done, None);
                TaskStatus::Done
            }
            Err(DownloadError::Cancelled) => {
                tracing::info!(task = %id, "download cancelled");
                self.progress.finish(TaskStatus::Cancelled, None);
                TaskStatus::Cancelled
            }
            Err(e) => {
                tracing::warn!(task = %id, url = %self.task.url, error = %e, "download failed");
                self.progress.finish(TaskStatus::Error, Some(e.to_string()));
                TaskStatus::Error
            }
        }
    }

    async fn execute(&mut self) -> Result<PathBuf, DownloadError> {
        self.progress.set_status(TaskStatus::Resolving);
        let source = self.resolve().await?;
        let host = HostKey::from_url(&source.url)
            .map_err(|e| DownloadError::Probe(format!("{e:#}")))?;

        self.progress.set_status(TaskStatus::Probing);
        let probed = probe::probe(&source.url, self.engine.user_agent(), &self.cancel).await?;
        self.progress.set_total(probed.total_size);

        let reserved = match self.reserved.take() {
            Some(r) => r,
            None => {
                let name = derive_filename(NameSources {
                    requested: self.task.filename.as_deref(),
                    suggested: source.filename.as_deref(),
                    content_disposition: probed.content_disposition.as_deref(),
                    url: &source.url,
                });
                self.engine.names().reserve(&self.task.output_dir, &name)
            }
        };
        let final_path = reserved.path();
        self.progress.set_destination(reserved.name(), final_path.clone());

        tokio::fs::create_dir_all(&self.task.output_dir)
            .await
            .map_err(|e| DownloadError::filesystem("create output directory", e))?;
        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let temp = reserved.temp_path();
        let mut guard = TempFileGuard::new(temp.clone());
        self.progress.set_status(TaskStatus::Downloading);

        let mode = TransferMode::choose(&probed, self.engine.settings().min_chunk_threshold);
        self.log(format_args!("transfer mode {mode:?} for {}", reserved.name()));

        let (writer, final_len) = match mode {
            TransferMode::Ranged { total } => {
                match self.download_ranged(&source.url, &host, total, &temp).await {
                    Ok(writer) => (writer, None),
                    Err(DownloadError::RangeUnsupported) => {
                        tracing::info!(
                            task = %self.task.id,
                            "server rejected byte ranges, falling back to a single stream"
                        );
                        self.download_single(&source.url, &host, Some(total), &temp).await?
                    }
                    Err(e) => return Err(e),
                }
            }
            TransferMode::Single { expected } => {
                self.download_single(&source.url, &host, expected, &temp).await?
            }
        };

        self.progress.set_status(TaskStatus::Completing);
        finish::finalize(writer, &final_path, final_len).await?;
        guard.disarm();
        drop(reserved);
        Ok(final_path)
    }

    async fn resolve(&self) -> Result<ResolvedSource, DownloadError> {
        let Some(resolver) = self.engine.resolvers().find(&self.task.url) else {
            return Ok(ResolvedSource::direct(&self.task.url));
        };
        tracing::debug!(task = %self.task.id, resolver = resolver.name(), "resolving source");

        let url = self.task.url.clone();
        let quality = self.task.quality.clone();
        let job = tokio::task::spawn_blocking(move || resolver.resolve(&url, quality.as_deref()));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            joined = job => match joined {
                Ok(Ok(source)) => Ok(source),
                Ok(Err(e)) => Err(DownloadError::Resolution(format!("{e:#}"))),
                Err(e) => Err(DownloadError::Resolution(format!("resolver worker failed: {e}"))),
            },
        }
    }

    /// Task-level narration: info for verbose tasks, debug otherwise.
    fn log(&self, message: std::fmt::Arguments<'_>) {
        if self.task.verbose {
            tracing::info!(task = %self.task.id, "{}", message);
        } else {
            tracing::debug!(task = %self.task.id, "{}", message);
        }
    }
}

/// Rate-limited progress publication while the task runs.
async fn publish_ticks(progress: Arc<ProgressState>, interval: Duration, stop: CancellationToken) {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticks.tick() => progress.publish_progress(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probed(total: Option<u64>, ranges: bool) -> ProbeResult {
        ProbeResult {
            total_size: total,
            ranges_supported: ranges,
            content_disposition: None,
        }
    }

    #[test]
    fn mode_requires_size_ranges_and_threshold() {
        assert_eq!(
            TransferMode::choose(&probed(Some(10_000), true), 1_000),
            TransferMode::Ranged { total: 10_000 }
        );
        assert_eq!(
            TransferMode::choose(&probed(Some(1_000), true), 1_000),
            TransferMode::Single { expected: Some(1_000) }
        );
        assert_eq!(
            TransferMode::choose(&probed(Some(10_000), false), 1_000),
            TransferMode::Single { expected: Some(10_000) }
        );
        assert_eq!(
            TransferMode::choose(&probed(None, true), 1_000),
            TransferMode::Single { expected: None }
        );
    }
}
