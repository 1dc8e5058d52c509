//! Ranged mode: one concurrent fetch per chunk.

use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::{finish, Downloader};
use crate::error::{DownloadError, FetchError};
use crate::fetcher::{ChunkFetcher, ChunkOutcome};
use crate::host::HostKey;
use crate::plan::{chunk_count, ChunkPlan, ChunkStatus};
use crate::storage::StorageWriter;

impl Downloader {
    /// Fetch every chunk concurrently and barrier-wait for all of them.
    ///
    /// The first chunk that fails for good cancels its siblings. A chunk
    /// reporting that ranges do not work yields
    /// [`DownloadError::RangeUnsupported`] so the caller can retry as a
    /// single stream.
    pub(super) async fn download_ranged(
        &self,
        url: &str,
        host: &HostKey,
        total: u64,
        temp: &Path,
    ) -> Result<StorageWriter, DownloadError> {
        let settings = self.engine.settings();
        let budget = self.engine.budget();
        let count = chunk_count(
            total,
            settings.target_chunk_size,
            budget.max_per_host(),
            budget.available_global(),
        );
        let mut plan = ChunkPlan::new(total, count);
        self.progress.set_chunk_count(plan.len());
        self.log(format_args!(
            "{} bytes in {} chunks from {}",
            total,
            plan.len(),
            host
        ));

        let writer = finish::create_temp(temp, Some(total)).await?;

        // Cancelling the scope stops siblings without touching the task token.
        let scope = self.cancel.child_token();
        let fetcher = ChunkFetcher::new(
            url,
            self.engine.user_agent(),
            writer.clone(),
            settings.retry,
            scope.clone(),
            Arc::clone(&self.progress),
        );

        let mut set: JoinSet<ChunkOutcome> = JoinSet::new();
        for chunk in plan.chunks().to_vec() {
            let index = chunk.index;
            let budget = budget.clone();
            let host = host.clone();
            let fetcher = fetcher.clone();
            let scope = scope.clone();
            set.spawn(async move {
                match budget.acquire_cancellable(&host, &scope).await {
                    Some(token) => fetcher.fetch_range(&chunk, token).await,
                    None => ChunkOutcome::cancelled(chunk.index),
                }
            });
            if let Some(c) = plan.chunk_mut(index) {
                c.status = ChunkStatus::Active;
            }
        }

        let mut first_error: Option<DownloadError> = None;
        let mut fallback = false;
        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // A panicked chunk task: blame the first chunk still active.
                    let index = plan
                        .chunks()
                        .iter()
                        .find(|c| c.status == ChunkStatus::Active)
                        .map_or(0, |c| c.index);
                    ChunkOutcome {
                        index,
                        attempts: 0,
                        written: 0,
                        result: Err(FetchError::Worker(e.to_string())),
                    }
                }
            };

            let index = outcome.index;
            if let Some(c) = plan.chunk_mut(index) {
                c.attempts = outcome.attempts;
                c.status = if outcome.result.is_ok() {
                    ChunkStatus::Done
                } else {
                    ChunkStatus::Failed
                };
            }

            match outcome.result {
                Ok(()) => {
                    tracing::trace!(chunk = index, attempts = outcome.attempts, "chunk done");
                }
                Err(FetchError::Cancelled) => {}
                Err(e) if e.is_range_fallback() => {
                    if first_error.is_none() && !fallback {
                        tracing::debug!(chunk = index, error = %e, "ranged fetch rejected");
                        fallback = true;
                        scope.cancel();
                    }
                }
                Err(e) => {
                    if first_error.is_none() && !fallback {
                        tracing::debug!(
                            chunk = index,
                            attempts = outcome.attempts,
                            error = %e,
                            "chunk failed, cancelling siblings"
                        );
                        first_error = Some(DownloadError::from_fetch(index, e));
                        scope.cancel();
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if fallback {
            return Err(DownloadError::RangeUnsupported);
        }
        if !plan.all_done() {
            // Only reachable when every failure was a cancellation.
            return Err(DownloadError::Cancelled);
        }
        Ok(writer)
    }
}
