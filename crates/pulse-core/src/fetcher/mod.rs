//! Chunk fetching with local retries.
//!
//! A [`ChunkFetcher`] is shared by every transfer of one download. Each call
//! owns one connection token for its whole lifetime, including backoff
//! sleeps, and gives it back on return.

mod transfer;

pub(crate) use transfer::configure_easy;

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::budget::ConnectionToken;
use crate::error::FetchError;
use crate::plan::Chunk;
use crate::progress::ProgressState;
use crate::retry::{classify, RetryDecision, RetryPolicy};
use crate::storage::StorageWriter;
use transfer::{run_transfer, TransferRequest};

/// Result of fetching one chunk (or the single stream, index 0).
#[derive(Debug)]
pub struct ChunkOutcome {
    pub index: usize,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Bytes on disk for this chunk when the fetch ended.
    pub written: u64,
    pub result: Result<(), FetchError>,
}

impl ChunkOutcome {
    pub fn cancelled(index: usize) -> Self {
        Self {
            index,
            attempts: 0,
            written: 0,
            result: Err(FetchError::Cancelled),
        }
    }
}

/// How transfer byte counts feed the task's `BytesDone`.
#[derive(Clone)]
enum Tally {
    /// Every byte is new (ranged: retries only fetch the remainder).
    Add,
    /// A restarted stream rewrites bytes it already counted; only progress
    /// beyond the high-water mark is added.
    HighWater(Arc<AtomicU64>),
}

#[derive(Clone)]
pub struct ChunkFetcher {
    url: Arc<str>,
    user_agent: Arc<str>,
    storage: StorageWriter,
    retry: RetryPolicy,
    cancel: CancellationToken,
    progress: Arc<ProgressState>,
}

impl ChunkFetcher {
    pub fn new(
        url: &str,
        user_agent: &str,
        storage: StorageWriter,
        retry: RetryPolicy,
        cancel: CancellationToken,
        progress: Arc<ProgressState>,
    ) -> Self {
        Self {
            url: Arc::from(url),
            user_agent: Arc::from(user_agent),
            storage,
            retry,
            cancel,
            progress,
        }
    }

    /// Fetch exactly `[chunk.offset, chunk.end())` into the temp file.
    ///
    /// Transient failures are retried with backoff; each retry requests only
    /// the bytes not yet written. Range-fallback errors (see
    /// [`FetchError::is_range_fallback`]) are returned without retrying.
    pub async fn fetch_range(&self, chunk: &Chunk, token: ConnectionToken) -> ChunkOutcome {
        let mut written = 0u64;
        let mut attempt = 1u32;
        loop {
            let start = chunk.offset + written;
            let (got, result) = self
                .attempt(Some((start, chunk.end())), start, Some(chunk.end() - start), Tally::Add)
                .await;
            written += got;

            let err = match result {
                Err(e) if written < chunk.length || matches!(e, FetchError::Cancelled) => e,
                // Every byte of the range is on disk; a late transport error changes nothing.
                _ => {
                    token.release();
                    return ChunkOutcome {
                        index: chunk.index,
                        attempts: attempt,
                        written,
                        result: Ok(()),
                    };
                }
            };
            if let Some(delay) = self.retry_delay(attempt, &err) {
                tracing::debug!(
                    chunk = chunk.index,
                    attempt,
                    written,
                    remaining = chunk.length - written,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying chunk remainder"
                );
                if self.sleep_or_cancel(delay).await {
                    attempt += 1;
                    continue;
                }
                return ChunkOutcome {
                    index: chunk.index,
                    attempts: attempt,
                    written,
                    result: Err(FetchError::Cancelled),
                };
            }
            drop(token);
            return ChunkOutcome {
                index: chunk.index,
                attempts: attempt,
                written,
                result: Err(err),
            };
        }
    }

    /// Stream the whole body from offset 0. A retry restarts the body from
    /// the beginning; `BytesDone` never moves backwards.
    pub async fn fetch_stream(&self, expected: Option<u64>, token: ConnectionToken) -> ChunkOutcome {
        let high_water = Arc::new(AtomicU64::new(self.progress.bytes_done()));
        let mut attempt = 1u32;
        loop {
            let (got, result) = self
                .attempt(None, 0, expected, Tally::HighWater(Arc::clone(&high_water)))
                .await;

            let err = match result {
                Ok(()) => {
                    token.release();
                    return ChunkOutcome {
                        index: 0,
                        attempts: attempt,
                        written: got,
                        result: Ok(()),
                    };
                }
                Err(e) => e,
            };
            if let Some(delay) = self.retry_delay(attempt, &err) {
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "restarting stream");
                if self.sleep_or_cancel(delay).await {
                    attempt += 1;
                    continue;
                }
                return ChunkOutcome {
                    index: 0,
                    attempts: attempt,
                    written: got,
                    result: Err(FetchError::Cancelled),
                };
            }
            return ChunkOutcome {
                index: 0,
                attempts: attempt,
                written: got,
                result: Err(err),
            };
        }
    }

    fn retry_delay(&self, attempt: u32, err: &FetchError) -> Option<std::time::Duration> {
        if self.cancel.is_cancelled() || matches!(err, FetchError::Cancelled) {
            return None;
        }
        match self.retry.decide(attempt, classify(err)) {
            RetryDecision::RetryAfter(d) => Some(d),
            RetryDecision::NoRetry => None,
        }
    }

    /// Returns false if cancelled while waiting.
    async fn sleep_or_cancel(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// One blocking transfer on the blocking pool. Returns bytes written by
    /// this attempt alongside its result.
    async fn attempt(
        &self,
        range: Option<(u64, u64)>,
        write_offset: u64,
        expected: Option<u64>,
        tally: Tally,
    ) -> (u64, Result<(), FetchError>) {
        let this = self.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let written = Cell::new(0u64);
            let mut position = 0u64;
            let progress = Arc::clone(&this.progress);
            let mut on_write = |n: u64| match &tally {
                Tally::Add => progress.add_bytes(n),
                Tally::HighWater(high) => {
                    position += n;
                    let previous = high.fetch_max(position, Ordering::Relaxed);
                    if position > previous {
                        progress.add_bytes(position - previous);
                    }
                }
            };
            let req = TransferRequest {
                url: &this.url,
                user_agent: &this.user_agent,
                range,
                write_offset,
                expected,
                storage: &this.storage,
                cancel: &this.cancel,
            };
            let result = run_transfer(&req, &written, &mut on_write);
            (written.get(), result)
        })
        .await;

        match joined {
            Ok(pair) => pair,
            Err(e) => (0, Err(FetchError::Worker(e.to_string()))),
        }
    }
}
