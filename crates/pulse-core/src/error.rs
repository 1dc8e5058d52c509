//! Error taxonomy for the download engine.

use std::io;
use thiserror::Error;

/// Failure of one transfer attempt (a chunk range or the single stream).
///
/// Kept separate from [`DownloadError`] so the retry policy can classify it
/// before it is surfaced.
#[derive(Debug, Error)]
pub enum FetchError {
    /// libcurl reported an error (timeout, connection reset, DNS, ...).
    #[error("{0}")]
    Transport(#[from] curl::Error),
    /// Response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Server answered a ranged request with the whole body or a different range.
    #[error("server ignored the byte range (HTTP {status})")]
    RangeUnsupported { status: u32 },
    /// Transfer ended before the requested range was complete.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Writing to the temp file failed. Not retried.
    #[error("storage: {0}")]
    Storage(#[source] io::Error),
    #[error("cancelled")]
    Cancelled,
    /// The blocking transfer worker panicked or was aborted.
    #[error("transfer worker failed: {0}")]
    Worker(String),
}

impl FetchError {
    /// True for responses that should make the downloader retry the whole
    /// resource as a single stream: an ignored range, or any 4xx except 429.
    pub fn is_range_fallback(&self) -> bool {
        match self {
            FetchError::RangeUnsupported { .. } => true,
            FetchError::Http(code) => (400..500).contains(code) && *code != 429,
            _ => false,
        }
    }
}

/// Terminal failure of a download task.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The metadata resolver could not produce a direct URL.
    #[error("resolution failed: {0}")]
    Resolution(String),
    /// Size / range support could not be learned.
    #[error("probe failed: {0}")]
    Probe(String),
    /// Ranged retrieval is not available; the downloader falls back to one stream.
    #[error("ranged retrieval unsupported")]
    RangeUnsupported,
    /// A chunk (or the single stream) failed after exhausting its retries.
    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: FetchError,
    },
    #[error("{op}: {source}")]
    Filesystem {
        op: String,
        #[source]
        source: io::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn filesystem(op: impl Into<String>, source: io::Error) -> Self {
        DownloadError::Filesystem {
            op: op.into(),
            source,
        }
    }

    /// Wrap a transfer failure. Cancellation and storage failures keep their
    /// own category instead of being reported as a chunk error.
    pub fn from_fetch(index: usize, err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => DownloadError::Cancelled,
            FetchError::Storage(source) => DownloadError::filesystem("write temp file", source),
            other => DownloadError::Chunk { index, source: other },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}
