//! Single-stream mode: one connection for the whole body.

use std::path::Path;
use std::sync::Arc;

use super::{finish, Downloader};
use crate::error::DownloadError;
use crate::fetcher::ChunkFetcher;
use crate::host::HostKey;
use crate::storage::StorageWriter;

impl Downloader {
    /// Stream the body into a fresh temp file. Returns the writer and, when
    /// the size was not known up front, the length to cut the file to.
    pub(super) async fn download_single(
        &self,
        url: &str,
        host: &HostKey,
        expected: Option<u64>,
        temp: &Path,
    ) -> Result<(StorageWriter, Option<u64>), DownloadError> {
        self.progress.set_chunk_count(1);
        let writer = finish::create_temp(temp, expected).await?;

        let token = self
            .engine
            .budget()
            .acquire_cancellable(host, &self.cancel)
            .await
            .ok_or(DownloadError::Cancelled)?;

        let fetcher = ChunkFetcher::new(
            url,
            self.engine.user_agent(),
            writer.clone(),
            self.engine.settings().retry,
            self.cancel.clone(),
            Arc::clone(&self.progress),
        );
        let outcome = fetcher.fetch_stream(expected, token).await;
        match outcome.result {
            Ok(()) => {
                self.log(format_args!(
                    "stream finished: {} bytes in {} attempt(s)",
                    outcome.written, outcome.attempts
                ));
                let cut_to = expected.is_none().then_some(outcome.written);
                Ok((writer, cut_to))
            }
            Err(e) => Err(DownloadError::from_fetch(0, e)),
        }
    }
}
