//! Temp file creation and the Completing step, on the blocking pool.

use std::path::{Path, PathBuf};

use crate::error::DownloadError;
use crate::storage::{StorageWriter, StorageWriterBuilder};

/// Create (or truncate) the temp file, preallocating when the size is known.
pub(super) async fn create_temp(temp: &Path, size: Option<u64>) -> Result<StorageWriter, DownloadError> {
    let temp = temp.to_path_buf();
    blocking("create temp file", move || {
        let mut builder = StorageWriterBuilder::create(&temp)?;
        if let Some(size) = size {
            builder.preallocate(size)?;
        }
        Ok(builder.build())
    })
    .await
}

/// Cut to `final_len` if given, sync, then atomically rename into place.
pub(super) async fn finalize(
    writer: StorageWriter,
    final_path: &Path,
    final_len: Option<u64>,
) -> Result<(), DownloadError> {
    let final_path: PathBuf = final_path.to_path_buf();
    blocking("finalize download", move || {
        if let Some(len) = final_len {
            writer.truncate(len)?;
        }
        writer.sync()?;
        writer.finalize(&final_path)
    })
    .await
}

async fn blocking<T, F>(op: &'static str, f: F) -> Result<T, DownloadError>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| DownloadError::filesystem(op, e)),
        Err(e) => Err(DownloadError::filesystem(
            op,
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        )),
    }
}
