//! Disk I/O and file lifecycle.
//!
//! Preallocates temp files (fallocate on Linux when available, else set_len),
//! supports concurrent offset writes (pwrite), and atomic finalize (rename
//! from `.part` to the final name). A [`TempFileGuard`] removes the temp file
//! when a download ends any way other than a successful finalize.

mod builder;
mod writer;

pub use builder::StorageWriterBuilder;
pub use writer::{StorageWriter, TempFileGuard};

use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}
