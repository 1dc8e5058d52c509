//! Per-directory filename reservations.
//!
//! Picking a final name and claiming it happen under one lock, so two tasks
//! that ask for the same name in the same directory always end up with
//! distinct names (`name.ext`, `name (1).ext`, `name (2).ext`, ...). A name is
//! taken if it is reserved by a live task or exists on disk, either as the
//! final file or as its `.part` temp file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage::{temp_path, TEMP_SUFFIX};
use crate::url_model::NAME_MAX;

/// Longest final name whose temp file still fits in one path component.
const MAX_FINAL_NAME: usize = NAME_MAX - TEMP_SUFFIX.len();

type Table = HashMap<PathBuf, HashSet<String>>;

/// Shared reservation table. Cheap to clone; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct FilenameReservations {
    table: Arc<Mutex<Table>>,
}

impl FilenameReservations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the first free variant of `requested` inside `dir`.
    pub fn reserve(&self, dir: &Path, requested: &str) -> ReservedName {
        let mut table = self.lock();
        let taken = table.entry(dir.to_path_buf()).or_default();

        let mut n = 0u32;
        let name = loop {
            let candidate = disambiguate(requested, n);
            let on_disk = dir.join(&candidate);
            if !taken.contains(&candidate) && !on_disk.exists() && !temp_path(&on_disk).exists() {
                break candidate;
            }
            n += 1;
        };
        taken.insert(name.clone());
        if n > 0 {
            tracing::debug!(dir = %dir.display(), requested, chosen = %name, "filename collision");
        }

        ReservedName {
            owner: self.clone(),
            dir: dir.to_path_buf(),
            name,
        }
    }

    /// Number of live reservations in `dir`.
    pub fn reserved_in(&self, dir: &Path) -> usize {
        self.lock().get(dir).map_or(0, HashSet::len)
    }

    fn release(&self, dir: &Path, name: &str) {
        let mut table = self.lock();
        if let Some(set) = table.get_mut(dir) {
            set.remove(name);
            if set.is_empty() {
                table.remove(dir);
            }
        }
    }
}

/// `n == 0` → `name`; otherwise `stem (n).ext`. Only the last extension is
/// kept apart, so `a.tar.gz` becomes `a.tar (1).gz`. The stem is shortened
/// when needed so the name plus its `.part` suffix fits in `NAME_MAX` bytes.
pub fn disambiguate(name: &str, n: u32) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_FINAL_NAME / 2 => name.split_at(dot),
        _ => (name, ""),
    };
    let counter = if n == 0 { String::new() } else { format!(" ({n})") };
    let room = MAX_FINAL_NAME.saturating_sub(counter.len() + ext.len());
    format!("{}{}{}", truncate_at_boundary(stem, room), counter, ext)
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A claimed filename. Released from the table when dropped; by then the
/// file is either on disk under this name or the task gave up on it.
#[derive(Debug)]
pub struct ReservedName {
    owner: FilenameReservations,
    dir: PathBuf,
    name: String,
}

impl ReservedName {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final destination path.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Temp file path used while downloading.
    pub fn temp_path(&self) -> PathBuf {
        temp_path(&self.path())
    }
}

impl Drop for ReservedName {
    fn drop(&mut self) {
        self.owner.release(&self.dir, &self.name);
    }
}
