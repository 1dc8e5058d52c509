use std::path::PathBuf;

/// What to download and where. Immutable once submitted to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Opaque id; a UUID v4 unless the submitter picks one.
    pub id: String,
    pub url: String,
    pub output_dir: PathBuf,
    /// Requested filename; derived from the response when absent.
    pub filename: Option<String>,
    /// Quality hint for resolvers (e.g. `720p`).
    pub quality: Option<String>,
    /// Log this task's progress at info level instead of debug.
    pub verbose: bool,
}

impl TaskDescriptor {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            output_dir: output_dir.into(),
            filename: None,
            quality: None,
            verbose: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
