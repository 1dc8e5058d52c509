use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::budget::BudgetPolicy;
use crate::paths;
use crate::retry::RetryPolicy;

/// Retry policy parameters (optional `[retry]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per chunk (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// `[general]` section: admission and presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Tasks allowed to download at once. Values <= 0 are treated as 1.
    pub max_concurrent_downloads: i64,
    /// Where downloads land when the submitter gives no directory.
    pub default_download_dir: Option<PathBuf>,
    /// Minimum spacing between progress events of one task, in milliseconds.
    pub progress_interval_ms: u64,
    /// Finished tasks kept for listing; older ones are forgotten first.
    pub retain_finished_tasks: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            default_download_dir: None,
            progress_interval_ms: 200,
            retain_finished_tasks: 100,
        }
    }
}

/// `[connections]` section: the connection budget policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    pub max_connections_per_host: i64,
    pub max_global_connections: i64,
    pub user_agent: String,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 8,
            max_global_connections: 32,
            user_agent: default_user_agent(),
        }
    }
}

/// `[chunking]` section: when and how finely to split ranged downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Preferred chunk length in bytes; the chunk count is derived from it.
    pub target_chunk_size: u64,
    /// Resources at or below this size are fetched with a single stream.
    pub min_chunk_threshold: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chunk_size: 8 * 1024 * 1024,
            min_chunk_threshold: 2 * 1024 * 1024,
        }
    }
}

/// `[resolver]` section: the external program used for hosted-video pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Extractor printing page metadata as JSON (e.g. `yt-dlp`). Unset means
    /// hosted-video URLs are fetched as is.
    pub extractor_command: Option<String>,
    /// Arguments placed before the URL.
    pub extractor_args: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            extractor_command: None,
            extractor_args: vec!["-J".to_string(), "--no-warnings".to_string()],
        }
    }
}

/// Global configuration loaded from `~/.config/pulse/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl PulseConfig {
    /// Admission limit for the worker pool, corrected to at least 1.
    pub fn max_concurrent_downloads(&self) -> usize {
        at_least_one(self.general.max_concurrent_downloads)
    }

    pub fn budget_policy(&self) -> BudgetPolicy {
        BudgetPolicy::new(
            self.connections.max_connections_per_host,
            self.connections.max_global_connections,
            self.connections.user_agent.clone(),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryPolicy::from_config)
            .unwrap_or_default()
    }
}

/// Clamp a signed config value into a usable, non-zero count.
pub(crate) fn at_least_one(value: i64) -> usize {
    if value <= 0 {
        1
    } else {
        usize::try_from(value).unwrap_or(usize::MAX)
    }
}

fn default_user_agent() -> String {
    format!("pulse/{}", env!("CARGO_PKG_VERSION"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(paths::pulse_dir()?.join("config.toml"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PulseConfig> {
    load_or_init_at(&config_path()?)
}

/// Like [`load_or_init`] but for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<PulseConfig> {
    if !path.exists() {
        let default_cfg = PulseConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: PulseConfig =
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
    Ok(cfg)
}
