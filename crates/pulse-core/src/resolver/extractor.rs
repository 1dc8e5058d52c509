//! [`MediaCatalog`] backed by an external extractor program.
//!
//! The program is run as `<command> <args...> <url>` and must print the
//! page's metadata as one JSON document on stdout, in the shape `yt-dlp -J`
//! produces: a `title` and a `formats` array.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::process::Command;

use super::media::{MediaCatalog, MediaFormat, MediaInfo};
use crate::config::ResolverConfig;

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    url: Option<String>,
    format_note: Option<String>,
    ext: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    /// Total bitrate in kbit/s.
    tbr: Option<f64>,
    acodec: Option<String>,
    vcodec: Option<String>,
    audio_channels: Option<u32>,
}

impl RawFormat {
    fn into_format(self) -> Option<MediaFormat> {
        let url = self.url.filter(|u| !u.is_empty())?;
        let quality_label = match (self.format_note.filter(|n| !n.is_empty()), self.height) {
            (Some(note), _) => note,
            (None, Some(h)) => format!("{h}p"),
            (None, None) => String::new(),
        };
        let audio_channels = match self.acodec.as_deref() {
            Some("none") => 0,
            Some(_) => self.audio_channels.unwrap_or(2),
            None => self.audio_channels.unwrap_or(0),
        };
        let width = match self.vcodec.as_deref() {
            Some("none") => 0,
            _ => self.width.unwrap_or(0),
        };
        Some(MediaFormat {
            url,
            quality_label,
            mime_type: format!("video/{}", self.ext.as_deref().unwrap_or("mp4")),
            bitrate: (self.tbr.unwrap_or(0.0).max(0.0) * 1000.0) as u64,
            audio_channels,
            width,
        })
    }
}

/// Parse the extractor's JSON output. Formats without a URL are skipped.
pub fn parse_extractor_output(bytes: &[u8]) -> Result<MediaInfo> {
    let raw: RawInfo = serde_json::from_slice(bytes).context("parse extractor JSON")?;
    Ok(MediaInfo {
        title: raw.title,
        formats: raw.formats.into_iter().filter_map(RawFormat::into_format).collect(),
    })
}

/// Runs the configured extractor for every lookup.
#[derive(Debug, Clone)]
pub struct ExtractorCatalog {
    command: String,
    args: Vec<String>,
}

impl ExtractorCatalog {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// `None` when no extractor command is configured.
    pub fn from_config(cfg: &ResolverConfig) -> Option<Self> {
        let command = cfg.extractor_command.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        Some(Self::new(command, cfg.extractor_args.clone()))
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl MediaCatalog for ExtractorCatalog {
    fn fetch(&self, url: &str) -> Result<MediaInfo> {
        tracing::debug!(command = %self.command, url, "running media extractor");
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(url)
            .output()
            .with_context(|| format!("run extractor {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("extractor {} failed ({}): {}", self.command, output.status, stderr.trim());
        }
        parse_extractor_output(&output.stdout)
    }
}
