//! Hosted-video resolution policy.
//!
//! Talking to the hosting site is left to a [`MediaCatalog`]. This module
//! owns the selection rules: only progressive formats (audio and video in one
//! stream) are eligible; the first whose quality label contains the hint
//! wins, otherwise the highest bitrate; the file is named after the title.

use std::collections::HashSet;

use super::{ResolvedSource, Resolver};
use crate::url_model::{ensure_extension, sanitize_filename};

/// One downloadable rendition of a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub url: String,
    /// Human label such as `720p` or `1080p60`.
    pub quality_label: String,
    pub mime_type: String,
    pub bitrate: u64,
    pub audio_channels: u32,
    pub width: u32,
}

impl MediaFormat {
    /// Carries both audio and video.
    pub fn is_progressive(&self) -> bool {
        self.audio_channels > 0 && self.width > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub formats: Vec<MediaFormat>,
}

/// Site client: fetches title and formats for a video page. May block.
pub trait MediaCatalog: Send + Sync {
    fn fetch(&self, url: &str) -> anyhow::Result<MediaInfo>;
}

/// Recognises watch and short-link URLs of the supported hosting site.
pub fn is_hosted_video_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
}

/// Pick a format for `quality`. See the module docs for the rules.
pub fn select_format<'a>(formats: &'a [MediaFormat], quality: Option<&str>) -> Option<&'a MediaFormat> {
    let progressive: Vec<&MediaFormat> = formats.iter().filter(|f| f.is_progressive()).collect();

    if let Some(hint) = quality.map(str::trim).filter(|q| !q.is_empty()) {
        let hint = hint.to_lowercase();
        if let Some(found) = progressive
            .iter()
            .copied()
            .find(|f| f.quality_label.to_lowercase().contains(&hint))
        {
            return Some(found);
        }
        tracing::info!(quality = %hint, "requested quality unavailable, using highest bitrate");
    }

    // Ties keep the earlier format.
    progressive
        .into_iter()
        .reduce(|best, f| if f.bitrate > best.bitrate { f } else { best })
}

/// Distinct quality labels of the progressive formats, in catalog order.
pub fn available_qualities(formats: &[MediaFormat]) -> Vec<String> {
    let mut seen = HashSet::new();
    formats
        .iter()
        .filter(|f| f.is_progressive() && !f.quality_label.is_empty())
        .filter(|f| seen.insert(f.quality_label.clone()))
        .map(|f| f.quality_label.clone())
        .collect()
}

/// [`Resolver`] for hosted videos backed by a [`MediaCatalog`].
pub struct HostedMediaResolver<C> {
    catalog: C,
}

impl<C: MediaCatalog> HostedMediaResolver<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }
}

impl<C: MediaCatalog> Resolver for HostedMediaResolver<C> {
    fn name(&self) -> &str {
        "hosted-media"
    }

    fn handles(&self, url: &str) -> bool {
        is_hosted_video_url(url)
    }

    fn resolve(&self, url: &str, quality: Option<&str>) -> anyhow::Result<ResolvedSource> {
        let info = self.catalog.fetch(url)?;
        tracing::debug!(url, qualities = ?available_qualities(&info.formats), "hosted video formats");
        let format = select_format(&info.formats, quality)
            .ok_or_else(|| anyhow::anyhow!("no format with both audio and video for {url}"))?;

        let title = sanitize_filename(&info.title);
        let filename = (!title.is_empty()).then(|| ensure_extension(&title, "mp4"));
        tracing::debug!(url, quality = %format.quality_label, filename = ?filename, "resolved hosted video");

        Ok(ResolvedSource {
            url: format.url.clone(),
            filename,
        })
    }
}
