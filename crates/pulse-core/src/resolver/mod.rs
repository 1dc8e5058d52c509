//! Resolver interface for turning hosting-page URLs into direct URLs.
//!
//! The downloader only depends on this trait and does not know about any
//! specific site. A URL no registered resolver claims is downloaded as is.

mod extractor;
mod media;

pub use extractor::{parse_extractor_output, ExtractorCatalog};
pub use media::{
    available_qualities, is_hosted_video_url, select_format, HostedMediaResolver, MediaCatalog,
    MediaFormat, MediaInfo,
};

use std::fmt;
use std::sync::Arc;

/// Direct URL plus an optional filename suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub url: String,
    pub filename: Option<String>,
}

impl ResolvedSource {
    /// A URL that needs no resolution.
    pub fn direct(url: &str) -> Self {
        Self {
            url: url.to_string(),
            filename: None,
        }
    }
}

/// Implemented by resolver plugins. `resolve` may block (network calls);
/// the downloader runs it on the blocking pool.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this resolver should handle `url`.
    fn handles(&self, url: &str) -> bool;

    /// Produce the direct URL. An unknown `quality` hint falls back to the
    /// resolver's default choice rather than failing.
    fn resolve(&self, url: &str, quality: Option<&str>) -> anyhow::Result<ResolvedSource>;
}

/// Ordered list of resolvers; the first that handles a URL wins.
#[derive(Clone, Default)]
pub struct ResolverSet {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ResolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.push(resolver);
    }

    pub fn with(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.register(resolver);
        self
    }

    pub fn find(&self, url: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.iter().find(|r| r.handles(url)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ResolverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Prefix(&'static str);

    impl Resolver for Prefix {
        fn name(&self) -> &str {
            self.0
        }

        fn handles(&self, url: &str) -> bool {
            url.starts_with(self.0)
        }

        fn resolve(&self, url: &str, _quality: Option<&str>) -> anyhow::Result<ResolvedSource> {
            Ok(ResolvedSource {
                url: format!("{url}/direct"),
                filename: Some(self.0.to_string()),
            })
        }
    }

    #[test]
    fn first_matching_resolver_wins() {
        let set = ResolverSet::new()
            .with(Arc::new(Prefix("https://a")))
            .with(Arc::new(Prefix("https://")));
        assert_eq!(set.find("https://a.example/x").unwrap().name(), "https://a");
        assert_eq!(set.find("https://b.example/x").unwrap().name(), "https://");
        assert!(set.find("http://c.example/x").is_none());
        assert_eq!(format!("{set:?}"), "[\"https://a\", \"https://\"]");
    }

    #[test]
    fn direct_source_keeps_url() {
        let s = ResolvedSource::direct("http://example.com/f.bin");
        assert_eq!(s.url, "http://example.com/f.bin");
        assert!(s.filename.is_none());
    }
}
