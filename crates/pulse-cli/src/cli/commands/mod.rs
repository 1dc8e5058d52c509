//! CLI command handlers, one per file.

mod get;
mod server;

pub use get::{run_get, GetArgs};
pub use server::{run_server, ServerArgs};

use pulse_core::config::PulseConfig;
use pulse_core::resolver::{is_hosted_video_url, ExtractorCatalog, HostedMediaResolver};
use pulse_core::{Engine, EngineSettings, ResolverSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Engine shared by every command: settings from config, plus the hosted-video
/// resolver when an extractor command is configured.
pub(crate) fn build_engine(cfg: &PulseConfig) -> Arc<Engine> {
    let mut resolvers = ResolverSet::new();
    if let Some(catalog) = ExtractorCatalog::from_config(&cfg.resolver) {
        tracing::debug!(command = catalog.command(), "hosted-media extractor registered");
        resolvers.register(Arc::new(HostedMediaResolver::new(catalog)));
    }
    Arc::new(Engine::with_resolvers(EngineSettings::from_config(cfg), resolvers))
}

/// Directory downloads land in when the submitter names none.
pub(crate) fn default_download_dir(cfg: &PulseConfig) -> anyhow::Result<PathBuf> {
    match &cfg.general.default_download_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(std::env::current_dir()?),
    }
}

/// Hosted-video pages need a resolver; without one the page itself is downloaded.
pub(crate) fn warn_if_unresolved(engine: &Engine, url: &str) -> bool {
    if is_hosted_video_url(url) && engine.resolvers().find(url).is_none() {
        tracing::warn!(url, "no hosted-media extractor is registered; fetching the URL as is");
        return true;
    }
    false
}
