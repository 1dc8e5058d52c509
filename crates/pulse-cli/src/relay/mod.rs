//! HTTP relay: accepts downloads from browser extensions and exposes progress.
//!
//! Routes: `GET /health`, `POST /download`, `GET /downloads` and
//! `POST /downloads/:id/cancel`. Every response carries permissive CORS
//! headers and `OPTIONS` preflights are answered directly. With a static
//! directory, any other path is served from it, and paths with no file fall
//! back to its `index.html` for client-side routing.

mod routes;

use anyhow::{bail, Context, Result};
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use pulse_core::{ProgressSnapshot, TaskStatus, WorkerPool};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::services::{ServeDir, ServeFile};

/// First port tried when none is given.
pub(crate) const DEFAULT_PORT: u16 = 8080;
/// Ports tried after [`DEFAULT_PORT`] before giving up.
const PORT_SEARCH_SPAN: u16 = 100;

#[derive(Clone)]
pub(crate) struct RelayState {
    pub(crate) pool: WorkerPool,
    pub(crate) port: u16,
    /// Requests without a path download here; relative paths are joined onto it.
    pub(crate) base_dir: Arc<PathBuf>,
    pub(crate) verbose: bool,
    /// Web UI assets served on every non-API path.
    pub(crate) static_dir: Option<Arc<PathBuf>>,
}

pub(crate) fn build_router(state: RelayState) -> Router {
    let mut router = Router::new()
        .route("/health", get(routes::health))
        .route("/download", post(routes::create_download))
        .route("/downloads", get(routes::list_downloads))
        .route("/downloads/:id/cancel", post(routes::cancel_download));
    if let Some(dir) = state.static_dir.as_deref() {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }
    router.layer(from_fn(routes::cors)).with_state(state)
}

/// Bind `host:port`, or the first free port from [`DEFAULT_PORT`] upward.
pub(crate) async fn bind(host: &str, port: Option<u16>) -> Result<(TcpListener, u16)> {
    if let Some(port) = port {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("listen on {}:{}", host, port))?;
        let bound = listener.local_addr()?.port();
        return Ok((listener, bound));
    }
    for candidate in DEFAULT_PORT..DEFAULT_PORT.saturating_add(PORT_SEARCH_SPAN) {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => return Ok((listener, candidate)),
            Err(e) => tracing::debug!(port = candidate, error = %e, "port unavailable"),
        }
    }
    bail!(
        "no free port on {} between {} and {}",
        host,
        DEFAULT_PORT,
        DEFAULT_PORT.saturating_add(PORT_SEARCH_SPAN - 1)
    )
}

/// The active port, published for extension discovery and removed on drop.
pub(crate) struct PortFile {
    path: PathBuf,
}

impl PortFile {
    pub(crate) fn write(path: PathBuf, port: u16) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, port.to_string())
            .with_context(|| format!("write port file {}", path.display()))?;
        tracing::debug!(path = %path.display(), port, "port file written");
        Ok(Self { path })
    }
}

impl Drop for PortFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "could not remove port file");
        }
    }
}

/// Log every task's status transitions from the pool bus.
pub(crate) async fn log_events(mut rx: broadcast::Receiver<ProgressSnapshot>) {
    let mut last: HashMap<String, TaskStatus> = HashMap::new();
    loop {
        let snap = match rx.recv().await {
            Ok(snap) => snap,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "relay event log lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if last.get(&snap.id) == Some(&snap.status) {
            continue;
        }
        match snap.status {
            TaskStatus::Done => tracing::info!(
                task = %snap.id,
                file = ?snap.final_path,
                elapsed = snap.elapsed_secs,
                "completed"
            ),
            TaskStatus::Error => tracing::warn!(
                task = %snap.id,
                url = %snap.url,
                error = snap.error.as_deref().unwrap_or(""),
                "failed"
            ),
            status => tracing::info!(task = %snap.id, url = %snap.url, %status, "status changed"),
        }
        if snap.is_terminal() {
            last.remove(&snap.id);
        } else {
            last.insert(snap.id.clone(), snap.status);
        }
    }
}
