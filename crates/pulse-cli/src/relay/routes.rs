use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path as FsPath;

use pulse_core::{PoolError, TaskDescriptor};

use super::RelayState;

/// Body of `POST /download`, as sent by the browser extension.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DownloadRequest {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) filename: Option<String>,
    #[serde(default)]
    pub(crate) path: Option<String>,
    #[serde(default)]
    pub(crate) quality: Option<String>,
}

/// Reject requests that could escape the download directory.
pub(crate) fn validate_request(req: &DownloadRequest) -> Result<(), &'static str> {
    if req.url.trim().is_empty() {
        return Err("URL is required");
    }
    let path = req.path.as_deref().unwrap_or("");
    let filename = req.filename.as_deref().unwrap_or("");
    if path.contains("..") || filename.contains("..") {
        return Err("Invalid path");
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err("Invalid filename");
    }
    if FsPath::new(path).is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err("Invalid path");
    }
    Ok(())
}

pub(crate) async fn health(State(state): State<RelayState>) -> Json<Value> {
    Json(json!({ "status": "ok", "port": state.port }))
}

pub(crate) async fn create_download(
    State(state): State<RelayState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e.body_text()))
                .into_response()
        }
    };
    if let Err(msg) = validate_request(&req) {
        tracing::debug!(url = %req.url, reason = msg, "rejected download request");
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }

    let dir = match req.path.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => state.base_dir.join(p),
        None => (*state.base_dir).clone(),
    };
    tracing::debug!(url = %req.url, dir = %dir.display(), quality = ?req.quality, "received download request");
    crate::cli::warn_if_unresolved(state.pool.engine(), req.url.trim());

    let mut task = TaskDescriptor::new(req.url.trim(), dir).with_verbose(state.verbose);
    if let Some(name) = req.filename.filter(|n| !n.is_empty()) {
        task = task.with_filename(name);
    }
    if let Some(q) = req.quality.filter(|q| !q.is_empty()) {
        task = task.with_quality(q);
    }

    match state.pool.add(task) {
        Ok(handle) => Json(json!({
            "status": "queued",
            "message": "Download request received",
            "id": handle.id(),
        }))
        .into_response(),
        Err(e @ PoolError::ShuttingDown) => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

pub(crate) async fn list_downloads(State(state): State<RelayState>) -> Json<Value> {
    Json(json!({ "items": state.pool.snapshots() }))
}

pub(crate) async fn cancel_download(
    State(state): State<RelayState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if state.pool.cancel(&id) {
        tracing::info!(task = %id, "cancel requested over HTTP");
        Ok(Json(json!({ "status": "cancelling", "id": id })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

/// Allow any origin; answer preflight requests directly.
pub(crate) async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str, filename: Option<&str>, path: Option<&str>) -> DownloadRequest {
        DownloadRequest {
            url: url.to_string(),
            filename: filename.map(String::from),
            path: path.map(String::from),
            quality: None,
        }
    }

    #[test]
    fn accepts_plain_requests() {
        assert!(validate_request(&req("https://x.test/a.iso", None, None)).is_ok());
        assert!(validate_request(&req("https://x.test/a.iso", Some("b.iso"), Some("isos/new"))).is_ok());
    }

    #[test]
    fn rejects_empty_url() {
        assert_eq!(validate_request(&req("  ", None, None)), Err("URL is required"));
    }

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        let url = "https://x.test/a";
        assert_eq!(validate_request(&req(url, None, Some("../etc"))), Err("Invalid path"));
        assert_eq!(validate_request(&req(url, Some("..evil"), None)), Err("Invalid path"));
        assert_eq!(validate_request(&req(url, None, Some("/srv/data"))), Err("Invalid path"));
    }

    #[test]
    fn rejects_separators_in_filename() {
        let url = "https://x.test/a";
        assert_eq!(validate_request(&req(url, Some("a/b.bin"), None)), Err("Invalid filename"));
        assert_eq!(validate_request(&req(url, Some("a\\b.bin"), None)), Err("Invalid filename"));
    }
}
