//! HTTP metadata probing: total size and whether byte ranges work.
//!
//! A HEAD request is tried first. When HEAD fails, or does not say whether
//! ranges are accepted, a `Range: bytes=0-0` GET settles it: a 206 with a
//! `Content-Range` total means ranged retrieval works, a 200 means it does
//! not. The GET is abandoned as soon as the body starts.

mod parse;

pub use parse::{parse_content_range, parse_response_head, ContentRange, ResponseHead};

use std::cell::RefCell;
use std::str;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, FetchError};
use crate::fetcher::configure_easy;

/// Upper bound for a whole probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// What the probe learned about the resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total size in bytes, when the server disclosed it.
    pub total_size: Option<u64>,
    pub ranges_supported: bool,
    /// Raw `Content-Disposition` value (filename hint).
    pub content_disposition: Option<String>,
}

#[derive(Clone, Copy)]
enum Method {
    Head,
    FirstByte,
}

fn request(
    url: &str,
    user_agent: &str,
    cancel: &CancellationToken,
    method: Method,
) -> Result<ResponseHead, FetchError> {
    let headers: RefCell<Vec<String>> = RefCell::new(Vec::new());

    let mut easy = curl::easy::Easy::new();
    configure_easy(&mut easy, url, user_agent)?;
    easy.timeout(PROBE_TIMEOUT)?;
    match method {
        Method::Head => easy.nobody(true)?,
        Method::FirstByte => easy.range("0-0")?,
    }

    let result = {
        let mut transfer = easy.transfer();
        transfer.header_function(|line| {
            if let Ok(s) = str::from_utf8(line) {
                headers.borrow_mut().push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        // Headers are all we need; stop at the first body bytes.
        transfer.write_function(|_| Ok(0))?;
        transfer.perform()
    };

    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    match result {
        Ok(()) => {}
        Err(e) if e.is_write_error() => {}
        Err(e) => return Err(FetchError::Transport(e)),
    }

    let head = parse_response_head(&headers.borrow());
    match head.status {
        Some(code) if (200..300).contains(&code) => Ok(head),
        Some(code) => Err(FetchError::Http(code)),
        None => Err(FetchError::Http(0)),
    }
}

fn from_first_byte(get: ResponseHead, head: Option<&ResponseHead>) -> ProbeResult {
    let content_disposition = get
        .content_disposition
        .clone()
        .or_else(|| head.and_then(|h| h.content_disposition.clone()));
    let fallback_size = head.and_then(|h| h.content_length);

    if get.status == Some(206) {
        if let Some(total) = get.content_range.and_then(|cr| cr.total) {
            return ProbeResult {
                total_size: Some(total),
                ranges_supported: true,
                content_disposition,
            };
        }
        // Partial content of unknown total: stream it whole.
        return ProbeResult {
            total_size: fallback_size,
            ranges_supported: false,
            content_disposition,
        };
    }

    ProbeResult {
        total_size: get.content_length.or(fallback_size),
        ranges_supported: false,
        content_disposition,
    }
}

/// Blocking probe; call from `spawn_blocking`.
pub fn probe_blocking(
    url: &str,
    user_agent: &str,
    cancel: &CancellationToken,
) -> Result<ProbeResult, FetchError> {
    let head = match request(url, user_agent, cancel, Method::Head) {
        Ok(h) => Some(h),
        Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
        Err(e) => {
            tracing::debug!(url, error = %e, "HEAD failed, probing with a ranged GET");
            None
        }
    };

    if let Some(h) = &head {
        match (h.accept_ranges, h.content_length) {
            (Some(true), Some(len)) => {
                return Ok(ProbeResult {
                    total_size: Some(len),
                    ranges_supported: true,
                    content_disposition: h.content_disposition.clone(),
                })
            }
            (Some(false), len) => {
                return Ok(ProbeResult {
                    total_size: len,
                    ranges_supported: false,
                    content_disposition: h.content_disposition.clone(),
                })
            }
            _ => {}
        }
    }

    match request(url, user_agent, cancel, Method::FirstByte) {
        Ok(get) => Ok(from_first_byte(get, head.as_ref())),
        Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
        Err(e) => match head {
            // HEAD worked; assume no ranges rather than failing the task.
            Some(h) => {
                tracing::debug!(url, error = %e, "ranged probe failed, assuming no range support");
                Ok(ProbeResult {
                    total_size: h.content_length,
                    ranges_supported: false,
                    content_disposition: h.content_disposition,
                })
            }
            None => Err(e),
        },
    }
}

/// Probe on the blocking pool. Cancellation aborts the in-flight request.
pub async fn probe(
    url: &str,
    user_agent: &str,
    cancel: &CancellationToken,
) -> Result<ProbeResult, DownloadError> {
    let (url, user_agent, token) = (url.to_string(), user_agent.to_string(), cancel.clone());
    let joined = tokio::task::spawn_blocking(move || probe_blocking(&url, &user_agent, &token)).await;
    match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(FetchError::Cancelled)) => Err(DownloadError::Cancelled),
        Ok(Err(e)) => Err(DownloadError::Probe(e.to_string())),
        Err(e) => Err(DownloadError::Probe(format!("probe worker failed: {e}"))),
    }
}
