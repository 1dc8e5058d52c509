//! Minimal HTTP/1.1 server that supports HEAD and Range GET for integration tests.
//!
//! Serves a single static body on every path. Behaviour knobs cover servers
//! that block HEAD, ignore ranges, drop a connection mid-body, answer slowly,
//! fail every request, or fail only ranges past the start of the body. Every
//! request is recorded.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Send `Accept-Ranges: bytes` (independently of whether ranges work).
    pub advertise_ranges: bool,
    /// Close the first non-probe ranged GET after this many body bytes.
    pub truncate_first_ranged_get_after: Option<usize>,
    /// Send the body in 4 KiB pieces with this pause between them.
    pub piece_delay: Option<Duration>,
    /// Answer every request with this status and no body.
    pub status_override: Option<u16>,
    /// Answer ranged GETs that start past byte 0 with this status.
    pub fail_ranges_past_start: Option<u16>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            truncate_first_ranged_get_after: None,
            piece_delay: None,
            status_override: None,
            fail_ranges_past_start: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Inclusive `(start, end)` from `Range: bytes=start-end`.
    pub range: Option<(u64, u64)>,
}

struct Shared {
    body: Vec<u8>,
    opts: RangeServerOptions,
    requests: Mutex<Vec<RecordedRequest>>,
    truncated_once: AtomicBool,
    truncated_range: Mutex<Option<(u64, u64)>>,
}

pub struct RangeServer {
    base: String,
    shared: Arc<Shared>,
}

impl RangeServer {
    /// URL of `path` on this server (`path` without leading slash).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// Ranged GETs other than the `0-0` probe.
    pub fn ranged_gets(&self) -> Vec<(u64, u64)> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .filter_map(|r| r.range)
            .filter(|&r| r != (0, 0))
            .collect()
    }

    /// Range of the GET that was cut short, if any.
    pub fn truncated_range(&self) -> Option<(u64, u64)> {
        *self.shared.truncated_range.lock().unwrap()
    }
}

/// Starts a server in a background thread serving `body`. The server runs
/// until the process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let shared = Arc::new(Shared {
        body,
        opts,
        requests: Mutex::new(Vec::new()),
        truncated_once: AtomicBool::new(false),
        truncated_range: Mutex::new(None),
    });
    let server_shared = Arc::clone(&shared);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let shared = Arc::clone(&server_shared);
            thread::spawn(move || handle(stream, &shared));
        }
    });
    RangeServer {
        base: format!("http://127.0.0.1:{}/", port),
        shared,
    }
}

fn handle(mut stream: TcpStream, shared: &Shared) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let parsed = parse_request(request);
    shared.requests.lock().unwrap().push(parsed.clone());

    let opts = shared.opts;
    let body = &shared.body[..];
    let total = body.len() as u64;

    let failing_range = parsed.method == "GET" && parsed.range.is_some_and(|(start, _)| start > 0);
    if let Some(code) = opts.status_override.or(opts.fail_ranges_past_start.filter(|_| failing_range)) {
        let response = format!(
            "HTTP/1.1 {} Test Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            code
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    let accept_ranges = if opts.advertise_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if parsed.method == "HEAD" {
        if !opts.head_allowed {
            let _ = stream.write_all(
                b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
            total, accept_ranges
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if parsed.method != "GET" {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let (status, content_range, slice) = match parsed.range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start >= total || start > end_incl {
                (
                    "416 Range Not Satisfiable",
                    Some(format!("bytes */{}", total)),
                    &body[0..0],
                )
            } else {
                let slice = &body[start as usize..=end_incl as usize];
                (
                    "206 Partial Content",
                    Some(format!("bytes {}-{}/{}", start, end_incl, total)),
                    slice,
                )
            }
        }
        None => ("200 OK", None, body),
    };

    let content_range = content_range
        .map(|v| format!("Content-Range: {}\r\n", v))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        content_range,
        accept_ranges
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }

    let mut to_send = slice;
    if let (Some(cut), Some(range)) = (opts.truncate_first_ranged_get_after, parsed.range) {
        let is_probe = range == (0, 0);
        if !is_probe
            && status.starts_with("206")
            && cut < slice.len()
            && !shared.truncated_once.swap(true, Ordering::SeqCst)
        {
            *shared.truncated_range.lock().unwrap() = Some(range);
            to_send = &slice[..cut];
        }
    }

    match opts.piece_delay {
        Some(delay) => {
            for piece in to_send.chunks(4096) {
                if stream.write_all(piece).is_err() {
                    return;
                }
                thread::sleep(delay);
            }
        }
        None => {
            let _ = stream.write_all(to_send);
        }
    }
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
}

fn parse_request(request: &str) -> RecordedRequest {
    let mut lines = request.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("").to_ascii_uppercase();
    let path = first.next().unwrap_or("/").to_string();
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let value = value.trim();
        if let Some(spec) = value.strip_prefix("bytes=") {
            if let Some((a, b)) = spec.split_once('-') {
                let start = a.trim().parse::<u64>().unwrap_or(0);
                let end = b.trim();
                let end_incl = if end.is_empty() {
                    u64::MAX
                } else {
                    end.parse::<u64>().unwrap_or(0)
                };
                range = Some((start, end_incl));
            }
        }
    }
    RecordedRequest {
        method,
        path,
        range,
    }
}
