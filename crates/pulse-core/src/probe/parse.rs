//! Parse HTTP response header lines collected from libcurl.

/// `Content-Range: bytes start-end/total` (end inclusive, total may be `*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

/// Headers of the final response (after redirects) that matter for downloading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: Option<u32>,
    pub content_length: Option<u64>,
    /// `Some(true)` for `Accept-Ranges: bytes`, `Some(false)` for `none` or
    /// another unit, `None` when the header is absent.
    pub accept_ranges: Option<bool>,
    pub content_range: Option<ContentRange>,
    pub content_disposition: Option<String>,
}

/// Parse collected header lines. A status line (`HTTP/...`) starts a new
/// response, so only the last response of a redirect chain is kept.
pub fn parse_response_head(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            head = ResponseHead {
                status: line.split_whitespace().nth(1).and_then(|c| c.parse().ok()),
                ..ResponseHead::default()
            };
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            head.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            head.accept_ranges = Some(value.eq_ignore_ascii_case("bytes"));
        } else if name.eq_ignore_ascii_case("content-range") {
            head.content_range = parse_content_range(value);
        } else if name.eq_ignore_ascii_case("content-disposition") {
            head.content_disposition = Some(value.to_string());
        }
    }

    head
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange { start, end, total })
}
