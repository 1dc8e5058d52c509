//! One blocking libcurl GET that writes its body into the temp file.
//!
//! Runs on the blocking pool. Cancellation is observed from the progress and
//! write callbacks, both of which make libcurl abort the transfer.

use std::cell::{Cell, RefCell};
use std::io;
use std::str;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::probe::parse_response_head;
use crate::storage::StorageWriter;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Abort when throughput stays below `LOW_SPEED_LIMIT` bytes/s for `LOW_SPEED_TIME`.
pub(crate) const LOW_SPEED_LIMIT: u32 = 1024;
pub(crate) const LOW_SPEED_TIME: Duration = Duration::from_secs(60);

/// Shared handle setup for probes and transfers.
pub(crate) fn configure_easy(
    easy: &mut curl::easy::Easy,
    url: &str,
    user_agent: &str,
) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.useragent(user_agent)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(CONNECT_TIMEOUT)?;
    easy.low_speed_limit(LOW_SPEED_LIMIT)?;
    easy.low_speed_time(LOW_SPEED_TIME)?;
    // Needed so the progress callback (our cancellation hook) is invoked.
    easy.progress(true)?;
    Ok(())
}

/// Parameters of one transfer attempt.
pub(crate) struct TransferRequest<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    /// Half-open byte range to request, or `None` for the whole body.
    pub range: Option<(u64, u64)>,
    /// File offset of the first body byte.
    pub write_offset: u64,
    /// Bytes the response must carry; checked after the transfer.
    pub expected: Option<u64>,
    pub storage: &'a StorageWriter,
    pub cancel: &'a CancellationToken,
}

/// What the response headers said about the body, decided at the first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pending,
    Accept,
    Http(u32),
    RangeIgnored(u32),
}

fn judge(lines: &[String], range: Option<(u64, u64)>) -> Verdict {
    let head = parse_response_head(lines);
    let code = head.status.unwrap_or(0);
    if !(200..300).contains(&code) {
        return Verdict::Http(code);
    }
    let Some((start, end)) = range else {
        return Verdict::Accept;
    };
    if code != 206 {
        return Verdict::RangeIgnored(code);
    }
    match head.content_range {
        Some(cr) if cr.start == start && cr.end + 1 == end => Verdict::Accept,
        Some(_) => Verdict::RangeIgnored(code),
        // 206 without Content-Range: trust it, the length check still applies.
        None => Verdict::Accept,
    }
}

/// Run one GET. `written` is updated as bytes land on disk (so the caller
/// knows how far a failed attempt got); `on_write` receives each chunk size.
pub(crate) fn run_transfer(
    req: &TransferRequest<'_>,
    written: &Cell<u64>,
    on_write: &mut dyn FnMut(u64),
) -> Result<(), FetchError> {
    let headers: RefCell<Vec<String>> = RefCell::new(Vec::new());
    let verdict = Cell::new(Verdict::Pending);
    let storage_error: RefCell<Option<io::Error>> = RefCell::new(None);
    let limit = req.range.map(|(start, end)| end - start);

    let mut easy = curl::easy::Easy::new();
    configure_easy(&mut easy, req.url, req.user_agent)?;
    if let Some((start, end)) = req.range {
        easy.range(&format!("{}-{}", start, end.saturating_sub(1)))?;
    }

    let perform_result = {
        let mut transfer = easy.transfer();
        transfer.header_function(|line| {
            if let Ok(s) = str::from_utf8(line) {
                headers.borrow_mut().push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.progress_function(|_, _, _, _| !req.cancel.is_cancelled())?;
        transfer.write_function(|data| {
            if req.cancel.is_cancelled() {
                return Ok(0);
            }
            if verdict.get() == Verdict::Pending {
                verdict.set(judge(&headers.borrow(), req.range));
            }
            if verdict.get() != Verdict::Accept {
                return Ok(0);
            }
            let done = written.get();
            if let Some(limit) = limit {
                if done + data.len() as u64 > limit {
                    verdict.set(Verdict::RangeIgnored(206));
                    return Ok(0);
                }
            }
            match req.storage.write_at(req.write_offset + done, data) {
                Ok(()) => {
                    written.set(done + data.len() as u64);
                    on_write(data.len() as u64);
                    Ok(data.len())
                }
                Err(e) => {
                    *storage_error.borrow_mut() = Some(e);
                    Ok(0)
                }
            }
        })?;
        transfer.perform()
    };

    if req.cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    if let Some(e) = storage_error.borrow_mut().take() {
        return Err(FetchError::Storage(e));
    }
    match verdict.get() {
        Verdict::Http(code) => return Err(FetchError::Http(code)),
        Verdict::RangeIgnored(status) => return Err(FetchError::RangeUnsupported { status }),
        Verdict::Pending | Verdict::Accept => {}
    }
    perform_result?;

    // Empty bodies never reach the write callback; judge the headers now.
    if verdict.get() == Verdict::Pending {
        match judge(&headers.borrow(), req.range) {
            Verdict::Http(code) => return Err(FetchError::Http(code)),
            Verdict::RangeIgnored(status) => {
                return Err(FetchError::RangeUnsupported { status })
            }
            Verdict::Pending | Verdict::Accept => {}
        }
    }

    let received = written.get();
    if let Some(expected) = req.expected {
        if received != expected {
            return Err(FetchError::PartialTransfer { expected, received });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn whole_body_accepts_any_2xx() {
        assert_eq!(judge(&lines(&["HTTP/1.1 200 OK"]), None), Verdict::Accept);
        assert_eq!(judge(&lines(&["HTTP/1.1 404 Not Found"]), None), Verdict::Http(404));
    }

    #[test]
    fn ranged_request_requires_matching_206() {
        let ok = lines(&["HTTP/1.1 206 Partial Content", "Content-Range: bytes 100-199/1000"]);
        assert_eq!(judge(&ok, Some((100, 200))), Verdict::Accept);

        let shifted = lines(&["HTTP/1.1 206 Partial Content", "Content-Range: bytes 0-99/1000"]);
        assert_eq!(judge(&shifted, Some((100, 200))), Verdict::RangeIgnored(206));

        let whole = lines(&["HTTP/1.1 200 OK", "Content-Length: 1000"]);
        assert_eq!(judge(&whole, Some((100, 200))), Verdict::RangeIgnored(200));

        let throttled = lines(&["HTTP/1.1 503 Service Unavailable"]);
        assert_eq!(judge(&throttled, Some((0, 10))), Verdict::Http(503));
    }
}
