//! Line-oriented terminal progress: one line per event, rate-limited per task.

use pulse_core::{ProgressSnapshot, TaskStatus};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MIB: f64 = 1_048_576.0;

/// Decides which events are worth a line. Status changes always print;
/// byte-count updates of the same task print at most once per `interval`.
pub struct ProgressPrinter {
    interval: Duration,
    last: HashMap<String, (TaskStatus, Instant)>,
}

impl ProgressPrinter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    pub fn should_print(&mut self, snap: &ProgressSnapshot, now: Instant) -> bool {
        let print = match self.last.get(&snap.id) {
            None => true,
            Some((status, at)) => {
                *status != snap.status || now.duration_since(*at) >= self.interval
            }
        };
        if print {
            self.last.insert(snap.id.clone(), (snap.status, now));
        }
        print
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn display_name(snap: &ProgressSnapshot) -> &str {
    snap.filename.as_deref().unwrap_or(&snap.url)
}

fn format_eta(secs: f64) -> String {
    let secs = secs.round() as u64;
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// One human-readable line for a snapshot.
pub fn format_progress_line(snap: &ProgressSnapshot) -> String {
    let prefix = format!("[{}] {}", short_id(&snap.id), display_name(snap));
    let done_mib = snap.bytes_done as f64 / MIB;
    match snap.status {
        TaskStatus::Downloading => {
            let rate_mib = snap.bytes_per_sec() / MIB;
            match (snap.total_bytes, snap.fraction()) {
                (Some(total), Some(fraction)) => {
                    let eta = snap
                        .eta_secs()
                        .map(format_eta)
                        .unwrap_or_else(|| "?".to_string());
                    format!(
                        "{}  {:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s  ETA {}",
                        prefix,
                        done_mib,
                        total as f64 / MIB,
                        fraction * 100.0,
                        rate_mib,
                        eta
                    )
                }
                _ => format!("{}  {:.1} MiB  {:.2} MiB/s", prefix, done_mib, rate_mib),
            }
        }
        TaskStatus::Done => {
            let dest = snap
                .final_path
                .as_ref()
                .map(|p| format!(" -> {}", p.display()))
                .unwrap_or_default();
            format!(
                "{}  done ({:.1} MiB in {:.1}s){}",
                prefix, done_mib, snap.elapsed_secs, dest
            )
        }
        TaskStatus::Error => format!(
            "{}  error: {}",
            prefix,
            snap.error.as_deref().unwrap_or("unknown error")
        ),
        status => format!("{}  {}", prefix, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn snap(status: TaskStatus) -> ProgressSnapshot {
        ProgressSnapshot {
            id: "0123456789abcdef".to_string(),
            url: "https://example.com/file.iso".to_string(),
            filename: Some("file.iso".to_string()),
            final_path: None,
            status,
            total_bytes: Some(10 * 1_048_576),
            bytes_done: 5 * 1_048_576,
            chunk_count: 4,
            elapsed_secs: 5.0,
            error: None,
        }
    }

    #[test]
    fn downloading_line_shows_fraction_rate_and_eta() {
        let line = format_progress_line(&snap(TaskStatus::Downloading));
        assert!(line.starts_with("[01234567] file.iso"), "{line}");
        assert!(line.contains("5.0 / 10.0 MiB (50.0%)"), "{line}");
        assert!(line.contains("1.00 MiB/s"), "{line}");
        assert!(line.contains("ETA 5s"), "{line}");
    }

    #[test]
    fn unknown_size_omits_fraction() {
        let mut s = snap(TaskStatus::Downloading);
        s.total_bytes = None;
        let line = format_progress_line(&s);
        assert!(line.contains("5.0 MiB"), "{line}");
        assert!(!line.contains('%'), "{line}");
    }

    #[test]
    fn terminal_lines() {
        let mut done = snap(TaskStatus::Done);
        done.final_path = Some(PathBuf::from("/tmp/file.iso"));
        assert!(format_progress_line(&done).ends_with("-> /tmp/file.iso"));

        let mut failed = snap(TaskStatus::Error);
        failed.error = Some("HTTP 404".to_string());
        assert!(format_progress_line(&failed).ends_with("error: HTTP 404"));

        let mut queued = snap(TaskStatus::Queued);
        queued.filename = None;
        assert_eq!(
            format_progress_line(&queued),
            "[01234567] https://example.com/file.iso  queued"
        );
    }

    #[test]
    fn printer_rate_limits_same_status_only() {
        let mut printer = ProgressPrinter::new(Duration::from_millis(500));
        let t0 = Instant::now();
        let s = snap(TaskStatus::Downloading);
        assert!(printer.should_print(&s, t0));
        assert!(!printer.should_print(&s, t0 + Duration::from_millis(100)));
        assert!(printer.should_print(&s, t0 + Duration::from_millis(600)));
        // A status change prints immediately.
        let done = snap(TaskStatus::Done);
        assert!(printer.should_print(&done, t0 + Duration::from_millis(650)));
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(42.0), "42s");
        assert_eq!(format_eta(125.0), "2m05s");
        assert_eq!(format_eta(3_720.0), "1h02m");
    }
}
