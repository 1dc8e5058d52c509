//! Filename derivation for downloads.
//!
//! The final name comes from the first usable candidate among: the name the
//! submitter asked for, the resolver's suggestion, the `Content-Disposition`
//! header, and the last URL path segment. Every candidate is sanitized.

mod content_disposition;
mod path;
mod sanitize;

pub use content_disposition::parse_content_disposition_filename;
pub use path::filename_from_url_path;
pub use sanitize::{ensure_extension, sanitize_filename};
pub(crate) use sanitize::NAME_MAX;

/// Default filename when no candidate yields anything usable.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Inputs to [`derive_filename`], most preferred first.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameSources<'a> {
    pub requested: Option<&'a str>,
    pub suggested: Option<&'a str>,
    pub content_disposition: Option<&'a str>,
    pub url: &'a str,
}

/// Derives a safe filename for saving a download.
///
/// # Examples
///
/// - URL `https://example.com/archive.zip`, nothing else → `"archive.zip"`
/// - URL `https://example.com/`, header `attachment; filename="report.pdf"` → `"report.pdf"`
pub fn derive_filename(sources: NameSources<'_>) -> String {
    let from_header = sources
        .content_disposition
        .and_then(parse_content_disposition_filename);
    let from_path = filename_from_url_path(sources.url);

    [
        sources.requested.map(str::to_string),
        sources.suggested.map(str::to_string),
        from_header,
        from_path,
    ]
    .into_iter()
    .flatten()
    .map(|raw| sanitize_filename(&raw))
    .find(|name| usable(name))
    .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

fn usable(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_url(url: &str) -> NameSources<'_> {
        NameSources {
            url,
            ..NameSources::default()
        }
    }

    #[test]
    fn derive_filename_from_url_path() {
        assert_eq!(derive_filename(from_url("https://example.com/archive.zip")), "archive.zip");
        assert_eq!(
            derive_filename(from_url("https://cdn.example.com/path/to/my%20movie.mp4")),
            "my movie.mp4"
        );
    }

    #[test]
    fn content_disposition_overrides_url() {
        let sources = NameSources {
            content_disposition: Some("attachment; filename=\"real-name.tar.gz\""),
            ..from_url("https://example.com/archive.zip")
        };
        assert_eq!(derive_filename(sources), "real-name.tar.gz");
    }

    #[test]
    fn requested_then_suggested_win() {
        let sources = NameSources {
            requested: Some("mine.bin"),
            suggested: Some("theirs.mp4"),
            content_disposition: Some("attachment; filename=header.bin"),
            url: "https://example.com/path.bin",
        };
        assert_eq!(derive_filename(sources), "mine.bin");

        let sources = NameSources {
            requested: None,
            ..sources
        };
        assert_eq!(derive_filename(sources), "theirs.mp4");
    }

    #[test]
    fn unusable_candidates_are_skipped() {
        let sources = NameSources {
            requested: Some(" .. "),
            ..from_url("https://example.com/fallback.iso")
        };
        assert_eq!(derive_filename(sources), "fallback.iso");
    }

    #[test]
    fn empty_path_falls_back_to_default() {
        assert_eq!(derive_filename(from_url("https://example.com/")), DEFAULT_FILENAME);
        assert_eq!(derive_filename(from_url("https://example.com")), DEFAULT_FILENAME);
        assert_eq!(derive_filename(from_url("https://example.com/..")), DEFAULT_FILENAME);
    }
}
