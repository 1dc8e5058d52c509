//! Filename sanitization.

pub(crate) const NAME_MAX: usize = 255;

fn is_forbidden(c: char) -> bool {
    c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// Sanitizes a candidate filename so it is safe on common filesystems.
///
/// - Replaces control characters and `/ \ : * ? " < > |` with `_`
/// - Collapses runs of replaced characters into one `_`
/// - Trims leading/trailing whitespace and dots
/// - Limits length to 255 bytes (NAME_MAX), on a char boundary
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_replaced = false;

    for c in name.chars() {
        if is_forbidden(c) {
            if !prev_replaced {
                out.push('_');
            }
            prev_replaced = true;
        } else {
            out.push(c);
            prev_replaced = false;
        }
    }

    let trimmed = out.trim_matches(|c: char| c.is_whitespace() || c == '.');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Appends `.ext` unless `name` already ends with it (case-insensitive).
pub fn ensure_extension(name: &str, ext: &str) -> String {
    let suffix = format!(".{}", ext.trim_start_matches('.'));
    if name.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_path_separators_and_reserved_chars() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("What? A \"Title\": Part 1"), "What_ A _Title_ Part 1");
    }

    #[test]
    fn keeps_spaces_inside_names() {
        assert_eq!(sanitize_filename("movie (1).mp4"), "movie (1).mp4");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(sanitize_filename("  ..  file.txt  ..  "), "file.txt");
    }

    #[test]
    fn collapses_adjacent_replacements() {
        assert_eq!(sanitize_filename("a<>|b"), "a_b");
        assert_eq!(sanitize_filename("file\x00\x01name.txt"), "file_name.txt");
    }

    #[test]
    fn caps_length_on_char_boundary() {
        let long = "é".repeat(200);
        let s = sanitize_filename(&long);
        assert!(s.len() <= 255);
        assert!(s.chars().all(|c| c == 'é'));
    }

    #[test]
    fn extension_added_once() {
        assert_eq!(ensure_extension("clip", "mp4"), "clip.mp4");
        assert_eq!(ensure_extension("clip.MP4", "mp4"), "clip.MP4");
        assert_eq!(ensure_extension("clip", ".mp4"), "clip.mp4");
    }
}
