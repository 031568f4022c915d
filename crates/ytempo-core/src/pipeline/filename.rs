//! Filesystem-safe base names derived from video titles.

/// Maximum bytes for a sanitized base name, leaving headroom for job-id
/// suffixes, ".part" markers, and the ".mp3" extension under NAME_MAX.
const BASE_NAME_MAX: usize = 120;

/// Used when sanitization leaves nothing behind.
const FALLBACK_BASE: &str = "audio";

/// Windows reserved device names; guarded even on Linux since output
/// folders are often on shared or removable volumes.
const RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Sanitizes a video title into a safe filename base.
///
/// - Replaces `/ \ : * ? " < > |`, NUL, and control characters with `_`
/// - Collapses consecutive underscores
/// - Trims leading/trailing spaces, dots, and underscores
/// - Truncates to `BASE_NAME_MAX` bytes on a char boundary
/// - Falls back to a fixed name when empty or a reserved device name
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut prev_underscore = false;

    for c in title.chars() {
        let replacement = match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.' || c == '_');

    let bounded = if trimmed.len() > BASE_NAME_MAX {
        let mut take = BASE_NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].trim_end_matches(|c| c == ' ' || c == '.')
    } else {
        trimmed
    };

    if bounded.is_empty() || RESERVED.contains(&bounded.to_lowercase().as_str()) {
        return FALLBACK_BASE.to_string();
    }
    bounded.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_illegal_characters() {
        let s = sanitize_title("My: Video / Title?");
        for c in ['/', '\\', ':', '*', '?', '"', '<', '>', '|'] {
            assert!(!s.contains(c), "{c} left in {s}");
        }
        assert!(!s.is_empty());
        assert!(!s.ends_with('.') && !s.ends_with(' '));
        assert_eq!(s, "My_ Video _ Title");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(sanitize_title("  ..  song.  "), "song");
    }

    #[test]
    fn collapses_underscores() {
        assert_eq!(sanitize_title("a//\\b"), "a_b");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let s = sanitize_title(&long);
        assert!(s.len() <= BASE_NAME_MAX);
        assert!(!s.is_empty());
    }

    #[test]
    fn empty_falls_back() {
        assert_eq!(sanitize_title("???"), FALLBACK_BASE);
        assert_eq!(sanitize_title(""), FALLBACK_BASE);
        assert_eq!(sanitize_title(" .. "), FALLBACK_BASE);
    }

    #[test]
    fn reserved_names_fall_back() {
        assert_eq!(sanitize_title("CON"), FALLBACK_BASE);
        assert_eq!(sanitize_title("nul"), FALLBACK_BASE);
        assert_eq!(sanitize_title("LPT1"), FALLBACK_BASE);
        // A reserved name as part of a longer title is fine.
        assert_eq!(sanitize_title("console"), "console");
    }
}
