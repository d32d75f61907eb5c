//! Filename handling for client-supplied image names.
//!
//! Blob names are generated, but the stem seeds the name hash and the
//! extension is carried over, so both are reduced to safe forms first.

/// Maximum extension length carried into a generated blob name.
pub const MAX_EXTENSION_LEN: usize = 16;

/// Strip path components and dangerous characters from a filename hint.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() {
        return "unnamed".to_string();
    }
    sanitized.to_string()
}

/// Split a filename hint into `(stem, extension)`.
///
/// The extension keeps its leading dot and is dropped entirely when it holds
/// anything but ASCII alphanumerics or exceeds [`MAX_EXTENSION_LEN`].
pub fn split_filename_hint(filename: &str) -> (String, String) {
    let name = sanitize_filename(filename);
    match name.rfind('.') {
        Some(dot) if dot > 0 => {
            let ext = &name[dot + 1..];
            let valid = !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric());
            let stem = name[..dot].to_string();
            if valid {
                (stem, format!(".{ext}"))
            } else {
                (stem, String::new())
            }
        }
        _ => (name, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\cat.png"), "cat.png");
    }

    #[test]
    fn test_sanitize_replaces_dangerous_chars() {
        assert_eq!(sanitize_filename("a<b>c?.jpg"), "a_b_c_.jpg");
    }

    #[test]
    fn test_sanitize_empty_gets_placeholder() {
        assert_eq!(sanitize_filename("   "), "unnamed");
        assert_eq!(sanitize_filename("dir/"), "unnamed");
    }

    #[test]
    fn test_split_keeps_extension() {
        assert_eq!(
            split_filename_hint("holiday.photo.JPG"),
            ("holiday.photo".to_string(), ".JPG".to_string())
        );
    }

    #[test]
    fn test_split_without_extension() {
        assert_eq!(
            split_filename_hint("README"),
            ("README".to_string(), String::new())
        );
        assert_eq!(
            split_filename_hint(".hidden"),
            (".hidden".to_string(), String::new())
        );
    }

    #[test]
    fn test_split_rejects_odd_extension() {
        let (_, ext) = split_filename_hint("x.j pg");
        assert_eq!(ext, "");
        let (_, ext) = split_filename_hint("x.aaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(ext, "");
    }
}
