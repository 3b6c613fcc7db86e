//! Filename hygiene, extension denylisting and content sniffing.
//!
//! Client-supplied names and MIME headers are never trusted: names are
//! reduced to a flat `[A-Za-z0-9_.-]` form before touching the disk, and
//! the stored content type always comes from the bytes themselves.

use crate::models::object::{DEFAULT_CONTENT_TYPE, META_FILE_NAME};

/// Extensions that are refused outright, compared case-insensitively.
pub const BLOCKED_EXTENSIONS: [&str; 32] = [
    "php", "php3", "php4", "php5", "phtml", "phar", "pht", "phps", "cgi", "pl", "py", "sh",
    "bash", "zsh", "exe", "bat", "cmd", "asp", "aspx", "jsp", "jspx", "war", "ear", "jar",
    "class", "shtml", "stm", "shtm", "htaccess", "htpasswd", "ini", "conf",
];

const MAX_FILENAME_LEN: usize = 255;
const FALLBACK_FILENAME: &str = "file";

/// Reduce an untrusted, client-declared filename to something safe to
/// store and display.
///
/// - directory components (`/` and `\`) are stripped
/// - anything outside `[A-Za-z0-9_.-]` becomes `_`
/// - runs of dots collapse to one, leading/trailing dots are dropped
/// - the result is never empty, never the sidecar name and at most 255 bytes
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            c
        } else {
            '_'
        };
        if c == '.' && out.ends_with('.') {
            continue;
        }
        out.push(c);
    }

    let mut name = out.trim_matches('.').to_string();
    if name.is_empty() {
        name = FALLBACK_FILENAME.to_string();
    }
    if name == META_FILE_NAME {
        name.insert(0, '_');
    }
    truncate_keeping_extension(name)
}

// The name is pure ASCII by now, so byte offsets are char boundaries.
fn truncate_keeping_extension(name: String) -> String {
    if name.len() <= MAX_FILENAME_LEN {
        return name;
    }
    // Cutting can expose a dot at the new end; the first byte is never a dot,
    // so trimming cannot empty the stem.
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.len() + 1 < MAX_FILENAME_LEN => {
            let keep = MAX_FILENAME_LEN - ext.len() - 1;
            let stem = stem[..keep.min(stem.len())].trim_end_matches('.');
            format!("{}.{}", stem, ext)
        }
        _ => name[..MAX_FILENAME_LEN].trim_end_matches('.').to_string(),
    }
}

/// Strip characters that could break out of a quoted header parameter.
pub fn sanitize_header_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '"'))
        .collect()
}

/// Lowercased text after the final dot, if any.
pub fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// `false` when the extension is on [`BLOCKED_EXTENSIONS`]. Names without an
/// extension are allowed.
pub fn extension_allowed(name: &str) -> bool {
    match extension_of(name) {
        Some(ext) => !BLOCKED_EXTENSIONS.contains(&ext.as_str()),
        None => true,
    }
}

/// Number of leading bytes kept in memory for sniffing.
pub const SNIFF_LEN: usize = 8192;

/// Detect a content type from the first bytes of a file.
///
/// Magic numbers win; otherwise NUL-free UTF-8 is `text/plain` and the rest
/// is `application/octet-stream`.
pub fn sniff_content_type(prefix: &[u8]) -> String {
    if let Some(kind) = infer::get(prefix) {
        return kind.mime_type().to_string();
    }
    if looks_like_text(prefix) {
        return "text/plain".to_string();
    }
    DEFAULT_CONTENT_TYPE.to_string()
}

fn looks_like_text(prefix: &[u8]) -> bool {
    if prefix.is_empty() || prefix.contains(&0) {
        return false;
    }
    match std::str::from_utf8(prefix) {
        Ok(_) => true,
        // A multi-byte sequence cut off by the prefix window is still text.
        Err(err) => err.error_len().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_directories_and_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("dir/.."), "file");
    }

    #[test]
    fn replaces_disallowed_characters() {
        assert_eq!(sanitize_filename("my file (1).txt"), "my_file__1_.txt");
        assert_eq!(sanitize_filename("zażółć.txt"), "za____.txt");
        assert_eq!(sanitize_filename("quote\"\r\n.txt"), "quote___.txt");
    }

    #[test]
    fn collapses_and_trims_dots() {
        assert_eq!(sanitize_filename("archive...tar..gz"), "archive.tar.gz");
        assert_eq!(sanitize_filename("...hidden"), "hidden");
        assert_eq!(sanitize_filename("trailing.php."), "trailing.php");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn never_collides_with_sidecar() {
        assert_eq!(sanitize_filename("meta.json"), "_meta.json");
        assert_eq!(sanitize_filename("x/meta.json"), "_meta.json");
    }

    #[test]
    fn long_names_keep_their_extension() {
        let raw = format!("{}.txt", "a".repeat(400));
        let name = sanitize_filename(&raw);
        assert_eq!(name.len(), 255);
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn sanitized_names_stay_in_the_permitted_alphabet() {
        let long_stem_cut_at_dot = format!("{}.{}.txt", "x".repeat(250), "y".repeat(100));
        let long_extension = format!("{}.{}", "a".repeat(254), "b".repeat(300));
        let inputs = [
            "../x",
            "a/b\\c",
            "..",
            ".",
            "é",
            "a..b",
            "  ",
            "\0evil",
            long_stem_cut_at_dot.as_str(),
            long_extension.as_str(),
        ];
        for raw in inputs {
            let name = sanitize_filename(raw);
            assert!(!name.is_empty());
            assert!(name.len() <= 255);
            assert!(!name.contains('/'));
            assert!(!name.starts_with('.'));
            assert!(!name.ends_with('.'), "trailing dot in {name:?}");
            assert!(!name.contains(".."), "double dot in {name:?}");
            assert!(
                name.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')),
                "unexpected char in {name:?}"
            );
        }
    }

    #[test]
    fn long_names_never_end_on_a_dot() {
        let name = sanitize_filename(&format!("{}.{}.txt", "x".repeat(250), "y".repeat(100)));
        assert_eq!(name, format!("{}.txt", "x".repeat(250)));

        let name = sanitize_filename(&format!("{}.{}", "a".repeat(254), "b".repeat(300)));
        assert_eq!(name, "a".repeat(254));
    }

    #[test]
    fn header_values_lose_quotes_and_newlines() {
        assert_eq!(sanitize_header_value("a\"b\r\nc.txt"), "abc.txt");
    }

    #[test]
    fn denylist_is_case_insensitive_and_exact() {
        assert!(!extension_allowed("malware.php"));
        assert!(!extension_allowed("MALWARE.PhP"));
        assert!(!extension_allowed("run.sh"));
        assert!(extension_allowed("notes.phpx"));
        assert!(extension_allowed("php"));
        assert!(extension_allowed("README"));
        assert!(extension_allowed("photo.jpeg"));
    }

    #[test]
    fn sniffs_from_bytes() {
        assert_eq!(sniff_content_type(b"hola\n"), "text/plain");
        assert_eq!(
            sniff_content_type(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]),
            "image/png"
        );
        assert_eq!(sniff_content_type(b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(sniff_content_type(&[0x00, 0xff, 0x13]), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn truncated_utf8_prefix_is_still_text() {
        let text = "ąąą".as_bytes();
        assert_eq!(sniff_content_type(&text[..text.len() - 1]), "text/plain");
    }
}
