//! Server-rendered HTML for the browser flow.
//!
//! Pages are deliberately plain: a form to upload, a card describing an
//! upload, and an alert for errors. Everything interpolated is escaped.

use crate::models::object::StoredObject;

pub fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Human-readable byte count, e.g. `5 B`, `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// Countdown text, `45s` or `12m 5s`.
pub fn format_time(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{}s", seconds)
    } else {
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}

fn layout(body: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\">",
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">",
            "<title>tmpshare - Temporary File Sharing</title></head><body>",
            "<header><h1><a href=\"/\">tmpshare</a></h1></header>{}",
            "<footer><p>Files are deleted automatically. No guarantees, no encryption.</p></footer>",
            "</body></html>"
        ),
        body
    )
}

pub fn upload_page(retention_minutes: u32, max_upload_bytes: usize) -> String {
    layout(&format!(
        concat!(
            "<p>Temporary file sharing - files deleted after {minutes} minutes</p>",
            "<form action=\"/\" method=\"post\" enctype=\"multipart/form-data\">",
            "<input type=\"file\" name=\"file\" required> ",
            "<button type=\"submit\">Upload</button>",
            "<p>Max file size: {max}</p></form>",
            "<h2>API / cURL</h2>",
            "<pre>curl -X POST -F \"file=@yourfile.txt\" http://HOST/</pre>"
        ),
        minutes = retention_minutes,
        max = format_size(max_upload_bytes as u64),
    ))
}

pub fn file_page(object: &StoredObject, share_url: &str, retention_secs: i64) -> String {
    let percent = if retention_secs > 0 {
        object.remaining_secs * 100 / retention_secs
    } else {
        0
    };
    let id = object.id.to_string();
    layout(&format!(
        concat!(
            "<section><h2>File Information</h2>",
            "<p>Expires in: <span id=\"time-remaining\">{remaining}</span> ({percent}% left)</p>",
            "<dl><dt>Filename</dt><dd>{filename}</dd>",
            "<dt>Size</dt><dd>{size}</dd>",
            "<dt>Type</dt><dd>{mime}</dd>",
            "<dt>File ID</dt><dd>{id}</dd></dl>",
            "<p><a href=\"/d/{id}\">Download File</a> | ",
            "<a href=\"{share}\">Share link</a> | <a href=\"/\">Upload New File</a></p>",
            "<form method=\"post\"><input type=\"hidden\" name=\"delete\" value=\"1\">",
            "<button type=\"submit\">Delete</button></form></section>"
        ),
        remaining = format_time(object.remaining_secs),
        percent = percent,
        filename = html_escape(&object.filename),
        size = format_size(object.size_bytes),
        mime = html_escape(&object.content_type),
        id = id,
        share = html_escape(share_url),
    ))
}

pub fn error_page(message: &str) -> String {
    layout(&format!(
        "<div class=\"alert alert-error\">{}</div><p><a href=\"/\">Back</a></p>",
        html_escape(message)
    ))
}
