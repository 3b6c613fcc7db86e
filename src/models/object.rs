//! Represents an uploaded file and its sidecar metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the sidecar record inside every object namespace.
pub const META_FILE_NAME: &str = "meta.json";

/// Fallback content type when sniffing finds nothing better.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// On-disk sidecar record, stored as `{namespace}/meta.json`.
///
/// The field names and the unix-seconds timestamps are the persisted
/// layout; existing upload directories must keep parsing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Sanitized name the content is stored under.
    pub filename: String,

    /// Content type sniffed from the stored bytes.
    #[serde(rename = "mime", default = "default_content_type")]
    pub content_type: String,

    /// Publication time.
    #[serde(rename = "created", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,

    /// Set once the object has been soft-deleted.
    #[serde(
        rename = "deleted",
        with = "chrono::serde::ts_seconds_option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

/// A visible object as returned by the read paths of the store.
#[derive(Serialize, Clone, Debug)]
pub struct StoredObject {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,

    /// Size of the persisted content, read from the filesystem.
    pub size_bytes: u64,

    /// Seconds left in the retention window, never negative.
    pub remaining_secs: i64,

    /// `remaining_secs <= 0`. Read paths treat expired objects as absent.
    pub expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sidecar_uses_legacy_field_names() {
        let meta = ObjectMeta {
            filename: "hello.txt".into(),
            content_type: "text/plain".into(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            deleted_at: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "filename": "hello.txt",
                "mime": "text/plain",
                "created": 1_700_000_000
            })
        );
    }

    #[test]
    fn sidecar_without_mime_defaults_to_octet_stream() {
        let meta: ObjectMeta =
            serde_json::from_str(r#"{"filename":"a.bin","created":10,"deleted":20}"#).unwrap();
        assert_eq!(meta.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(meta.deleted_at, Some(Utc.timestamp_opt(20, 0).unwrap()));
    }
}
