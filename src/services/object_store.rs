//! src/services/object_store.rs
//!
//! ObjectStore: expiring file storage on local disk. Every upload owns one
//! namespace directory `root/{id}/` holding the content under its sanitized
//! name plus a `meta.json` sidecar. Writing the sidecar is the publication
//! point: a namespace without a readable sidecar is invisible to every read
//! path and is left for the reaper's modification-time fallback.
//!
//! Read paths never delete. Irreversible removal is `hard_delete`, which only
//! the reaper calls.

use crate::{
    clock::SharedClock,
    models::object::{META_FILE_NAME, ObjectMeta, StoredObject},
    services::sanitize::{
        SNIFF_LEN, extension_allowed, extension_of, sanitize_filename, sniff_content_type,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use futures::{Stream, StreamExt, pin_mut, stream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input problems detected before anything is written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("File is empty")]
    EmptyFile,
    #[error("File type not allowed")]
    ExtensionNotAllowed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Unknown, malformed, soft-deleted, expired or half-written. Callers
    /// must not be able to tell these apart.
    #[error("object not found")]
    NotFound,
    #[error("malformed metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// True for the failures a reader should see as "no such object".
    fn is_absent(&self) -> bool {
        match self {
            StoreError::NotFound | StoreError::Metadata(_) => true,
            StoreError::Io(err) => err.kind() == ErrorKind::NotFound,
            StoreError::Validation(_) => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A directory directly under the storage root, as seen by the reaper.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub path: PathBuf,
    pub modified: Option<DateTime<Utc>>,
}

/// What the sidecar of a namespace says about its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceState {
    Published {
        created_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    },
    /// Missing or unreadable sidecar.
    Unpublished,
}

#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    retention: Duration,
    clock: SharedClock,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>, retention: Duration, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                retention,
                clock,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn retention(&self) -> Duration {
        self.inner.retention
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Create the storage root if it is missing.
    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(self.root()).await
    }

    fn namespace_path(&self, id: &Uuid) -> PathBuf {
        self.root().join(id.hyphenated().to_string())
    }

    /// Store an in-memory upload. See [`ObjectStore::create_stream`].
    pub async fn create(
        &self,
        bytes: impl Into<Bytes>,
        declared_filename: &str,
    ) -> StoreResult<StoredObject> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ValidationError::EmptyFile.into());
        }
        let body = stream::once(async move { Ok::<_, io::Error>(bytes) });
        self.create_stream(declared_filename, body).await
    }

    /// Stream an upload into a fresh namespace and publish it.
    ///
    /// - Rejects denylisted extensions before touching the disk.
    /// - Writes bytes to a hidden temp file, fsyncs, renames it into place.
    /// - Sniffs the content type from the first bytes written.
    /// - Publishes by atomically renaming the sidecar into `meta.json`.
    ///
    /// Any failure removes the namespace before returning. If the future is
    /// dropped mid-transfer the namespace is removed on drop.
    pub async fn create_stream<S>(
        &self,
        declared_filename: &str,
        body: S,
    ) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let filename = sanitize_filename(declared_filename);
        if !extension_allowed(&filename) {
            let ext = extension_of(&filename).unwrap_or_default();
            return Err(ValidationError::ExtensionNotAllowed(ext).into());
        }

        self.ensure_root().await?;
        let id = Uuid::new_v4();
        let dir = self.namespace_path(&id);
        fs::create_dir(&dir).await?;
        let mut pending = PendingNamespace::new(dir.clone());

        let result = self.write_namespace(id, &dir, filename, body).await;
        if result.is_err() {
            discard_namespace(&dir).await;
        }
        pending.disarm();

        let object = result?;
        info!(
            id = %object.id,
            filename = %object.filename,
            content_type = %object.content_type,
            size = object.size_bytes,
            "object published"
        );
        Ok(object)
    }

    async fn write_namespace<S>(
        &self,
        id: Uuid,
        dir: &Path,
        filename: String,
        body: S,
    ) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let tmp_path = dir.join(format!(".upload-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        let mut head: Vec<u8> = Vec::new();
        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if size_bytes == 0 {
            return Err(ValidationError::EmptyFile.into());
        }

        fs::rename(&tmp_path, dir.join(&filename)).await?;

        let meta = ObjectMeta {
            filename,
            content_type: sniff_content_type(&head),
            // The sidecar keeps whole seconds.
            created_at: self.now().trunc_subsecs(0),
            deleted_at: None,
        };
        write_meta(dir, &meta).await?;

        Ok(self.visible(id, meta, size_bytes))
    }

    /// Metadata for a visible object.
    ///
    /// Returns `NotFound` for ids outside the canonical form, missing or
    /// malformed sidecars, soft-deleted objects and sidecars whose content
    /// file is gone. Expired objects are returned with `expired = true`;
    /// callers render them as absent.
    pub async fn get_metadata(&self, id: &str) -> StoreResult<StoredObject> {
        let id = parse_id(id).ok_or(StoreError::NotFound)?;
        let dir = self.namespace_path(&id);

        let meta = match read_meta(&dir).await {
            Ok(meta) => meta,
            Err(err) if err.is_absent() => return Err(StoreError::NotFound),
            Err(err) => return Err(err),
        };
        if meta.deleted_at.is_some() {
            return Err(StoreError::NotFound);
        }
        // A sidecar pointing outside its namespace is treated as corrupt.
        if sanitize_filename(&meta.filename) != meta.filename {
            warn!(id = %id, "sidecar filename failed validation");
            return Err(StoreError::NotFound);
        }

        let size_bytes = match fs::metadata(dir.join(&meta.filename)).await {
            Ok(stat) if stat.is_file() => stat.len(),
            Ok(_) => return Err(StoreError::NotFound),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(id = %id, "sidecar present but content missing");
                return Err(StoreError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(self.visible(id, meta, size_bytes))
    }

    /// Open a visible, unexpired object for streaming out.
    pub async fn read_content(&self, id: &str) -> StoreResult<(StoredObject, File)> {
        let object = self.get_metadata(id).await?;
        if object.expired {
            return Err(StoreError::NotFound);
        }

        let path = self.namespace_path(&object.id).join(&object.filename);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Mark an object as deleted without reclaiming its bytes.
    ///
    /// Idempotent. Returns `false` only when there is no readable sidecar.
    pub async fn soft_delete(&self, id: &str) -> StoreResult<bool> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };
        let dir = self.namespace_path(&id);

        let mut meta = match read_meta(&dir).await {
            Ok(meta) => meta,
            Err(err) if err.is_absent() => return Ok(false),
            Err(err) => return Err(err),
        };
        if meta.deleted_at.is_some() {
            return Ok(true);
        }

        meta.deleted_at = Some(self.now().trunc_subsecs(0));
        match write_meta(&dir, &meta).await {
            Ok(()) => {}
            // The reaper removed the namespace between our read and write.
            Err(err) if err.is_absent() => {
                debug!(id = %id, "namespace vanished during soft delete");
            }
            Err(err) => return Err(err),
        }

        info!(id = %id, "object soft-deleted");
        Ok(true)
    }

    /// Remove a namespace and everything in it.
    ///
    /// An already-missing namespace is not an error. Only the reaper calls
    /// this.
    pub async fn hard_delete(&self, name: &str) -> StoreResult<()> {
        if !is_plain_name(name) {
            return Err(StoreError::NotFound);
        }
        let dir = self.root().join(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("removed namespace {}", dir.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Every directory directly under the storage root.
    pub async fn list_namespaces(&self) -> io::Result<Vec<Namespace>> {
        let mut entries = fs::read_dir(self.root()).await?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let stat = match entry.metadata().await {
                Ok(stat) => stat,
                // Raced with a concurrent delete.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            if !stat.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            found.push(Namespace {
                name,
                path: entry.path(),
                modified: stat.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// Read the lifecycle markers of a namespace's sidecar.
    pub async fn inspect(&self, namespace: &Namespace) -> StoreResult<NamespaceState> {
        match read_meta(&namespace.path).await {
            Ok(meta) => Ok(NamespaceState::Published {
                created_at: meta.created_at,
                deleted_at: meta.deleted_at,
            }),
            Err(err) if err.is_absent() => Ok(NamespaceState::Unpublished),
            Err(err) => Err(err),
        }
    }

    fn visible(&self, id: Uuid, meta: ObjectMeta, size_bytes: u64) -> StoredObject {
        let age = self.now() - meta.created_at;
        let remaining_secs = (self.retention() - age).num_seconds().max(0);
        StoredObject {
            id,
            filename: meta.filename,
            content_type: meta.content_type,
            created_at: meta.created_at,
            size_bytes,
            remaining_secs,
            expired: remaining_secs <= 0,
        }
    }
}

/// Accept only the canonical lowercase hyphenated form, e.g.
/// `0b9d2c2e-8f6a-4d0e-9a8b-1c2d3e4f5a6b`.
pub fn is_canonical_id(raw: &str) -> bool {
    raw.len() == 36
        && raw.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => matches!(c, '0'..='9' | 'a'..='f'),
        })
}

fn parse_id(raw: &str) -> Option<Uuid> {
    if !is_canonical_id(raw) {
        return None;
    }
    Uuid::parse_str(raw).ok()
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

async fn read_meta(dir: &Path) -> StoreResult<ObjectMeta> {
    let raw = fs::read(dir.join(META_FILE_NAME)).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Write the sidecar through a uniquely named temp file and rename it over
/// `meta.json`, so readers see either the old or the new record.
async fn write_meta(dir: &Path, meta: &ObjectMeta) -> StoreResult<()> {
    let payload = serde_json::to_vec(meta)?;
    let tmp_path = dir.join(format!(".meta-{}.tmp", Uuid::new_v4()));

    let written = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, dir.join(META_FILE_NAME)).await
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    Ok(())
}

async fn discard_namespace(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => debug!("discarded partial namespace {}", dir.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(
            "failed to discard partial namespace {}: {}",
            dir.display(),
            err
        ),
    }
}

/// Removes an unpublished namespace if the upload future is dropped before
/// it finishes, e.g. when the client disconnects.
struct PendingNamespace {
    dir: PathBuf,
    armed: bool,
}

impl PendingNamespace {
    fn new(dir: PathBuf) -> Self {
        Self { dir, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingNamespace {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("removed abandoned upload {}", self.dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "failed to remove abandoned upload {}: {}",
                self.dir.display(),
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn store_at(tmp: &TempDir) -> (ObjectStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = ObjectStore::new(
            tmp.path().join("uploads"),
            Duration::minutes(60),
            clock.clone(),
        );
        (store, clock)
    }

    async fn namespace_count(store: &ObjectStore) -> usize {
        match store.list_namespaces().await {
            Ok(found) => found.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(err) => panic!("{err}"),
        }
    }

    async fn read_all(mut file: File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn create_then_read_metadata() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);

        let created = store.create(&b"hola\n"[..], "hello.txt").await.unwrap();
        let id = created.id.to_string();
        assert!(is_canonical_id(&id));

        let meta = store.get_metadata(&id).await.unwrap();
        assert_eq!(meta.filename, "hello.txt");
        assert_eq!(meta.size_bytes, 5);
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.remaining_secs, 3600);
        assert!(!meta.expired);

        let dir = store.root().join(&id);
        assert!(dir.join("hello.txt").is_file());
        assert!(dir.join(META_FILE_NAME).is_file());
    }

    #[tokio::test]
    async fn traversal_name_is_flattened_and_bytes_round_trip() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);
        let payload = b"%PDF-1.4\nnot really a pdf".to_vec();

        let created = store.create(payload.clone(), "../../etc/passwd").await.unwrap();
        assert_eq!(created.filename, "passwd");

        let (object, file) = store.read_content(&created.id.to_string()).await.unwrap();
        assert_eq!(object.content_type, "application/pdf");
        assert_eq!(read_all(file).await, payload);
        assert!(!tmp.path().join("etc").exists());
    }

    #[tokio::test]
    async fn blocked_extension_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);

        let err = store.create(&b"<?php echo 1;"[..], "malware.php").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::ExtensionNotAllowed(ref ext)) if ext == "php"
        ));
        assert_eq!(namespace_count(&store).await, 0);
    }

    #[tokio::test]
    async fn empty_stream_is_rolled_back() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);

        let body = stream::iter(Vec::<io::Result<Bytes>>::new());
        let err = store.create_stream("empty.txt", body).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(ValidationError::EmptyFile)));
        assert_eq!(namespace_count(&store).await, 0);
    }

    #[tokio::test]
    async fn interrupted_stream_leaves_no_namespace() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = store.create_stream("big.bin", body).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(namespace_count(&store).await, 0);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_not_found() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);
        store.ensure_root().await.unwrap();

        for id in [
            Uuid::new_v4().to_string(),
            "../etc".to_string(),
            "ABCDEF00-0000-4000-8000-000000000000".to_string(),
            String::new(),
        ] {
            assert!(matches!(store.get_metadata(&id).await, Err(StoreError::NotFound)));
            assert!(matches!(store.read_content(&id).await, Err(StoreError::NotFound)));
        }
    }

    #[tokio::test]
    async fn expiry_is_enforced_on_read_without_deleting() {
        let tmp = TempDir::new().unwrap();
        let (store, clock) = store_at(&tmp);
        let id = store.create(&b"hola\n"[..], "hello.txt").await.unwrap().id.to_string();

        clock.advance(Duration::minutes(59));
        assert_eq!(store.get_metadata(&id).await.unwrap().remaining_secs, 60);

        clock.advance(Duration::minutes(2));
        let meta = store.get_metadata(&id).await.unwrap();
        assert!(meta.expired);
        assert_eq!(meta.remaining_secs, 0);
        assert!(matches!(store.read_content(&id).await, Err(StoreError::NotFound)));
        assert!(store.root().join(&id).exists());
    }

    #[tokio::test]
    async fn soft_delete_hides_object_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);
        let id = store.create(&b"bye"[..], "bye.txt").await.unwrap().id.to_string();

        assert!(store.soft_delete(&id).await.unwrap());
        assert!(store.soft_delete(&id).await.unwrap());
        assert!(matches!(store.get_metadata(&id).await, Err(StoreError::NotFound)));
        // Bytes stay until the reaper runs.
        assert!(store.root().join(&id).join("bye.txt").exists());

        assert!(!store.soft_delete(&Uuid::new_v4().to_string()).await.unwrap());
        assert!(!store.soft_delete("not-an-id").await.unwrap());
    }

    #[tokio::test]
    async fn missing_content_or_corrupt_sidecar_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);

        let a = store.create(&b"aaa"[..], "a.txt").await.unwrap().id.to_string();
        fs::remove_file(store.root().join(&a).join("a.txt")).await.unwrap();
        assert!(matches!(store.get_metadata(&a).await, Err(StoreError::NotFound)));

        let b = store.create(&b"bbb"[..], "b.txt").await.unwrap().id.to_string();
        fs::write(store.root().join(&b).join(META_FILE_NAME), b"{not json").await.unwrap();
        assert!(matches!(store.get_metadata(&b).await, Err(StoreError::NotFound)));
        assert!(!store.soft_delete(&b).await.unwrap());

        let c = store.create(&b"ccc"[..], "c.txt").await.unwrap().id.to_string();
        let tampered = r#"{"filename":"../../secret","mime":"text/plain","created":1}"#;
        fs::write(store.root().join(&c).join(META_FILE_NAME), tampered).await.unwrap();
        assert!(matches!(store.get_metadata(&c).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn hard_delete_tolerates_missing_namespace() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);
        let id = store.create(&b"x"[..], "x.bin").await.unwrap().id.to_string();

        store.hard_delete(&id).await.unwrap();
        assert!(!store.root().join(&id).exists());
        store.hard_delete(&id).await.unwrap();

        assert!(matches!(store.hard_delete("..").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn dropped_upload_is_cleaned_up() {
        let tmp = TempDir::new().unwrap();
        let (store, _clock) = store_at(&tmp);

        // A body that yields one chunk and then never finishes.
        let body = stream::once(async { Ok(Bytes::from_static(b"half")) })
            .chain(stream::pending());
        let upload = store.create_stream("slow.txt", body);
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(200), upload).await;
        assert!(timed_out.is_err());

        assert_eq!(namespace_count(&store).await, 0);
    }

    #[test]
    fn canonical_id_shape() {
        assert!(is_canonical_id("0b9d2c2e-8f6a-4d0e-9a8b-1c2d3e4f5a6b"));
        assert!(!is_canonical_id("0b9d2c2e8f6a4d0e9a8b1c2d3e4f5a6b"));
        assert!(!is_canonical_id("0b9d2c2e-8f6a-4d0e-9a8b-1c2d3e4f5a6g"));
        assert!(!is_canonical_id("0B9D2C2E-8F6A-4D0E-9A8B-1C2D3E4F5A6B"));
    }
}
