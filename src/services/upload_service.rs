//! UploadService — the upload-session lifecycle manager.
//!
//! Owns id allocation, chunk admission, size enforcement, finalization, and
//! deletion. Metadata and token mappings go through [`KvStore`]; "is this
//! upload still in progress" lives in [`SessionStore`]; chunk bytes land in
//! one directory per session under `base_path`, holding exactly the
//! assembled file.
//!
//! Invariant kept throughout: the session directory exists iff the metadata
//! record exists. Both are created together in `create_session` and removed
//! together in `delete_session`.

use crate::models::{encryption::EncryptionHeader, file_record::FileRecord};
use crate::services::{
    filename::normalize_filename, kv_store::KvStore, session_store::SessionStore,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Total per-file cap: 5000 MiB.
pub const FILE_SIZE_LIMIT: u64 = 5000 * 1024 * 1024;
/// Per-chunk cap: 100 MiB.
pub const CHUNK_SIZE_LIMIT: u64 = 100 * 1024 * 1024;
/// How often the janitor sweeps.
pub const JANITOR_INTERVAL: Duration = Duration::from_secs(60);
/// Idle time after which a sweep reclaims a session.
pub const STALE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid encryption header.")]
    InvalidEncryptionHeader,
    #[error("Filename is empty after normalization.")]
    InvalidFilename,
    #[error("upload `{0}` does not exist")]
    UnknownSession(String),
    #[error("no file matches the supplied access token")]
    InvalidToken,
    #[error("Chunk exceeds the 100 MB size limit.")]
    ChunkTooLarge,
    #[error("File exceeds the 5 GB size limit.")]
    FileTooLarge,
    #[error("file `{0}` does not exist")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Metadata plus current on-disk size, as returned by [`UploadService::lookup`].
#[derive(Debug)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub iv: Option<String>,
    pub salt: Option<String>,
}

#[derive(Clone)]
pub struct UploadService {
    pub kv: KvStore,
    pub sessions: SessionStore,
    /// Root directory holding one subdirectory per session.
    pub base_path: PathBuf,
    max_chunk_bytes: u64,
    max_file_bytes: u64,
}

impl UploadService {
    pub fn new(kv: KvStore, base_path: impl Into<PathBuf>) -> Self {
        Self::with_limits(kv, base_path, CHUNK_SIZE_LIMIT, FILE_SIZE_LIMIT)
    }

    /// Construct with non-default size limits. Tests use this; production
    /// code goes through [`UploadService::new`] and the fixed constants.
    pub fn with_limits(
        kv: KvStore,
        base_path: impl Into<PathBuf>,
        max_chunk_bytes: u64,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            kv,
            sessions: SessionStore::new(),
            base_path: base_path.into(),
            max_chunk_bytes,
            max_file_bytes,
        }
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    /// Allocate a session: directory, metadata record, and session entry.
    ///
    /// The id is drawn from a space large enough that collisions are noise;
    /// `create_dir` doubles as the atomic claim on the id, so two racing
    /// creations can never share a directory.
    pub async fn create_session(
        &self,
        raw_filename: &str,
        header: Option<&str>,
    ) -> UploadResult<String> {
        let encryption = match header {
            Some(raw) => {
                Some(EncryptionHeader::parse(raw).ok_or(UploadError::InvalidEncryptionHeader)?)
            }
            None => None,
        };

        let filename = normalize_filename(raw_filename);
        if filename.is_empty() || filename == "." || filename == ".." {
            return Err(UploadError::InvalidFilename);
        }

        let id = loop {
            let id = Uuid::new_v4().simple().to_string();
            match fs::create_dir(self.session_dir(&id)).await {
                Ok(()) => break id,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        };

        let record = FileRecord {
            id: id.clone(),
            filename,
            iv: encryption.as_ref().map(|e| e.iv.clone()),
            salt: encryption.map(|e| e.salt),
            created_at: Utc::now(),
        };
        if let Err(err) = self.kv.put_file(&record).await {
            // Directory and metadata record live and die together.
            let _ = fs::remove_dir_all(self.session_dir(&id)).await;
            return Err(err.into());
        }

        self.sessions.open(&id);
        debug!(id = %id, file = %record.filename, "registered upload session");
        Ok(id)
    }

    /// Append one chunk to the session's file.
    ///
    /// Size-limit violations tear the session down before returning; callers
    /// receiving `ChunkTooLarge` or `FileTooLarge` must not retry the id.
    pub async fn append_chunk<S>(&self, id: &str, chunk: S) -> UploadResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        // A finalized session has no writer lock left; appends against it
        // are uncoordinated, matching a session nobody else can touch.
        let writer = self.sessions.writer(id).unwrap_or_default();

        let result = {
            let _guard = writer.lock().await;
            // Looked up under the lock: a racing delete either finished
            // before we got here (record gone, clean UnknownSession) or
            // waits until this append completes.
            match self.kv.get_file(id).await? {
                Some(record) => self.write_chunk(id, &record.filename, chunk).await,
                None => return Err(UploadError::UnknownSession(id.to_string())),
            }
        };

        match result {
            Ok(()) => {
                self.sessions.touch(id);
                Ok(())
            }
            Err(err @ (UploadError::ChunkTooLarge | UploadError::FileTooLarge)) => {
                if let Err(cleanup_err) = self.delete_session(id).await {
                    warn!(id = %id, error = %cleanup_err, "failed to tear down oversized upload");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Spool the chunk to a temp file, enforce both limits, then commit by
    /// appending to the target. Caller holds the per-session write lock.
    async fn write_chunk<S>(&self, id: &str, filename: &str, chunk: S) -> UploadResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let dir = self.session_dir(id);
        let destination = dir.join(filename);

        let existing = match fs::metadata(&destination).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };
        // Guard: an earlier chunk may already have pushed past the limit.
        if existing > self.max_file_bytes {
            return Err(UploadError::FileTooLarge);
        }

        let tmp_path = dir.join(format!(".chunk-{}", Uuid::new_v4().simple()));
        let written = match self.spool_chunk(&tmp_path, chunk).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if written > self.max_chunk_bytes {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::ChunkTooLarge);
        }
        if existing + written >= self.max_file_bytes {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::FileTooLarge);
        }

        let commit = async {
            let mut spooled = File::open(&tmp_path).await?;
            let mut target = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&destination)
                .await?;
            tokio::io::copy(&mut spooled, &mut target).await?;
            target.flush().await?;
            Ok::<(), io::Error>(())
        };
        let committed = commit.await;
        let _ = fs::remove_file(&tmp_path).await;
        committed?;
        Ok(())
    }

    /// Write the incoming stream to `tmp_path`, counting bytes. Stops
    /// reading as soon as the per-chunk limit is crossed so an unbounded
    /// body cannot fill the disk.
    async fn spool_chunk<S>(&self, tmp_path: &Path, chunk: S) -> UploadResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let mut tmp = File::create(tmp_path).await?;
        let mut written: u64 = 0;
        pin_mut!(chunk);
        while let Some(piece) = chunk.next().await {
            let piece = piece?;
            written += piece.len() as u64;
            tmp.write_all(&piece).await?;
            if written > self.max_chunk_bytes {
                break;
            }
        }
        tmp.flush().await?;
        Ok(written)
    }

    /// Close the session and mint its single-use access token.
    ///
    /// The metadata record is retained so the assembled file stays
    /// resolvable. Removing the session entry must not fail when it is
    /// already absent.
    pub async fn finalize_session(&self, id: &str) -> UploadResult<(String, String)> {
        let record = self
            .kv
            .get_file(id)
            .await?
            .ok_or_else(|| UploadError::UnknownSession(id.to_string()))?;

        self.sessions.close(id);

        let token = Uuid::new_v4().simple().to_string();
        self.kv.put_token(&token, id).await?;
        debug!(id = %id, "finalized upload session");
        Ok((format!("{}/{}", id, record.filename), token))
    }

    /// Remove the session entry, metadata record, and on-disk directory.
    ///
    /// Idempotent: every step tolerates the state already being gone, so
    /// janitor sweeps racing client-initiated deletes are safe.
    pub async fn delete_session(&self, id: &str) -> UploadResult<()> {
        // Hold the write lock for the whole teardown so an in-flight chunk
        // write either finishes first or observes the record already gone.
        let _guard = match self.sessions.writer(id) {
            Some(writer) => Some(writer.lock_owned().await),
            None => None,
        };

        self.kv.delete_file(id).await?;

        match fs::remove_dir_all(self.session_dir(id)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(id = %id, error = %err, "failed to remove upload directory"),
        }

        // Closed last: a writer that missed the lock handoff still finds the
        // entry gone only once the record and directory are too.
        self.sessions.close(id);
        Ok(())
    }

    /// Resolve an access token, delete the session it points at, then drop
    /// the token mapping itself.
    pub async fn delete_by_token(&self, token: &str) -> UploadResult<String> {
        let id = self
            .kv
            .get_token(token)
            .await?
            .ok_or(UploadError::InvalidToken)?;

        self.delete_session(&id).await?;
        self.kv.delete_token(token).await?;
        debug!(id = %id, "deleted upload via access token");
        Ok(id)
    }

    /// Fetch metadata and the current on-disk size for a session.
    ///
    /// Metadata without a file on disk is an inconsistent state; the I/O
    /// error is surfaced rather than masked.
    pub async fn lookup(&self, id: &str) -> UploadResult<FileInfo> {
        let record = self
            .kv
            .get_file(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        let size = fs::metadata(self.session_dir(id).join(&record.filename))
            .await?
            .len();

        Ok(FileInfo {
            filename: record.filename,
            size,
            iv: record.iv,
            salt: record.salt,
        })
    }

    /// Delete every session idle past `threshold`. Returns how many were
    /// reclaimed.
    pub async fn sweep_stale(&self, threshold: Duration) -> usize {
        let mut reclaimed = 0;
        for id in self.sessions.stale(threshold) {
            debug!(id = %id, "reclaiming idle upload session");
            match self.delete_session(&id).await {
                Ok(()) => reclaimed += 1,
                Err(err) => warn!(id = %id, error = %err, "failed to reclaim idle session"),
            }
        }
        reclaimed
    }
}

/// Spawn the janitor task: sweep the session store every
/// [`JANITOR_INTERVAL`], reclaiming sessions idle past [`STALE_AFTER`].
pub fn spawn_janitor(service: UploadService) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
        loop {
            ticker.tick().await;
            let reclaimed = service.sweep_stale(STALE_AFTER).await;
            if reclaimed > 0 {
                debug!(reclaimed, "janitor reclaimed idle upload sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn kv() -> KvStore {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = KvStore::new(Arc::new(db));
        store.migrate().await.unwrap();
        store
    }

    async fn service(dir: &TempDir) -> UploadService {
        UploadService::new(kv().await, dir.path())
    }

    async fn service_with_limits(dir: &TempDir, max_chunk: u64, max_file: u64) -> UploadService {
        UploadService::with_limits(kv().await, dir.path(), max_chunk, max_file)
    }

    fn chunk(bytes: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(vec![Ok(Bytes::from(bytes))])
    }

    const HEADER: &str =
        "1,2,3,4,5,6,7,8,9,10,11,12.13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28";

    #[tokio::test]
    async fn create_append_lookup_round_trip() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;

        let id = svc.create_session("My File (1).txt", None).await.unwrap();
        assert!(id.len() >= 10);
        assert!(svc.sessions.contains(&id));
        assert!(dir.path().join(&id).is_dir());

        svc.append_chunk(&id, chunk(b"hello world".to_vec()))
            .await
            .unwrap();

        let info = svc.lookup(&id).await.unwrap();
        assert_eq!(info.filename, "My_File_1.txt");
        assert_eq!(info.size, 11);
        assert!(info.iv.is_none());
        assert!(info.salt.is_none());
    }

    #[tokio::test]
    async fn chunks_append_rather_than_truncate() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        svc.append_chunk(&id, chunk(vec![1u8; 100])).await.unwrap();
        svc.append_chunk(&id, chunk(vec![2u8; 50])).await.unwrap();

        assert_eq!(svc.lookup(&id).await.unwrap().size, 150);
    }

    #[tokio::test]
    async fn encryption_header_is_stored_verbatim() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;

        let id = svc.create_session("secret.bin", Some(HEADER)).await.unwrap();
        svc.append_chunk(&id, chunk(vec![0u8; 4])).await.unwrap();

        let info = svc.lookup(&id).await.unwrap();
        assert_eq!(info.iv.as_deref(), Some("1,2,3,4,5,6,7,8,9,10,11,12"));
        assert_eq!(
            info.salt.as_deref(),
            Some("13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28")
        );
    }

    #[tokio::test]
    async fn malformed_encryption_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;

        let err = svc
            .create_session("secret.bin", Some("1,2,3.4,5,6"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidEncryptionHeader));
        assert!(svc.sessions.is_empty());
    }

    #[tokio::test]
    async fn unusable_filenames_are_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;

        for name in ["", "   ", "日本語", "/../!!"] {
            let err = svc.create_session(name, None).await.unwrap_err();
            assert!(matches!(err, UploadError::InvalidFilename), "{name:?}");
        }
        assert!(svc.sessions.is_empty());
    }

    #[tokio::test]
    async fn oversized_chunk_tears_down_the_session() {
        let dir = TempDir::new().unwrap();
        let svc = service_with_limits(&dir, 8, 1024).await;
        let id = svc.create_session("big.bin", None).await.unwrap();

        let err = svc.append_chunk(&id, chunk(vec![0u8; 9])).await.unwrap_err();
        assert!(matches!(err, UploadError::ChunkTooLarge));

        assert!(matches!(
            svc.lookup(&id).await.unwrap_err(),
            UploadError::NotFound(_)
        ));
        assert!(!svc.sessions.contains(&id));
        assert!(!dir.path().join(&id).exists());
    }

    #[tokio::test]
    async fn reaching_the_file_limit_exactly_fails() {
        let dir = TempDir::new().unwrap();
        let svc = service_with_limits(&dir, 64, 32).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        svc.append_chunk(&id, chunk(vec![0u8; 16])).await.unwrap();
        let err = svc
            .append_chunk(&id, chunk(vec![0u8; 16]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FileTooLarge));
        assert!(matches!(
            svc.lookup(&id).await.unwrap_err(),
            UploadError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn staying_under_the_file_limit_succeeds() {
        let dir = TempDir::new().unwrap();
        let svc = service_with_limits(&dir, 64, 32).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        svc.append_chunk(&id, chunk(vec![0u8; 16])).await.unwrap();
        svc.append_chunk(&id, chunk(vec![0u8; 15])).await.unwrap();

        assert_eq!(svc.lookup(&id).await.unwrap().size, 31);
        assert!(svc.sessions.contains(&id));
    }

    #[tokio::test]
    async fn append_to_unknown_session_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;

        let err = svc
            .append_chunk("no-such-id", chunk(vec![0u8; 4]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownSession(_)));
        assert!(svc.sessions.is_empty());
    }

    #[tokio::test]
    async fn finalize_without_chunks_then_delete_by_token() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("empty.txt", None).await.unwrap();

        let (file, token) = svc.finalize_session(&id).await.unwrap();
        assert_eq!(file, format!("{id}/empty.txt"));
        assert!(!svc.sessions.contains(&id));

        // Finalize removed the session entry but kept the metadata.
        assert!(svc.kv.get_file(&id).await.unwrap().is_some());

        let deleted = svc.delete_by_token(&token).await.unwrap();
        assert_eq!(deleted, id);
        assert!(matches!(
            svc.lookup(&id).await.unwrap_err(),
            UploadError::NotFound(_)
        ));

        // The token mapping went with it.
        let err = svc.delete_by_token(&token).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidToken));
    }

    #[tokio::test]
    async fn finalize_is_tolerant_of_a_missing_session_entry() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        svc.sessions.close(&id);
        let (_, token) = svc.finalize_session(&id).await.unwrap();
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        svc.delete_session(&id).await.unwrap();
        assert!(!svc.sessions.contains(&id));
        assert!(!dir.path().join(&id).exists());

        // Second delete is a no-op, not an error.
        svc.delete_session(&id).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_reclaims_idle_sessions() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let reclaimed = svc.sweep_stale(Duration::ZERO).await;
        assert_eq!(reclaimed, 1);

        assert!(svc.sessions.is_empty());
        assert!(matches!(
            svc.lookup(&id).await.unwrap_err(),
            UploadError::NotFound(_)
        ));
        assert!(!dir.path().join(&id).exists());
    }

    #[tokio::test]
    async fn sweep_leaves_active_sessions_alone() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        assert_eq!(svc.sweep_stale(Duration::from_secs(60)).await, 0);
        assert!(svc.sessions.contains(&id));
    }

    #[tokio::test]
    async fn append_racing_a_sweep_never_leaves_partial_state() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        let sweeper = svc.clone();
        let sweep_id = id.clone();
        let sweep = tokio::spawn(async move { sweeper.delete_session(&sweep_id).await });

        let append = svc.append_chunk(&id, chunk(vec![0u8; 64])).await;
        sweep.await.unwrap().unwrap();

        match append {
            // Append won the race; the delete still removed everything after.
            Ok(()) => {}
            Err(UploadError::UnknownSession(_)) => {}
            Err(other) => panic!("unexpected append outcome: {other}"),
        }
        assert!(svc.kv.get_file(&id).await.unwrap().is_none());
        assert!(!dir.path().join(&id).exists());
    }

    #[tokio::test]
    async fn lookup_on_never_appended_session_surfaces_io_error() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let id = svc.create_session("data.bin", None).await.unwrap();

        // Metadata exists but no chunk was ever written: inconsistent for
        // lookup purposes, reported as an I/O error.
        assert!(matches!(
            svc.lookup(&id).await.unwrap_err(),
            UploadError::Io(_)
        ));
    }
}
