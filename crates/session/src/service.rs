//! Session operations: create, upload slice, fetch document.

use std::sync::Arc;

use sliceup_protocol::constants::MAX_CHUNK_SIZE;
use sliceup_protocol::messages::{CreateSessionRequest, SliceAck, SliceUploadHeader, UploadOutcome};
use sliceup_protocol::{FileMeta, SessionStatus, Slice, StorageMode};
use sliceup_transfer::{
    MIN_CHUNK_SIZE, checksum_bytes, slice_count, slice_len, validate_file_name, validate_prefix,
};

use crate::layout::validate_file_id;
use crate::storage::{DiscreteStorage, SliceStorage, SliceWrite, SparseStorage};
use crate::{InMemoryLockRegistry, Layout, LockRegistry, SessionError, SessionStore};

/// Server-side session state machine.
///
/// Cheap to share behind an `Arc`; all per-session serialization happens
/// inside through the lock registry.
pub struct SessionService {
    layout: Arc<Layout>,
    store: SessionStore,
    locks: Arc<dyn LockRegistry>,
    discrete: DiscreteStorage,
    sparse: SparseStorage,
    default_storage: StorageMode,
}

impl SessionService {
    pub fn new(layout: Layout, default_storage: StorageMode) -> Self {
        let layout = Arc::new(layout);
        Self {
            store: SessionStore::new(layout.clone()),
            locks: Arc::new(InMemoryLockRegistry::new()),
            discrete: DiscreteStorage::new(layout.clone()),
            sparse: SparseStorage::new(layout.clone()),
            layout,
            default_storage,
        }
    }

    /// Replaces the lock registry.
    pub fn with_lock_registry(mut self, locks: Arc<dyn LockRegistry>) -> Self {
        self.locks = locks;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn default_storage(&self) -> StorageMode {
        self.default_storage
    }

    fn storage(&self, mode: StorageMode) -> &dyn SliceStorage {
        match mode {
            StorageMode::Discrete => &self.discrete,
            StorageMode::Sparse => &self.sparse,
        }
    }

    /// Opens a new session with every slice pending.
    pub async fn create_session(
        &self,
        req: CreateSessionRequest,
    ) -> Result<FileMeta, SessionError> {
        validate_create(&req)?;

        let (file_id, _dir) = self.layout.allocate_session_dir().await?;
        let count = slice_count(req.file_size, req.chunk_size);
        let meta = FileMeta {
            file_id,
            file_name: req.file_name,
            file_type: req.file_type,
            file_size: req.file_size,
            chunk_size: req.chunk_size,
            prefix: req.prefix,
            created_at: chrono::Utc::now().timestamp(),
            status: SessionStatus::Incomplete,
            storage: req.storage.unwrap_or(self.default_storage),
            slices: (0..count).map(|i| (i.to_string(), Slice::pending(i))).collect(),
        };
        self.store.save_working(&meta).await?;

        tracing::info!(
            file_id = %meta.file_id,
            file_name = %meta.file_name,
            file_size = meta.file_size,
            slices = count,
            storage = %meta.storage,
            "session created"
        );
        Ok(meta)
    }

    /// Stores one slice and merges the session if it was the last one.
    pub async fn upload_slice(
        &self,
        header: &SliceUploadHeader,
        data: &[u8],
    ) -> Result<SliceAck, SessionError> {
        validate_file_id(&header.file_id)?;
        let index: u64 = header.slice_id.parse().map_err(|_| {
            SessionError::Validation(format!("slice_id is not an integer: {:?}", header.slice_id))
        })?;

        let file_id = header.file_id.as_str();
        if !tokio::fs::try_exists(self.layout.meta_path(file_id)).await? {
            return Err(SessionError::UnknownSession(file_id.to_string()));
        }
        let _guard = self.locks.acquire(file_id).await;

        // The session may have been merged while we waited for the lock.
        let Some(stored) = self.store.load_working(file_id).await? else {
            return Err(self.unknown_session(file_id));
        };
        check_matches(&stored, header)?;

        if index >= stored.slice_count() {
            return Err(SessionError::Validation(format!(
                "slice_id {index} out of range (session has {} slices)",
                stored.slice_count()
            )));
        }
        let expected = slice_len(index, stored.file_size, stored.chunk_size)?;
        if data.len() as u64 != expected {
            return Err(SessionError::Validation(format!(
                "slice {index} has {} bytes, expected {expected}",
                data.len()
            )));
        }

        if stored.status == SessionStatus::Complete {
            // Merged, but archiving did not finish. Slice bytes are never
            // written again; only the bookkeeping is redone.
            let sha1 = stored.slice(index).map(|s| s.sha1.clone()).unwrap_or_default();
            self.finalize(self.storage(stored.storage), stored).await?;
            return Ok(SliceAck {
                file_id: file_id.to_string(),
                slice_id: index.to_string(),
                sha1,
                outcome: UploadOutcome::Complete,
            });
        }

        let sha1 = checksum_bytes(data);
        let storage = self.storage(stored.storage);
        storage
            .write_slice(SliceWrite {
                meta: &stored,
                index,
                sha1: &sha1,
                data,
            })
            .await?;

        let Some(mut fresh) = self.store.load_working(file_id).await? else {
            return Err(self.unknown_session(file_id));
        };
        fresh.mark_uploaded(index, sha1.clone());
        self.store.save_working(&fresh).await?;

        tracing::debug!(
            file_id = %file_id,
            slice = index,
            uploaded = fresh.uploaded_count(),
            total = fresh.slice_count(),
            "slice stored"
        );

        let outcome = if fresh.is_complete() {
            self.complete(storage, fresh).await?;
            UploadOutcome::Complete
        } else {
            UploadOutcome::Partial
        };

        Ok(SliceAck {
            file_id: file_id.to_string(),
            slice_id: index.to_string(),
            sha1,
            outcome,
        })
    }

    /// Runs with the session lock held by the caller.
    async fn complete(
        &self,
        storage: &dyn SliceStorage,
        mut meta: FileMeta,
    ) -> Result<(), SessionError> {
        let dest = match storage.on_all_slices_uploaded(&meta).await {
            Ok(dest) => dest,
            Err(e) => {
                tracing::error!(file_id = %meta.file_id, error = %e, "merge failed");
                return Err(e);
            }
        };

        // Recorded in the working copy first: once the artifact exists, a
        // retry must only redo the archive step.
        meta.status = SessionStatus::Complete;
        self.store.save_working(&meta).await?;
        tracing::info!(
            file_id = %meta.file_id,
            dest = %dest.display(),
            storage = %storage.mode(),
            "session merged"
        );

        self.finalize(storage, meta).await
    }

    /// Archives a merged session and drops its cache directory and lock.
    async fn finalize(&self, storage: &dyn SliceStorage, meta: FileMeta) -> Result<(), SessionError> {
        if let Err(e) = self.store.archive(&meta).await {
            tracing::error!(file_id = %meta.file_id, error = %e, "archive failed");
            return Err(e);
        }
        self.store.remove_session_dir(&meta.file_id).await?;
        self.locks.release(&meta.file_id);

        tracing::info!(file_id = %meta.file_id, storage = %storage.mode(), "session complete");
        Ok(())
    }

    /// Drops the lock entry taken for a session that turned out not to
    /// exist.
    fn unknown_session(&self, file_id: &str) -> SessionError {
        self.locks.release(file_id);
        SessionError::UnknownSession(file_id.to_string())
    }

    /// Current document: the working copy while in progress, the archived
    /// copy once complete.
    pub async fn session_meta(&self, file_id: &str) -> Result<FileMeta, SessionError> {
        validate_file_id(file_id)?;
        if let Some(meta) = self.store.load_working(file_id).await? {
            return Ok(meta);
        }
        self.store
            .load_archived(file_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(file_id.to_string()))
    }
}

fn validate_create(req: &CreateSessionRequest) -> Result<(), SessionError> {
    validate_file_name(&req.file_name)?;
    if req.file_type.is_empty() {
        return Err(SessionError::Validation("file_type is required".into()));
    }
    if req.file_size == 0 {
        return Err(SessionError::Validation("file_size must be positive".into()));
    }
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&req.chunk_size) {
        return Err(SessionError::Validation(format!(
            "chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}"
        )));
    }
    validate_prefix(&req.prefix)?;
    Ok(())
}

fn check_matches(stored: &FileMeta, header: &SliceUploadHeader) -> Result<(), SessionError> {
    if header.file_name != stored.file_name {
        return Err(mismatch("file_name", &header.file_name, &stored.file_name));
    }
    if header.file_type != stored.file_type {
        return Err(mismatch("file_type", &header.file_type, &stored.file_type));
    }
    if header.file_size != stored.file_size {
        return Err(mismatch("file_size", &header.file_size, &stored.file_size));
    }
    if header.chunk_size != stored.chunk_size {
        return Err(mismatch("chunk_size", &header.chunk_size, &stored.chunk_size));
    }
    Ok(())
}

fn mismatch(field: &str, declared: &dyn std::fmt::Display, stored: &dyn std::fmt::Display) -> SessionError {
    SessionError::Conflict(format!("{field} {declared} does not match session value {stored}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sliceup_transfer::calculate_file_checksum;
    use std::path::Path;
    use tempfile::TempDir;

    const KB: u64 = 1024;

    fn service(dir: &Path, storage: StorageMode) -> SessionService {
        SessionService::new(
            Layout::new(dir.join("cache"), dir.join("upload"), dir.join("meta")),
            storage,
        )
    }

    fn pattern(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn request(name: &str, size: u64, chunk: u64) -> CreateSessionRequest {
        CreateSessionRequest {
            file_name: name.into(),
            file_type: "application/octet-stream".into(),
            file_size: size,
            chunk_size: chunk,
            prefix: String::new(),
            storage: None,
        }
    }

    fn header(meta: &FileMeta, index: u64) -> SliceUploadHeader {
        SliceUploadHeader {
            id: String::new(),
            file_id: meta.file_id.clone(),
            file_name: meta.file_name.clone(),
            file_type: meta.file_type.clone(),
            file_size: meta.file_size,
            chunk_size: meta.chunk_size,
            slice_id: index.to_string(),
        }
    }

    fn slice_of(data: &[u8], meta: &FileMeta, index: u64) -> Vec<u8> {
        let start = (index * meta.chunk_size) as usize;
        let end = std::cmp::min(start + meta.chunk_size as usize, data.len());
        data[start..end].to_vec()
    }

    async fn upload(svc: &SessionService, meta: &FileMeta, data: &[u8], index: u64) -> SliceAck {
        svc.upload_slice(&header(meta, index), &slice_of(data, meta, index))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_plans_ceil_slices_all_pending() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);

        for (size, chunk, expected) in [(1, KB, 1), (KB, KB, 1), (KB + 1, KB, 2), (10 * KB, 3 * KB, 4)] {
            let meta = svc.create_session(request("a.bin", size, chunk)).await.unwrap();
            assert_eq!(meta.slice_count(), expected);
            assert_eq!(meta.pending_indices(), (0..expected).collect::<Vec<_>>());
            assert!(meta.slices.values().all(|s| s.sha1.is_empty()));
            assert_eq!(meta.file_id.len(), 32);
            assert!(dir.path().join("cache").join(&meta.file_id).join("meta.json").exists());
        }
    }

    #[tokio::test]
    async fn create_rejects_invalid_params() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);

        let mut bad = vec![
            request("a.bin", 0, KB),
            request("a.bin", KB, KB - 1),
            request("", KB, KB),
            request("../a.bin", KB, KB),
        ];
        let mut no_type = request("a.bin", KB, KB);
        no_type.file_type.clear();
        bad.push(no_type);

        for req in bad {
            let err = svc.create_session(req).await.unwrap_err();
            assert_eq!(err.status_code(), 400, "{err}");
        }
        assert!(!dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn chunk_size_must_fit_one_websocket_message() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);

        for chunk in [MAX_CHUNK_SIZE + 1, 128 * KB * KB] {
            let err = svc.create_session(request("big.bin", 4 * KB, chunk)).await.unwrap_err();
            assert!(matches!(err, SessionError::Validation(_)), "{err}");
            assert_eq!(err.status_code(), 400);
        }

        let meta = svc
            .create_session(request("big.bin", 4 * KB, MAX_CHUNK_SIZE))
            .await
            .unwrap();
        assert_eq!(meta.slice_count(), 1);
    }

    #[tokio::test]
    async fn prefix_with_dotdot_always_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);

        for (prefix, size) in [("..", 1), ("a/../b", 5000), ("x/..", 10 * KB), ("a..b", KB)] {
            let mut req = request("ok.bin", size, KB);
            req.prefix = prefix.into();
            assert!(matches!(
                svc.create_session(req).await,
                Err(SessionError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn storage_choice_persists_per_session() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Sparse);

        let default = svc.create_session(request("a.bin", KB, KB)).await.unwrap();
        assert_eq!(default.storage, StorageMode::Sparse);

        let mut req = request("b.bin", KB, KB);
        req.storage = Some(StorageMode::Discrete);
        let chosen = svc.create_session(req).await.unwrap();
        assert_eq!(svc.session_meta(&chosen.file_id).await.unwrap().storage, StorageMode::Discrete);
    }

    #[tokio::test]
    async fn duplicate_slice_is_idempotent_and_merges_once() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);
        let data = pattern(3 * KB);
        let meta = svc.create_session(request("dup.bin", 3 * KB, KB)).await.unwrap();

        let first = upload(&svc, &meta, &data, 1).await;
        let second = upload(&svc, &meta, &data, 1).await;
        assert_eq!(first.outcome, UploadOutcome::Partial);
        assert_eq!(second.outcome, UploadOutcome::Partial);
        assert_eq!(first.sha1, second.sha1);

        let doc = svc.session_meta(&meta.file_id).await.unwrap();
        assert!(doc.slice(1).unwrap().is_uploaded());
        assert_eq!(doc.uploaded_count(), 1);

        assert_eq!(upload(&svc, &meta, &data, 0).await.outcome, UploadOutcome::Partial);
        assert_eq!(upload(&svc, &meta, &data, 2).await.outcome, UploadOutcome::Complete);

        // The session is gone from the cache; a late duplicate cannot merge again.
        let late = svc
            .upload_slice(&header(&meta, 2), &slice_of(&data, &meta, 2))
            .await
            .unwrap_err();
        assert!(matches!(late, SessionError::UnknownSession(_)));
        assert_eq!(late.status_code(), 422);
    }

    async fn assert_permutation(storage: StorageMode, order: &[u64]) {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), storage);
        let size = 5 * KB + 17;
        let data = pattern(size);
        let meta = svc.create_session(request("perm.bin", size, KB)).await.unwrap();
        assert_eq!(meta.slice_count(), order.len() as u64);

        let mut outcomes = Vec::new();
        for &i in order {
            outcomes.push(upload(&svc, &meta, &data, i).await.outcome);
        }
        assert_eq!(outcomes.last(), Some(&UploadOutcome::Complete));
        assert_eq!(
            outcomes.iter().filter(|o| **o == UploadOutcome::Complete).count(),
            1
        );

        let dest = dir.path().join("upload/perm.bin");
        assert_eq!(
            calculate_file_checksum(&dest).unwrap(),
            checksum_bytes(&data),
            "{storage} {order:?}"
        );
        assert!(!dir.path().join("cache").join(&meta.file_id).exists());

        let archived = svc.session_meta(&meta.file_id).await.unwrap();
        assert!(archived.is_complete());
        assert_eq!(archived.status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn any_order_produces_original_bytes_discrete() {
        assert_permutation(StorageMode::Discrete, &[0, 1, 2, 3, 4, 5]).await;
        assert_permutation(StorageMode::Discrete, &[5, 4, 3, 2, 1, 0]).await;
        assert_permutation(StorageMode::Discrete, &[3, 0, 5, 1, 4, 2]).await;
    }

    #[tokio::test]
    async fn any_order_produces_original_bytes_sparse() {
        assert_permutation(StorageMode::Sparse, &[0, 1, 2, 3, 4, 5]).await;
        assert_permutation(StorageMode::Sparse, &[5, 4, 3, 2, 1, 0]).await;
        assert_permutation(StorageMode::Sparse, &[2, 5, 0, 4, 1, 3]).await;
    }

    #[tokio::test]
    async fn interrupted_upload_resumes() {
        const MB: u64 = 1024 * 1024;

        for storage in [StorageMode::Discrete, StorageMode::Sparse] {
            let dir = TempDir::new().unwrap();
            let svc = service(dir.path(), storage);
            let data = pattern(10 * MB);
            let mut req = request("big.bin", 10 * MB, 3 * MB);
            req.prefix = "batch/one".into();
            let meta = svc.create_session(req).await.unwrap();
            assert_eq!(meta.slice_count(), 4);

            upload(&svc, &meta, &data, 0).await;
            upload(&svc, &meta, &data, 2).await;

            let mid = svc.session_meta(&meta.file_id).await.unwrap();
            assert_eq!(mid.uploaded_count(), 2);
            assert_eq!(mid.pending_indices(), vec![1, 3]);

            for i in mid.pending_indices() {
                upload(&svc, &meta, &data, i).await;
            }

            let dest = dir.path().join("upload/batch/one/big.bin");
            assert_eq!(calculate_file_checksum(&dest).unwrap(), checksum_bytes(&data));
            assert!(!dir.path().join("cache").join(&meta.file_id).exists());
            assert!(dir.path().join("meta").join(format!("{}.meta.json", meta.file_id)).exists());
        }
    }

    #[tokio::test]
    async fn mismatched_size_is_conflict_and_document_unchanged() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);
        let data = pattern(2 * KB);
        let meta = svc.create_session(request("c.bin", 2 * KB, KB)).await.unwrap();
        upload(&svc, &meta, &data, 0).await;
        let before = svc.session_meta(&meta.file_id).await.unwrap();

        let mut bad = header(&meta, 1);
        bad.file_size += 1;
        let err = svc.upload_slice(&bad, &slice_of(&data, &meta, 1)).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(_)));
        assert_eq!(err.status_code(), 422);

        let mut renamed = header(&meta, 1);
        renamed.file_name = "other.bin".into();
        assert!(matches!(
            svc.upload_slice(&renamed, &slice_of(&data, &meta, 1)).await,
            Err(SessionError::Conflict(_))
        ));

        assert_eq!(svc.session_meta(&meta.file_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn malformed_slice_requests_are_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Sparse);
        let data = pattern(2 * KB);
        let meta = svc.create_session(request("m.bin", 2 * KB, KB)).await.unwrap();

        let mut h = header(&meta, 0);
        h.slice_id = "zero".into();
        assert_eq!(svc.upload_slice(&h, &data[..1024]).await.unwrap_err().status_code(), 400);

        let h = header(&meta, 2);
        assert_eq!(svc.upload_slice(&h, &data[..1024]).await.unwrap_err().status_code(), 400);

        let h = header(&meta, 1);
        assert_eq!(svc.upload_slice(&h, &data[..10]).await.unwrap_err().status_code(), 400);

        let mut h = header(&meta, 0);
        h.file_id = "../escape".into();
        assert_eq!(svc.upload_slice(&h, &data[..1024]).await.unwrap_err().status_code(), 400);

        assert_eq!(svc.session_meta(&meta.file_id).await.unwrap().uploaded_count(), 0);
    }

    #[tokio::test]
    async fn unknown_session_meta_is_not_found() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);
        let err = svc.session_meta("0123456789abcdef0123456789abcdef").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn missing_slice_file_leaves_session_unmerged() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);
        let data = pattern(2 * KB);
        let meta = svc.create_session(request("gone.bin", 2 * KB, KB)).await.unwrap();

        let ack = upload(&svc, &meta, &data, 0).await;
        let slice_file = svc.layout().slice_path(&meta.file_id, 0, &ack.sha1);
        std::fs::remove_file(slice_file).unwrap();

        let err = svc
            .upload_slice(&header(&meta, 1), &slice_of(&data, &meta, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingSlice { index: 0, .. }));
        assert_eq!(err.status_code(), 500);

        let doc = svc.session_meta(&meta.file_id).await.unwrap();
        assert!(doc.is_complete());
        assert_eq!(doc.status, SessionStatus::Incomplete);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_slices_merge_exactly_once() {
        for storage in [StorageMode::Discrete, StorageMode::Sparse] {
            let dir = TempDir::new().unwrap();
            let registry = Arc::new(InMemoryLockRegistry::new());
            let svc = Arc::new(
                service(dir.path(), storage).with_lock_registry(registry.clone()),
            );
            let data = Arc::new(pattern(8 * KB));
            let meta = svc.create_session(request("conc.bin", 8 * KB, KB)).await.unwrap();

            let mut tasks = tokio::task::JoinSet::new();
            for i in 0..8u64 {
                let svc = svc.clone();
                let data = data.clone();
                let meta = meta.clone();
                tasks.spawn(async move {
                    svc.upload_slice(&header(&meta, i), &slice_of(&data, &meta, i))
                        .await
                });
            }

            let mut complete = 0;
            let mut acked = std::collections::BTreeSet::new();
            while let Some(res) = tasks.join_next().await {
                let ack = res.unwrap().unwrap();
                if ack.outcome == UploadOutcome::Complete {
                    complete += 1;
                }
                acked.insert(ack.slice_id.parse::<u64>().unwrap());
            }
            assert_eq!(complete, 1);
            assert_eq!(acked.len(), 8);

            let archived = svc.session_meta(&meta.file_id).await.unwrap();
            assert_eq!(archived.uploaded_count(), 8);
            assert_eq!(
                calculate_file_checksum(&dir.path().join("upload/conc.bin")).unwrap(),
                checksum_bytes(&data)
            );
            assert!(registry.is_empty());
        }
    }

    #[tokio::test]
    async fn reupload_with_new_bytes_replaces_hash() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), StorageMode::Discrete);
        let data = pattern(2 * KB);
        let meta = svc.create_session(request("r.bin", 2 * KB, KB)).await.unwrap();

        let tampered = vec![0xAA; 1024];
        let first = svc.upload_slice(&header(&meta, 0), &tampered).await.unwrap();
        let fixed = upload(&svc, &meta, &data, 0).await;
        assert_ne!(first.sha1, fixed.sha1);

        let doc = svc.session_meta(&meta.file_id).await.unwrap();
        assert_eq!(doc.slice(0).unwrap().sha1, checksum_bytes(&data[..1024]));
        assert!(!svc.layout().slice_path(&meta.file_id, 0, &first.sha1).exists());
    }

    #[tokio::test]
    async fn unknown_session_uploads_leave_no_lock_entries() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(InMemoryLockRegistry::new());
        let svc = service(dir.path(), StorageMode::Discrete).with_lock_registry(registry.clone());
        let data = pattern(KB);
        let mut meta = svc.create_session(request("u.bin", KB, KB)).await.unwrap();
        upload(&svc, &meta, &data, 0).await;

        // Late duplicate of a merged session.
        let err = svc.upload_slice(&header(&meta, 0), &data).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
        assert_eq!(err.status_code(), 422);

        for i in 0..64 {
            meta.file_id = format!("{i:032x}");
            let err = svc.upload_slice(&header(&meta, 0), &data).await.unwrap_err();
            assert!(matches!(err, SessionError::UnknownSession(_)));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn session_gone_while_waiting_for_lock_releases_entry() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(InMemoryLockRegistry::new());
        let svc = Arc::new(
            service(dir.path(), StorageMode::Discrete).with_lock_registry(registry.clone()),
        );
        let data = pattern(2 * KB);
        let meta = svc.create_session(request("w.bin", 2 * KB, KB)).await.unwrap();

        let held = registry.acquire(&meta.file_id).await;
        let task = {
            let svc = svc.clone();
            let meta = meta.clone();
            let slice = slice_of(&data, &meta, 0);
            tokio::spawn(async move { svc.upload_slice(&header(&meta, 0), &slice).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        std::fs::remove_dir_all(svc.layout().session_dir(&meta.file_id)).unwrap();
        drop(held);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn failed_archive_is_finished_by_a_retry_without_rewriting() {
        for storage in [StorageMode::Sparse, StorageMode::Discrete] {
            let dir = TempDir::new().unwrap();
            let registry = Arc::new(InMemoryLockRegistry::new());
            let svc = service(dir.path(), storage).with_lock_registry(registry.clone());
            let data = pattern(2 * KB + 100);
            let meta = svc.create_session(request("late.bin", 2 * KB + 100, KB)).await.unwrap();
            upload(&svc, &meta, &data, 0).await;
            upload(&svc, &meta, &data, 1).await;

            // A plain file where the meta root should be makes archiving fail.
            let meta_root = dir.path().join("meta");
            std::fs::write(&meta_root, b"in the way").unwrap();
            let err = svc
                .upload_slice(&header(&meta, 2), &slice_of(&data, &meta, 2))
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Io(_)), "{err}");

            let dest = dir.path().join("upload/late.bin");
            assert_eq!(std::fs::read(&dest).unwrap(), data);
            let working = svc.session_meta(&meta.file_id).await.unwrap();
            assert_eq!(working.status, SessionStatus::Complete);

            std::fs::remove_file(&meta_root).unwrap();
            let ack = svc
                .upload_slice(&header(&meta, 2), &slice_of(&data, &meta, 2))
                .await
                .unwrap();
            assert_eq!(ack.outcome, UploadOutcome::Complete);
            assert_eq!(ack.sha1, checksum_bytes(&data[2048..]));

            assert_eq!(std::fs::read(&dest).unwrap(), data);
            assert!(svc.layout().archived_meta_path(&meta.file_id).exists());
            assert!(!svc.layout().session_dir(&meta.file_id).exists());
            assert!(registry.is_empty());
        }
    }
}
