//! Upload driver: session bootstrap, bounded slice pool, local progress.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use sliceup_protocol::FileMeta;
use sliceup_protocol::messages::{CreateSessionRequest, SliceUploadHeader, UploadOutcome};
use sliceup_transfer::SliceReader;

use crate::{
    Progress, ProgressCallback, ProgressStore, SessionTransport, UploadError, UploadOptions,
    UploadSummary,
};

const FALLBACK_FILE_TYPE: &str = "application/octet-stream";

/// Drives one local file through a resumable upload session.
pub struct Uploader {
    pub(crate) transport: Arc<dyn SessionTransport>,
    pub(crate) path: PathBuf,
    file_name: String,
    file_type: String,
    file_size: u64,
    options: UploadOptions,
    pub(crate) store: ProgressStore,
    pub(crate) meta: Option<FileMeta>,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl Uploader {
    /// Prepares an upload of `path`, picking up saved progress for the
    /// same file name and size if there is any.
    pub async fn open(
        transport: Arc<dyn SessionTransport>,
        path: impl Into<PathBuf>,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        let path = path.into();
        let file_size = tokio::fs::metadata(&path).await?.len();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::Validation(format!("not a file: {}", path.display())))?
            .to_string();
        let file_type = file_type_of(&path);

        let store = ProgressStore::new(options.cache_dir.clone());
        let meta = store.load(&file_name, file_size).await;
        if let Some(meta) = &meta {
            tracing::info!(
                file_id = %meta.file_id,
                uploaded = meta.uploaded_count(),
                total = meta.slice_count(),
                "found saved progress"
            );
        }

        Ok(Self {
            transport,
            path,
            file_name,
            file_type,
            file_size,
            options,
            store,
            meta,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    /// Token that stops the next slice from starting when cancelled.
    ///
    /// A cancelled run installs a fresh token, so fetch it again before
    /// each call to [`upload`](Self::upload).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_progress_callback(&mut self, callback: impl Fn(Progress) + Send + Sync + 'static) {
        self.progress = Some(Arc::new(callback));
    }

    /// The local copy of the session document, if a session exists.
    pub fn meta(&self) -> Option<&FileMeta> {
        self.meta.as_ref()
    }

    pub fn file_id(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.file_id.as_str())
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Drops local progress. The next upload starts a new session.
    pub async fn forget(&mut self) -> Result<bool, UploadError> {
        self.meta = None;
        self.store.clear(&self.file_name, self.file_size).await
    }

    pub(crate) async fn save_local(&self) -> Result<(), UploadError> {
        match &self.meta {
            Some(meta) => self.store.save(&self.file_name, self.file_size, meta).await,
            None => Ok(()),
        }
    }

    /// Uploads every slice still pending in the local document.
    ///
    /// Stops dispatching on the first failure and returns that error once
    /// the in-flight slices have settled. Progress made before the failure
    /// is saved, so calling again resumes where this call stopped.
    pub async fn upload(&mut self) -> Result<UploadSummary, UploadError> {
        let result = self.run_pool().await;
        if matches!(result, Err(UploadError::UserCanceled)) {
            self.cancel = CancellationToken::new();
        }
        result
    }

    async fn ensure_session(&mut self) -> Result<bool, UploadError> {
        if self.meta.is_some() {
            return Ok(true);
        }

        let req = CreateSessionRequest {
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            file_size: self.file_size,
            chunk_size: self.options.chunk_size,
            prefix: self.options.prefix.clone(),
            storage: self.options.storage,
        };
        let meta = self.transport.create_session(&req).await?;
        tracing::info!(file_id = %meta.file_id, slices = meta.slice_count(), "session created");
        self.meta = Some(meta);
        self.save_local().await?;
        Ok(false)
    }

    async fn run_pool(&mut self) -> Result<UploadSummary, UploadError> {
        let resumed = self.ensure_session().await?;
        let meta = self.meta.as_ref().ok_or(UploadError::NoSession)?;
        let pending = meta.pending_indices();
        let total = meta.slice_count();
        let file_id = meta.file_id.clone();

        let job = Arc::new(SliceJob {
            transport: self.transport.clone(),
            path: self.path.clone(),
            template: header_for(meta, 0),
            chunk_size: meta.chunk_size,
            cancel: self.cancel.clone(),
            stop: AtomicBool::new(false),
        });

        tracing::debug!(%file_id, pending = pending.len(), total, "dispatching slices");

        let mut results = stream::iter(pending)
            .map(|index| {
                let job = job.clone();
                async move { job.run(index).await }
            })
            .buffer_unordered(self.options.concurrency.max(1));

        let mut uploaded = 0;
        let mut first_error = None;
        while let Some(result) = results.next().await {
            match result {
                Ok(Some((index, sha1, outcome))) => {
                    uploaded += 1;
                    let Some(meta) = self.meta.as_mut() else {
                        continue;
                    };
                    meta.mark_uploaded(index, sha1);
                    let finished = meta.uploaded_count();
                    // Unsaved progress would make a later resume disagree
                    // with what the server holds, so this ends the run.
                    if let Err(e) = self.store.save(&self.file_name, self.file_size, meta).await {
                        tracing::error!(slice = index, error = %e, "failed to save progress");
                        job.stop.store(true, Ordering::SeqCst);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        continue;
                    }
                    if outcome == UploadOutcome::Complete {
                        tracing::info!(%file_id, "server merged the file");
                    }
                    if let Some(cb) = &self.progress {
                        cb(Progress { finished, total });
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            if e.is_canceled() {
                tracing::info!(%file_id, uploaded, "upload canceled");
            } else {
                tracing::warn!(%file_id, uploaded, error = %e, "upload stopped");
            }
            return Err(e);
        }

        Ok(UploadSummary {
            file_id,
            total_slices: total,
            uploaded,
            resumed,
        })
    }
}

/// What every slice task needs, shared across the pool.
struct SliceJob {
    transport: Arc<dyn SessionTransport>,
    path: PathBuf,
    template: SliceUploadHeader,
    chunk_size: u64,
    cancel: CancellationToken,
    stop: AtomicBool,
}

impl SliceJob {
    /// Uploads one slice. `Ok(None)` means it was skipped because an
    /// earlier task failed.
    async fn run(&self, index: u64) -> Result<Option<(u64, String, UploadOutcome)>, UploadError> {
        if self.stop.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            self.stop.store(true, Ordering::SeqCst);
            return Err(UploadError::UserCanceled);
        }

        let result = self.send(index).await;
        if result.is_err() {
            self.stop.store(true, Ordering::SeqCst);
        }
        result.map(Some)
    }

    async fn send(&self, index: u64) -> Result<(u64, String, UploadOutcome), UploadError> {
        let data = read_slice(&self.path, self.chunk_size, index).await?;
        let header = SliceUploadHeader {
            slice_id: index.to_string(),
            ..self.template.clone()
        };
        let ack = self.transport.upload_slice(&header, &data).await?;
        tracing::debug!(slice = index, outcome = ?ack.outcome, "slice acknowledged");
        Ok((index, ack.sha1, ack.outcome))
    }
}

/// Reads slice `index` of `path` on the blocking pool.
pub(crate) async fn read_slice(
    path: &Path,
    chunk_size: u64,
    index: u64,
) -> Result<Vec<u8>, UploadError> {
    let path = path.to_path_buf();
    let data = tokio::task::spawn_blocking(move || {
        SliceReader::open(&path, chunk_size)?.read_slice(index)
    })
    .await
    .map_err(|e| UploadError::Io(std::io::Error::other(format!("task join error: {e}"))))??;
    Ok(data)
}

pub(crate) fn header_for(meta: &FileMeta, index: u64) -> SliceUploadHeader {
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

/// The file extension with its dot (`.mp4`), or a generic type.
fn file_type_of(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{ext}"),
        _ => FALLBACK_FILE_TYPE.to_string(),
    }
}
