//! Local progress documents, keyed by file name and size.

use std::path::{Path, PathBuf};

use sliceup_protocol::FileMeta;

use crate::UploadError;

/// Stores the client's copy of each session document as JSON under a
/// cache directory. Only used to resume; the server's copy is
/// authoritative.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    dir: PathBuf,
}

impl ProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Key for a local file: `file_meta_<name>_<size>`.
    pub fn key(file_name: &str, file_size: u64) -> String {
        format!("file_meta_{file_name}_{file_size}")
    }

    pub fn path(&self, file_name: &str, file_size: u64) -> PathBuf {
        self.dir
            .join(format!("{}.json", Self::key(file_name, file_size)))
    }

    /// Loads saved progress. A missing or unreadable document yields `None`.
    pub async fn load(&self, file_name: &str, file_size: u64) -> Option<FileMeta> {
        let path = self.path(file_name, file_size);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt progress file");
                None
            }
        }
    }

    pub async fn save(
        &self,
        file_name: &str,
        file_size: u64,
        meta: &FileMeta,
    ) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(file_name, file_size);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(meta)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Removes saved progress. Returns `true` if a document existed.
    pub async fn clear(&self, file_name: &str, file_size: u64) -> Result<bool, UploadError> {
        match tokio::fs::remove_file(self.path(file_name, file_size)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
