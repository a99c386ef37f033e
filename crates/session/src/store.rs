//! Whole-document persistence for session documents.

use std::path::Path;
use std::sync::Arc;

use sliceup_protocol::FileMeta;

use crate::{Layout, SessionError};

/// Reads and writes working and archived session documents.
///
/// Writes go to a sibling temp file which is then renamed over the
/// target, so a reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct SessionStore {
    layout: Arc<Layout>,
}

impl SessionStore {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    /// Loads the working document. `Ok(None)` if the session has no
    /// working document.
    pub async fn load_working(&self, file_id: &str) -> Result<Option<FileMeta>, SessionError> {
        read_meta(&self.layout.meta_path(file_id)).await
    }

    pub async fn save_working(&self, meta: &FileMeta) -> Result<(), SessionError> {
        write_meta(&self.layout.meta_path(&meta.file_id), meta).await
    }

    pub async fn load_archived(&self, file_id: &str) -> Result<Option<FileMeta>, SessionError> {
        read_meta(&self.layout.archived_meta_path(file_id)).await
    }

    /// Copies the final document into the meta root.
    pub async fn archive(&self, meta: &FileMeta) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(self.layout.meta_root()).await?;
        write_meta(&self.layout.archived_meta_path(&meta.file_id), meta).await
    }

    /// Removes the session's cache directory and everything in it.
    pub async fn remove_session_dir(&self, file_id: &str) -> Result<(), SessionError> {
        match tokio::fs::remove_dir_all(self.layout.session_dir(file_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_meta(path: &Path) -> Result<Option<FileMeta>, SessionError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn write_meta(path: &Path, meta: &FileMeta) -> Result<(), SessionError> {
    let json = serde_json::to_vec(meta)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
