use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sliceup_protocol::{FileMeta, StorageMode};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::{SliceStorage, SliceWrite, StorageFuture, prepare_destination};
use crate::{Layout, SessionError};

/// A single working file, sized to the final length up front and written
/// at each slice's offset. Completion is a rename.
#[derive(Debug, Clone)]
pub struct SparseStorage {
    layout: Arc<Layout>,
}

impl SparseStorage {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    async fn write(&self, write: SliceWrite<'_>) -> Result<(), SessionError> {
        let meta = write.meta;
        let path = self.layout.working_path(&meta.file_id);
        // Once a slice is recorded the working file holds its bytes; a
        // missing file then means it was lost or already renamed into
        // place, and a fresh zero-filled one must not replace it.
        if meta.uploaded_count() == 0 {
            ensure_working_file(&path, meta.file_size).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new().write(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let index = (0..meta.slice_count())
                    .find(|&i| meta.slice(i).is_some_and(|s| s.is_uploaded()))
                    .unwrap_or(0);
                return Err(SessionError::MissingSlice {
                    file_id: meta.file_id.clone(),
                    index,
                });
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(write.index * meta.chunk_size))
            .await?;
        file.write_all(write.data).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn finish(&self, meta: &FileMeta) -> Result<PathBuf, SessionError> {
        let working = self.layout.working_path(&meta.file_id);
        let dest = self.layout.destination_path(meta);
        prepare_destination(&dest).await?;

        if let Err(e) = tokio::fs::rename(&working, &dest).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(SessionError::MissingSlice {
                    file_id: meta.file_id.clone(),
                    index: 0,
                });
            }
            // Cache and upload roots may sit on different filesystems.
            tracing::debug!(error = %e, "rename failed, copying working file");
            tokio::fs::copy(&working, &dest).await?;
            tokio::fs::remove_file(&working).await?;
        }

        Ok(dest)
    }
}

/// Creates the working file at its final length if it does not exist yet.
async fn ensure_working_file(path: &Path, file_size: u64) -> Result<(), SessionError> {
    let created = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    match created {
        Ok(mut file) => {
            file.seek(SeekFrom::Start(file_size.saturating_sub(1))).await?;
            file.write_all(&[0]).await?;
            file.sync_data().await?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl SliceStorage for SparseStorage {
    fn mode(&self) -> StorageMode {
        StorageMode::Sparse
    }

    fn write_slice<'a>(&'a self, write: SliceWrite<'a>) -> StorageFuture<'a, ()> {
        Box::pin(self.write(write))
    }

    fn on_all_slices_uploaded<'a>(&'a self, meta: &'a FileMeta) -> StorageFuture<'a, PathBuf> {
        Box::pin(self.finish(meta))
    }
}
