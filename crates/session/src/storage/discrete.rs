use std::path::PathBuf;
use std::sync::Arc;

use sliceup_protocol::{FileMeta, StorageMode};
use tokio::io::AsyncWriteExt;

use super::{SliceStorage, SliceWrite, StorageFuture, prepare_destination};
use crate::{Layout, SessionError};

/// One file per slice; concatenated in index order on completion.
#[derive(Debug, Clone)]
pub struct DiscreteStorage {
    layout: Arc<Layout>,
}

impl DiscreteStorage {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    async fn write(&self, write: SliceWrite<'_>) -> Result<(), SessionError> {
        let file_id = &write.meta.file_id;
        let path = self.layout.slice_path(file_id, write.index, write.sha1);

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(write.data).await?;
        file.sync_all().await?;

        match write.previous_sha1() {
            Some(previous) if previous != write.sha1 => {
                let stale = self.layout.slice_path(file_id, write.index, previous);
                match tokio::fs::remove_file(&stale).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!(
                        file_id = %file_id,
                        slice = write.index,
                        error = %e,
                        "failed to remove stale slice file"
                    ),
                }
            }
            _ => {}
        }

        Ok(())
    }

    async fn merge(&self, meta: &FileMeta) -> Result<PathBuf, SessionError> {
        let dest = self.layout.destination_path(meta);
        prepare_destination(&dest).await?;

        let mut out = tokio::fs::File::create(&dest).await?;
        for index in 0..meta.slice_count() {
            let missing = || SessionError::MissingSlice {
                file_id: meta.file_id.clone(),
                index,
            };
            let slice = meta.slice(index).ok_or_else(missing)?;
            let path = self.layout.slice_path(&meta.file_id, index, &slice.sha1);

            let mut input = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
                Err(e) => return Err(e.into()),
            };
            tokio::io::copy(&mut input, &mut out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;

        Ok(dest)
    }
}

impl SliceStorage for DiscreteStorage {
    fn mode(&self) -> StorageMode {
        StorageMode::Discrete
    }

    fn write_slice<'a>(&'a self, write: SliceWrite<'a>) -> StorageFuture<'a, ()> {
        Box::pin(self.write(write))
    }

    fn on_all_slices_uploaded<'a>(&'a self, meta: &'a FileMeta) -> StorageFuture<'a, PathBuf> {
        Box::pin(self.merge(meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sliceup_protocol::Slice;
    use sliceup_transfer::checksum_bytes;
    use tempfile::TempDir;

    fn setup(dir: &std::path::Path) -> (Arc<Layout>, FileMeta) {
        let layout = Arc::new(Layout::new(
            dir.join("cache"),
            dir.join("upload"),
            dir.join("meta"),
        ));
        std::fs::create_dir_all(layout.session_dir("s")).unwrap();
        let meta = FileMeta {
            file_id: "s".into(),
            file_name: "out.bin".into(),
            file_type: "bin".into(),
            file_size: 6,
            chunk_size: 4,
            prefix: "nested".into(),
            created_at: 0,
            status: Default::default(),
            storage: StorageMode::Discrete,
            slices: (0..2).map(|i| (i.to_string(), Slice::pending(i))).collect(),
        };
        (layout, meta)
    }

    #[tokio::test]
    async fn rewrite_with_new_hash_removes_stale_file() {
        let dir = TempDir::new().unwrap();
        let (layout, mut meta) = setup(dir.path());
        let storage = DiscreteStorage::new(layout.clone());

        let old = checksum_bytes(b"AAAA");
        storage
            .write_slice(SliceWrite { meta: &meta, index: 0, sha1: &old, data: b"AAAA" })
            .await
            .unwrap();
        meta.mark_uploaded(0, old.clone());

        let new = checksum_bytes(b"BBBB");
        storage
            .write_slice(SliceWrite { meta: &meta, index: 0, sha1: &new, data: b"BBBB" })
            .await
            .unwrap();

        assert!(!layout.slice_path("s", 0, &old).exists());
        assert!(layout.slice_path("s", 0, &new).exists());
    }

    #[tokio::test]
    async fn merge_concatenates_in_index_order() {
        let dir = TempDir::new().unwrap();
        let (layout, mut meta) = setup(dir.path());
        let storage = DiscreteStorage::new(layout.clone());

        for (index, data) in [(1u64, &b"EF"[..]), (0, &b"ABCD"[..])] {
            let sha1 = checksum_bytes(data);
            storage
                .write_slice(SliceWrite { meta: &meta, index, sha1: &sha1, data })
                .await
                .unwrap();
            meta.mark_uploaded(index, sha1);
        }

        let dest = storage.on_all_slices_uploaded(&meta).await.unwrap();
        assert_eq!(dest, dir.path().join("upload/nested/out.bin"));
        assert_eq!(std::fs::read(dest).unwrap(), b"ABCDEF");
    }

    #[tokio::test]
    async fn merge_fails_when_slice_file_missing() {
        let dir = TempDir::new().unwrap();
        let (layout, mut meta) = setup(dir.path());
        let storage = DiscreteStorage::new(layout);

        meta.mark_uploaded(0, checksum_bytes(b"ABCD"));
        meta.mark_uploaded(1, checksum_bytes(b"EF"));

        let err = storage.on_all_slices_uploaded(&meta).await.unwrap_err();
        assert!(matches!(err, SessionError::MissingSlice { index: 0, .. }));
    }
}
