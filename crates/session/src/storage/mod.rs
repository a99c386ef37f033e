//! Slice storage strategies.
//!
//! Both strategies share the same preamble (lock, compare, write, record)
//! in [`crate::SessionService`]; they differ only in where slice bytes go
//! and how the artifact is assembled.

mod discrete;
mod sparse;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use sliceup_protocol::{FileMeta, StorageMode};

use crate::SessionError;

pub use discrete::DiscreteStorage;
pub use sparse::SparseStorage;

/// Boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

/// One accepted slice, ready to be persisted.
#[derive(Debug)]
pub struct SliceWrite<'a> {
    /// Session document as read under the session lock.
    pub meta: &'a FileMeta,
    pub index: u64,
    /// Hash of `data`.
    pub sha1: &'a str,
    pub data: &'a [u8],
}

impl SliceWrite<'_> {
    /// Hash previously recorded for this slice, if any.
    pub fn previous_sha1(&self) -> Option<&str> {
        self.meta
            .slice(self.index)
            .map(|s| s.sha1.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Where slice bytes live until the session is merged.
///
/// Called only while the session lock is held.
pub trait SliceStorage: Send + Sync {
    fn mode(&self) -> StorageMode;

    /// Persists one slice. Must be durable before the document records
    /// the slice as uploaded.
    fn write_slice<'a>(&'a self, write: SliceWrite<'a>) -> StorageFuture<'a, ()>;

    /// Produces the destination artifact once every slice is uploaded.
    /// Returns the destination path.
    fn on_all_slices_uploaded<'a>(&'a self, meta: &'a FileMeta) -> StorageFuture<'a, PathBuf>;
}

/// Creates the destination's parent directory.
async fn prepare_destination(dest: &std::path::Path) -> Result<(), SessionError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
