use std::path::PathBuf;
use std::sync::Arc;

use sliceup_protocol::StorageMode;
use sliceup_transfer::DEFAULT_CHUNK_SIZE;

/// Default number of slices in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Client-side upload settings.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Slice size for new sessions. A resumed session keeps its own.
    pub chunk_size: u64,
    /// Destination sub-directory on the server.
    pub prefix: String,
    /// Upper bound on concurrent slice uploads.
    pub concurrency: usize,
    /// Storage strategy to request; the server default when `None`.
    pub storage: Option<StorageMode>,
    /// Directory holding local progress documents.
    pub cache_dir: PathBuf,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            prefix: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            storage: None,
            cache_dir: default_cache_dir(),
        }
    }
}

/// `$HOME/.cache/sliceup`, or a temp-dir fallback when `HOME` is unset.
pub fn default_cache_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("sliceup"),
        None => std::env::temp_dir().join("sliceup"),
    }
}

/// Slice-level progress of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub finished: u64,
    pub total: u64,
}

/// Invoked after every acknowledged slice.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Outcome of one [`crate::Uploader::upload`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub file_id: String,
    pub total_slices: u64,
    /// Slices acknowledged during this call.
    pub uploaded: u64,
    /// `true` if the session was picked up from local progress.
    pub resumed: bool,
}

/// Result of a checksum pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Slices whose server hash equals the local hash.
    pub matched: Vec<u64>,
    /// Slices that mismatched and were uploaded again successfully.
    pub repaired: Vec<u64>,
    /// Slices the server has not received yet.
    pub pending: Vec<u64>,
}

impl CheckReport {
    /// `true` when every slice is on the server with the right hash.
    pub fn is_clean(&self) -> bool {
        self.pending.is_empty()
    }
}
