//! Slice planning, content hashing and path validation.
//!
//! Shared by the server (hashing received slices, validating session
//! parameters) and the client (reading slices out of a local file).

mod chunked;
mod validation;

pub use chunked::{
    SliceReader, calculate_file_checksum, checksum_bytes, slice_count, slice_len, slice_range,
};
pub use validation::{validate_file_name, validate_prefix, validate_upload_path};

/// Default chunk size: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Smallest chunk size a session may be created with.
pub const MIN_CHUNK_SIZE: u64 = 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("slice {index} out of range (session has {count} slices)")]
    SliceOutOfRange { index: u64, count: u64 },
}
