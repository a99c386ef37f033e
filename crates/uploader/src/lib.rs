//! Client side of resumable chunked uploads.
//!
//! [`Uploader`] drives one file through a [`SessionTransport`]: it opens
//! (or resumes) a session, uploads pending slices through a bounded pool,
//! persists progress locally after every acknowledged slice, and can
//! verify the server's recorded hashes against the local file.

mod checksum;
pub mod error;
pub mod store;
pub mod transport;
pub mod types;
mod uploader;

#[cfg(test)]
mod test_support;

pub use error::UploadError;
pub use store::ProgressStore;
pub use transport::{SessionTransport, TransportFuture};
pub use types::{CheckReport, Progress, ProgressCallback, UploadOptions, UploadSummary};
pub use uploader::Uploader;
