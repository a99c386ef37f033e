//! Server side of resumable chunked uploads.
//!
//! A session is created with a slice plan, receives slices in any order
//! (each write serialized by a per-session lock), and is merged into its
//! destination exactly once, by whichever writer observes the last
//! pending slice turning uploaded.
//!
//! # On-disk layout
//!
//! ```text
//! <slice_cache_dir>/<file_id>/meta.json          working session document
//! <slice_cache_dir>/<file_id>/<slice files>      discrete-file storage
//! <slice_cache_dir>/<file_id>/upload.part        sparse-file storage
//! <upload_dir>/[<prefix>/]<file_name>            merged artifact
//! <metafile_dir>/<file_id>.meta.json             document after completion
//! ```

pub mod error;
pub mod layout;
pub mod locks;
pub mod service;
pub mod storage;
pub mod store;

pub use error::SessionError;
pub use layout::{Layout, MAX_ID_ATTEMPTS, new_file_id, validate_file_id};
pub use locks::{InMemoryLockRegistry, LockRegistry, SessionGuard};
pub use service::SessionService;
pub use storage::{DiscreteStorage, SliceStorage, SliceWrite, SparseStorage};
pub use store::SessionStore;
