//! Wire and on-disk types shared by the sliceup server and client.
//!
//! The session document ([`FileMeta`]) is persisted verbatim as
//! `meta.json`, so its JSON shape is part of the storage format as well
//! as the protocol.

pub mod constants;
pub mod envelope;
pub mod frame;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::Message;
pub use types::{FileMeta, SessionStatus, Slice, SliceStatus, StorageMode};
