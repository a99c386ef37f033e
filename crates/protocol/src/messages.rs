use serde::{Deserialize, Serialize};

use crate::constants::{STATUS_OK, STATUS_PARTIAL};
use crate::types::StorageMode;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_size: u64,
    #[serde(default)]
    pub prefix: String,
    /// Storage strategy for this session; the server default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageMode>,
}

/// Fetches the current session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSessionMetaRequest {
    pub file_id: String,
}

/// Header of a binary slice upload.
///
/// The file attributes are repeated on every slice so the server can
/// detect a client that is talking about a different file than the one
/// the session was created for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceUploadHeader {
    /// Request correlation id (filled in by the transport).
    #[serde(default)]
    pub id: String,
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_size: u64,
    /// Slice index as a decimal string.
    pub slice_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Result of an accepted slice write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Slice stored; other slices are still pending.
    Partial,
    /// Slice stored and the session has been merged.
    Complete,
}

impl UploadOutcome {
    /// Status code for this outcome (`206` or `200`).
    pub fn code(self) -> u16 {
        match self {
            UploadOutcome::Partial => STATUS_PARTIAL,
            UploadOutcome::Complete => STATUS_OK,
        }
    }

    /// Maps a success status code back to an outcome.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            STATUS_PARTIAL => Some(UploadOutcome::Partial),
            STATUS_OK => Some(UploadOutcome::Complete),
            _ => None,
        }
    }
}

/// Acknowledges one slice write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceAck {
    pub file_id: String,
    pub slice_id: String,
    pub sha1: String,
    pub outcome: UploadOutcome,
}
