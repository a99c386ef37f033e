//! Session error types.

use sliceup_protocol::constants::{
    STATUS_BAD_REQUEST, STATUS_INTERNAL, STATUS_NOT_FOUND, STATUS_UNPROCESSABLE,
};
use sliceup_transfer::TransferError;

/// Errors produced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Malformed or missing parameters; rejected before any I/O.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The request describes a different file than the stored session.
    #[error("session mismatch: {0}")]
    Conflict(String),

    /// A slice was sent for a session whose document cannot be read.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// No working or archived document exists for the session.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The document claims a slice is uploaded but its bytes are gone.
    #[error("slice {index} of session {file_id} is missing from the slice cache")]
    MissingSlice { file_id: String, index: u64 },

    /// Every generated session id collided with an existing directory.
    #[error("could not allocate a session id after {0} attempts")]
    IdExhausted(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// Status code reported to the caller.
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::Validation(_) => STATUS_BAD_REQUEST,
            SessionError::Conflict(_) | SessionError::UnknownSession(_) => STATUS_UNPROCESSABLE,
            SessionError::NotFound(_) => STATUS_NOT_FOUND,
            SessionError::MissingSlice { .. }
            | SessionError::IdExhausted(_)
            | SessionError::Io(_)
            | SessionError::Json(_) => STATUS_INTERNAL,
        }
    }
}

impl From<TransferError> for SessionError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(io) => SessionError::Io(io),
            other => SessionError::Validation(other.to_string()),
        }
    }
}
