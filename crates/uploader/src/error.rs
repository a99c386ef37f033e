//! Upload error types.

use sliceup_protocol::constants::{
    STATUS_BAD_REQUEST, STATUS_CONFLICT, STATUS_NOT_FOUND, STATUS_UNPROCESSABLE,
};

/// Errors produced while uploading or verifying a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The transport failed before a reply arrived (connection, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by server: {0}")]
    Validation(String),

    /// The server's session does not describe this file.
    #[error("session conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// The caller cancelled the upload.
    #[error("upload canceled by user")]
    UserCanceled,

    /// A mismatched slice could not be repaired.
    #[error("checksum failed for slice {slice_id}")]
    ChecksumFailed { slice_id: u64 },

    #[error("no session for this file")]
    NoSession,

    #[error("transfer error: {0}")]
    Transfer(#[from] sliceup_transfer::TransferError),
}

impl UploadError {
    /// Classifies a failed reply by status code.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            STATUS_BAD_REQUEST => UploadError::Validation(message),
            STATUS_NOT_FOUND => UploadError::NotFound(message),
            STATUS_CONFLICT | STATUS_UNPROCESSABLE => UploadError::Conflict(message),
            code => UploadError::Server { code, message },
        }
    }

    /// `true` for [`UploadError::UserCanceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, UploadError::UserCanceled)
    }
}
