use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for any incoming frame before the peer is considered dead.
///
/// Slice writes on the server side can take a while for large chunks, so
/// this is generous compared to the ping period.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(10);

/// Maximum message size in bytes (64 MiB).
///
/// A binary slice frame is `chunk_size` plus a small JSON header, so this
/// caps the chunk size usable over the WebSocket binding.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Headroom reserved for the JSON header of a binary slice frame.
pub const SLICE_HEADER_RESERVE: usize = 64 * 1024;

/// Largest chunk size a session may use: one slice plus its header must
/// fit in a single WebSocket message.
pub const MAX_CHUNK_SIZE: u64 = (WS_MAX_MESSAGE_SIZE - SLICE_HEADER_RESERVE) as u64;

/// Timeout for request/response operations (text messages).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for binary slice uploads.
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// Status codes carried in every response, mirroring HTTP semantics.
pub const STATUS_OK: u16 = 200;
pub const STATUS_PARTIAL: u16 = 206;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_UNPROCESSABLE: u16 = 422;
pub const STATUS_INTERNAL: u16 = 500;
pub const STATUS_NOT_IMPLEMENTED: u16 = 501;

/// Default human-readable text for a status code.
pub fn status_text(code: u16) -> &'static str {
    match code {
        STATUS_OK => "OK",
        STATUS_PARTIAL => "Partial Content",
        STATUS_BAD_REQUEST => "Bad Request",
        STATUS_NOT_FOUND => "Not Found",
        STATUS_CONFLICT => "Conflict",
        STATUS_UNPROCESSABLE => "Unprocessable Entity",
        STATUS_INTERNAL => "Internal Server Error",
        STATUS_NOT_IMPLEMENTED => "Not Implemented",
        _ => "",
    }
}

/// Message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "create_session")]
    CreateSession,
    #[serde(rename = "get_session_meta")]
    GetSessionMeta,
    #[serde(rename = "upload_slice")]
    UploadSlice,
    #[serde(rename = "ping")]
    Ping,

    // Responses from server to client
    #[serde(rename = "session_meta")]
    SessionMeta,
    #[serde(rename = "slice_ack")]
    SliceAck,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,

    /// Catch-all for unknown message types.
    #[serde(other)]
    Unknown,
}
