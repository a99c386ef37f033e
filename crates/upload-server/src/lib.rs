//! WebSocket server for resumable slice uploads.
//!
//! Accepts any number of client connections, dispatches JSON requests and
//! binary slice frames to a [`Handler`], and manages each connection's
//! lifecycle (ping/pong, graceful shutdown). Every request is handled on
//! its own task, so slices arriving on one connection are processed
//! concurrently.

mod connection;
mod handler;
mod server;

pub use connection::{ClientConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, UploadServer};

/// Send buffer capacity per connection.
///
/// Each in-flight slice produces one ack; clients with a large pool and
/// several sessions can queue a few hundred replies at once.
pub const SEND_BUFFER_SIZE: usize = 1024;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
