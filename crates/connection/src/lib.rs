//! WebSocket client for talking to a sliceup upload server.
//!
//! Requests are correlated with responses by message id; slices travel as
//! binary frames and are answered with text replies.

mod pumps;
pub mod ws_client;

pub use ws_client::{WsClient, WsError};
