//! WebSocket client for the upload server.
//!
//! Requests are correlated with replies by UUID. Slice uploads travel as
//! binary frames built by [`sliceup_protocol::frame`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use sliceup_protocol::FileMeta;
use sliceup_protocol::constants::{
    MessageType, WS_BINARY_REQUEST_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_REQUEST_TIMEOUT,
};
use sliceup_protocol::envelope::Message;
use sliceup_protocol::frame::{FrameError, encode_slice_frame};
use sliceup_protocol::messages::{
    CreateSessionRequest, GetSessionMetaRequest, SliceAck, SliceUploadHeader,
};

use crate::pumps::PendingMap;
use crate::pumps::write::Outbound;

/// Errors from the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("slice frame: {0}")]
    Frame(#[from] FrameError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// WebSocket client connected to one upload server.
pub struct WsClient {
    write_tx: mpsc::Sender<Outbound>,
    pending: PendingMap,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Connects to an upload server, e.g. `ws://host:8080/ws`.
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<Outbound>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
        ));
        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            pending.clone(),
            write_tx.clone(),
            cancel.clone(),
        ));

        tracing::debug!(%url, "connected to upload server");

        Ok(Self {
            write_tx,
            pending,
            _read_handle: read_handle,
            _write_handle: write_handle,
            cancel,
        })
    }

    /// Returns `false` once the connection has been lost or closed.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.write_tx.is_closed()
    }

    /// Sends a request and waits for the response.
    ///
    /// Error replies are returned as [`WsError::Server`].
    pub async fn request<T: serde::Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, WsError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        self.round_trip(id, Outbound::Text(json), WS_REQUEST_TIMEOUT)
            .await
    }

    /// Sends one slice as a binary frame and waits for the reply.
    ///
    /// A fresh request id replaces whatever `header.id` holds. Slices too
    /// large for one WebSocket message fail with [`WsError::Frame`] before
    /// anything is sent.
    pub async fn send_slice(
        &self,
        header: &SliceUploadHeader,
        data: &[u8],
    ) -> Result<Message, WsError> {
        let id = uuid::Uuid::new_v4().to_string();
        let header = SliceUploadHeader {
            id: id.clone(),
            ..header.clone()
        };

        let frame = encode_slice_frame(&header, data)?;

        // Slice writes hit the disk on the server, so allow longer.
        self.round_trip(id, Outbound::Slice(frame), WS_BINARY_REQUEST_TIMEOUT)
            .await
    }

    async fn round_trip(
        &self,
        id: String,
        frame: Outbound,
        timeout: Duration,
    ) -> Result<Message, WsError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self.write_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(WsError::Closed);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) if resp.is_error() => Err(WsError::Server {
                code: resp.code,
                message: resp.message,
            }),
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(WsError::Closed),
            Err(_) => Err(WsError::Timeout),
        }
    }

    /// Opens a new upload session.
    pub async fn create_session(&self, req: &CreateSessionRequest) -> Result<FileMeta, WsError> {
        let resp = self.request(MessageType::CreateSession, Some(req)).await?;
        required(resp.parse_data()?, "session document")
    }

    /// Fetches the server's current session document.
    pub async fn get_session_meta(&self, file_id: &str) -> Result<FileMeta, WsError> {
        let req = GetSessionMetaRequest {
            file_id: file_id.to_string(),
        };
        let resp = self.request(MessageType::GetSessionMeta, Some(&req)).await?;
        required(resp.parse_data()?, "session document")
    }

    /// Uploads one slice; the ack's outcome tells whether the session merged.
    pub async fn upload_slice(
        &self,
        header: &SliceUploadHeader,
        data: &[u8],
    ) -> Result<SliceAck, WsError> {
        let resp = self.send_slice(header, data).await?;
        required(resp.parse_data()?, "slice ack")
    }

    /// Application-level ping.
    pub async fn ping(&self) -> Result<(), WsError> {
        self.request::<()>(MessageType::Ping, None).await.map(|_| ())
    }

    /// Gracefully closes the connection. The write pump sends the close
    /// frame on its way out.
    pub async fn close(&self) {
        self.cancel.cancel();
    }
}

fn required<T>(data: Option<T>, what: &str) -> Result<T, WsError> {
    data.ok_or_else(|| WsError::Protocol(format!("reply is missing the {what}")))
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
    }
}
