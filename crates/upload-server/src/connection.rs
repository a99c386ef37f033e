//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use sliceup_protocol::constants::{
    MessageType, STATUS_BAD_REQUEST, STATUS_NOT_IMPLEMENTED, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD,
    WS_PONG_WAIT,
};
use sliceup_protocol::envelope::Message;
use sliceup_protocol::frame::parse_slice_frame;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Handle for sending messages to one connected client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the client is gone.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: u16, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Sends an error response correlated by request id only.
    pub fn send_error_for(&self, id: &str, code: u16, message: &str) -> Result<(), SendError> {
        self.send_msg(Message::error(id, code, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to one client.
///
/// Owns the read/write pump tasks and provides a [`Sender`] for
/// asynchronous message delivery.
pub struct ClientConnection {
    pub peer_addr: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected() && !self.cancel.is_cancelled()
    }

    /// Signals shutdown; the pumps exit on their next poll.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tokio tasks and stop when the connection
/// is closed or the server's cancel token is triggered.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    server_cancel: CancellationToken,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let conn = ClientConnection {
        peer_addr,
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel;
    tokio::spawn(async move {
        read_pump(ws_stream, sender, handler.clone(), read_cancel.clone()).await;
        read_cancel.cancel();
        handler.on_disconnected(peer_addr).await;
        tracing::info!(%peer_addr, "client disconnected");
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Read pump: reads WS frames and hands each request to its own task.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    // Any inbound frame counts as liveness; a slow client streaming one
    // large slice may not answer pings until the frame is complete.
    let mut deadline = Box::pin(tokio::time::sleep(WS_PONG_WAIT));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = &mut deadline => {
                tracing::warn!("read timeout, closing connection");
                break;
            }

            frame = stream.next() => {
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                match frame {
                    Some(Ok(ws_msg)) => match ws_msg {
                        WsMessage::Text(text) => {
                            let (h, s) = (handler.clone(), sender.clone());
                            tokio::spawn(async move { dispatch_text(&h, s, text.as_str()).await });
                        }
                        WsMessage::Binary(data) => {
                            if data.len() > WS_MAX_MESSAGE_SIZE {
                                tracing::error!("binary message exceeds max size ({} > {})", data.len(), WS_MAX_MESSAGE_SIZE);
                                continue;
                            }
                            let (h, s) = (handler.clone(), sender.clone());
                            tokio::spawn(async move { dispatch_binary(&h, s, &data).await });
                        }
                        WsMessage::Pong(_) => {}
                        WsMessage::Ping(data) => {
                            let _ = sender.tx.try_send(WsMessage::Pong(data));
                        }
                        WsMessage::Close(_) => {
                            tracing::debug!("received close frame");
                            break;
                        }
                        WsMessage::Frame(_) => {}
                    },
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Dispatches a text (JSON) request to the matching handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("invalid message JSON: {e}");
            return;
        }
    };

    match msg.msg_type {
        MessageType::CreateSession => handler.on_create_session(sender, msg).await,
        MessageType::GetSessionMeta => handler.on_get_session_meta(sender, msg).await,
        MessageType::Ping => handler.on_ping(sender, msg).await,
        MessageType::UploadSlice => {
            let _ = sender.send_error(&msg, STATUS_BAD_REQUEST, "slice data must be sent as a binary frame");
        }
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, STATUS_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}

/// Dispatches a binary slice frame to the handler.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: Sender, data: &[u8]) {
    match parse_slice_frame(data) {
        Ok(frame) => handler.on_upload_slice(sender, frame.header, frame.data).await,
        Err(e) => {
            // Without a parsed header there is no request id to reply to.
            tracing::warn!("failed to parse slice frame: {e}");
        }
    }
}
