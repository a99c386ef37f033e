//! Handler trait for processing upload requests.
//!
//! Implementors provide the session logic while the server framework
//! handles connection management, routing and the binary frame format.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use sliceup_protocol::MessageType;
use sliceup_protocol::constants::STATUS_NOT_IMPLEMENTED;
use sliceup_protocol::envelope::Message;
use sliceup_protocol::messages::SliceUploadHeader;

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling requests from upload clients.
///
/// Each method receives a `sender` for the reply and the parsed request.
/// Replies must carry the request's `id` so the client can correlate
/// them. Defaults reply "not implemented".
pub trait Handler: Send + Sync + 'static {
    /// Called for `create_session`.
    fn on_create_session(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, STATUS_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `get_session_meta`.
    fn on_get_session_meta(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, STATUS_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for every binary slice frame.
    fn on_upload_slice(
        &self,
        sender: Sender,
        header: SliceUploadHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        let _ = data;
        Box::pin(async move {
            let _ = sender.send_error_for(&header.id, STATUS_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `ping`.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, 200, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called after a client's read pump exits.
    fn on_disconnected(&self, peer_addr: SocketAddr) -> HandlerFuture<'_> {
        let _ = peer_addr;
        Box::pin(async {})
    }
}
