//! Wires the session service to the WebSocket server.

use std::sync::Arc;

use sliceup_protocol::constants::STATUS_BAD_REQUEST;
use sliceup_protocol::messages::{CreateSessionRequest, GetSessionMetaRequest, SliceUploadHeader};
use sliceup_protocol::{FileMeta, Message, MessageType};
use sliceup_session::{Layout, SessionError, SessionService};
use sliceup_upload_server::{Handler, HandlerFuture, Sender, ServerConfig, UploadServer};

use crate::config::Config;

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let service = build_service(&config).await?;

    let server = UploadServer::new(
        ServerConfig {
            host: config.host,
            port: config.port,
        },
        SessionHandler::new(service),
    );
    let runner = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut server_task => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    server.shutdown();
    server_task.await??;
    Ok(())
}

/// Creates the storage roots and the service over them.
pub async fn build_service(config: &Config) -> anyhow::Result<Arc<SessionService>> {
    let layout = Layout::new(
        &config.slice_cache_dir,
        &config.upload_dir,
        &config.metafile_dir,
    );
    layout.ensure_roots().await?;
    tracing::info!(?layout, "storage roots ready");
    Ok(Arc::new(SessionService::new(layout, config.default_storage)))
}

/// Translates WebSocket requests into session operations.
pub struct SessionHandler {
    service: Arc<SessionService>,
}

impl SessionHandler {
    pub fn new(service: Arc<SessionService>) -> Self {
        Self { service }
    }
}

impl Handler for SessionHandler {
    fn on_create_session(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = payload::<CreateSessionRequest>(&sender, &msg) else {
                return;
            };
            let result = self.service.create_session(req).await;
            reply_meta(&sender, &msg, result);
        })
    }

    fn on_get_session_meta(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = payload::<GetSessionMetaRequest>(&sender, &msg) else {
                return;
            };
            let result = self.service.session_meta(&req.file_id).await;
            reply_meta(&sender, &msg, result);
        })
    }

    fn on_upload_slice(
        &self,
        sender: Sender,
        header: SliceUploadHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            match self.service.upload_slice(&header, &data).await {
                Ok(ack) => {
                    match Message::with_code(
                        &header.id,
                        MessageType::SliceAck,
                        ack.outcome.code(),
                        Some(&ack),
                    ) {
                        Ok(reply) => {
                            let _ = sender.send_msg(reply);
                        }
                        Err(e) => tracing::error!("failed to build reply: {e}"),
                    }
                }
                Err(e) => {
                    log_failure(&e, &header.file_id);
                    let _ = sender.send_error_for(&header.id, e.status_code(), &e.to_string());
                }
            }
        })
    }
}

/// Parses the request payload, answering 400 when it is missing or malformed.
fn payload<T: for<'de> serde::Deserialize<'de>>(sender: &Sender, msg: &Message) -> Option<T> {
    match msg.parse_data::<T>() {
        Ok(Some(req)) => Some(req),
        Ok(None) => {
            let _ = sender.send_error(msg, STATUS_BAD_REQUEST, "missing payload");
            None
        }
        Err(e) => {
            let _ = sender.send_error(msg, STATUS_BAD_REQUEST, &format!("invalid payload: {e}"));
            None
        }
    }
}

fn reply_meta(sender: &Sender, msg: &Message, result: Result<FileMeta, SessionError>) {
    match result {
        Ok(meta) => match msg.reply(MessageType::SessionMeta, 200, Some(&meta)) {
            Ok(reply) => {
                let _ = sender.send_msg(reply);
            }
            Err(e) => tracing::error!("failed to build reply: {e}"),
        },
        Err(e) => {
            log_failure(&e, "");
            let _ = sender.send_error(msg, e.status_code(), &e.to_string());
        }
    }
}

fn log_failure(e: &SessionError, file_id: &str) {
    if e.status_code() >= 500 {
        tracing::error!(file_id, error = %e, "request failed");
    } else {
        tracing::warn!(file_id, error = %e, "request rejected");
    }
}
