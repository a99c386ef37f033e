//! [`SessionTransport`] over the WebSocket client.

use sliceup_connection::{WsClient, WsError};
use sliceup_protocol::FileMeta;
use sliceup_protocol::messages::{CreateSessionRequest, SliceAck, SliceUploadHeader};
use sliceup_uploader::{SessionTransport, TransportFuture, UploadError};

pub struct WsTransport {
    client: WsClient,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self, UploadError> {
        let client = WsClient::connect(url).await.map_err(upload_error)?;
        tracing::debug!(%url, "connected");
        Ok(Self { client })
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

/// Server replies keep their status; everything else is a transport failure.
fn upload_error(e: WsError) -> UploadError {
    match e {
        WsError::Server { code, message } => UploadError::from_status(code, message),
        other => UploadError::Transport(other.to_string()),
    }
}

impl SessionTransport for WsTransport {
    fn create_session<'a>(&'a self, req: &'a CreateSessionRequest) -> TransportFuture<'a, FileMeta> {
        Box::pin(async move { self.client.create_session(req).await.map_err(upload_error) })
    }

    fn upload_slice<'a>(
        &'a self,
        header: &'a SliceUploadHeader,
        data: &'a [u8],
    ) -> TransportFuture<'a, SliceAck> {
        Box::pin(async move {
            self.client
                .upload_slice(header, data)
                .await
                .map_err(upload_error)
        })
    }

    fn get_session_meta<'a>(&'a self, file_id: &'a str) -> TransportFuture<'a, FileMeta> {
        Box::pin(async move {
            self.client
                .get_session_meta(file_id)
                .await
                .map_err(upload_error)
        })
    }
}
