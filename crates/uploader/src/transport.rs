//! Abstract connection to an upload server.

use std::future::Future;
use std::pin::Pin;

use sliceup_protocol::FileMeta;
use sliceup_protocol::messages::{CreateSessionRequest, SliceAck, SliceUploadHeader};

use crate::UploadError;

/// Boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// The three session operations, over whatever wire the caller uses.
///
/// Implementations map failed replies through [`UploadError::from_status`]
/// and own per-request timeouts. Keeping this a trait lets the driver be
/// tested against an in-process server.
pub trait SessionTransport: Send + Sync {
    fn create_session<'a>(&'a self, req: &'a CreateSessionRequest) -> TransportFuture<'a, FileMeta>;

    /// Uploads one slice. Both partial and complete acks are success.
    fn upload_slice<'a>(
        &'a self,
        header: &'a SliceUploadHeader,
        data: &'a [u8],
    ) -> TransportFuture<'a, SliceAck>;

    fn get_session_meta<'a>(&'a self, file_id: &'a str) -> TransportFuture<'a, FileMeta>;
}
