pub(crate) mod read;
pub(crate) mod write;

use std::collections::HashMap;
use std::sync::Arc;

use sliceup_protocol::envelope::Message;
use tokio::sync::{Mutex, oneshot};

/// In-flight requests keyed by message id.
pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;
