//! In-process transport over a real `SessionService`, with fault hooks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sliceup_protocol::messages::{CreateSessionRequest, SliceAck, SliceUploadHeader, UploadOutcome};
use sliceup_protocol::{FileMeta, StorageMode};
use sliceup_session::{Layout, SessionError, SessionService};
use tempfile::TempDir;

use crate::{SessionTransport, TransportFuture, UploadError, UploadOptions};

pub const KB: u64 = 1024;

pub struct TestEnv {
    pub dir: TempDir,
    service: Arc<SessionService>,
}

impl TestEnv {
    pub fn new(storage: StorageMode) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let layout = Layout::new(root.join("cache"), root.join("upload"), root.join("meta"));
        Self {
            service: Arc::new(SessionService::new(layout, storage)),
            dir,
        }
    }

    pub fn service(&self) -> Arc<SessionService> {
        self.service.clone()
    }

    /// Writes a deterministic source file of `len` bytes.
    pub fn source(&self, name: &str, len: u64) -> PathBuf {
        let src_dir = self.dir.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let path = src_dir.join(name);
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 253) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    pub fn options(&self, chunk_size: u64, concurrency: usize) -> UploadOptions {
        UploadOptions {
            chunk_size,
            concurrency,
            cache_dir: self.dir.path().join("progress"),
            ..UploadOptions::default()
        }
    }
}

/// Overwrites `len` bytes at `offset` in `path`.
pub fn scribble(path: &Path, offset: u64, len: usize) {
    let mut data = std::fs::read(path).unwrap();
    for b in &mut data[offset as usize..offset as usize + len] {
        *b = !*b;
    }
    std::fs::write(path, data).unwrap();
}

fn session_error(e: SessionError) -> UploadError {
    UploadError::from_status(e.status_code(), e.to_string())
}

#[derive(Default)]
struct Counters {
    uploads: AtomicUsize,
    completes: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

pub struct FaultyTransport {
    service: Arc<SessionService>,
    fail_once: Mutex<HashSet<u64>>,
    corrupt_once: Mutex<HashSet<u64>>,
    delay: Option<Duration>,
    counters: Counters,
}

impl FaultyTransport {
    pub fn new(service: Arc<SessionService>) -> Self {
        Self {
            service,
            fail_once: Mutex::new(HashSet::new()),
            corrupt_once: Mutex::new(HashSet::new()),
            delay: None,
            counters: Counters::default(),
        }
    }

    /// The first upload of `index` fails with a 500.
    pub fn fail_once(self, index: u64) -> Self {
        self.fail_once.lock().unwrap().insert(index);
        self
    }

    /// The first upload of `index` reaches the server with one byte flipped.
    pub fn corrupt_once(self, index: u64) -> Self {
        self.corrupt_once.lock().unwrap().insert(index);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn uploads(&self) -> usize {
        self.counters.uploads.load(Ordering::SeqCst)
    }

    pub fn completes(&self) -> usize {
        self.counters.completes.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    async fn upload(&self, header: &SliceUploadHeader, data: &[u8]) -> Result<SliceAck, UploadError> {
        let index: u64 = header.slice_id.parse().unwrap();
        if self.fail_once.lock().unwrap().remove(&index) {
            return Err(UploadError::from_status(500, "injected failure"));
        }

        let mut data = data.to_vec();
        if self.corrupt_once.lock().unwrap().remove(&index) {
            data[0] = !data[0];
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let ack = self
            .service
            .upload_slice(header, &data)
            .await
            .map_err(session_error)?;
        if ack.outcome == UploadOutcome::Complete {
            self.counters.completes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ack)
    }
}

impl SessionTransport for FaultyTransport {
    fn create_session<'a>(&'a self, req: &'a CreateSessionRequest) -> TransportFuture<'a, FileMeta> {
        Box::pin(async move {
            self.service
                .create_session(req.clone())
                .await
                .map_err(session_error)
        })
    }

    fn upload_slice<'a>(
        &'a self,
        header: &'a SliceUploadHeader,
        data: &'a [u8],
    ) -> TransportFuture<'a, SliceAck> {
        Box::pin(async move {
            self.counters.uploads.fetch_add(1, Ordering::SeqCst);
            let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.peak.fetch_max(now, Ordering::SeqCst);
            let result = self.upload(header, data).await;
            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn get_session_meta<'a>(&'a self, file_id: &'a str) -> TransportFuture<'a, FileMeta> {
        Box::pin(async move {
            self.service
                .session_meta(file_id)
                .await
                .map_err(session_error)
        })
    }
}
