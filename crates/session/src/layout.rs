use std::path::{Path, PathBuf};

use sliceup_protocol::FileMeta;

use crate::SessionError;

/// Upper bound on session id generation retries.
pub const MAX_ID_ATTEMPTS: usize = 10;

const META_FILE_NAME: &str = "meta.json";
const WORKING_FILE_NAME: &str = "upload.part";

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Filesystem roots and path conventions for all sessions.
pub struct Layout {
    cache_root: PathBuf,
    upload_root: PathBuf,
    meta_root: PathBuf,
    generate_id: IdGenerator,
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("cache_root", &self.cache_root)
            .field("upload_root", &self.upload_root)
            .field("meta_root", &self.meta_root)
            .finish_non_exhaustive()
    }
}

impl Layout {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        upload_root: impl Into<PathBuf>,
        meta_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            upload_root: upload_root.into(),
            meta_root: meta_root.into(),
            generate_id: Box::new(new_file_id),
        }
    }

    /// Replaces the session id generator.
    pub fn with_id_generator<F>(mut self, generate: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generate_id = Box::new(generate);
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn meta_root(&self) -> &Path {
        &self.meta_root
    }

    /// Creates the three roots if they do not exist.
    pub async fn ensure_roots(&self) -> Result<(), SessionError> {
        for dir in [&self.cache_root, &self.upload_root, &self.meta_root] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Allocates a fresh session directory under the cache root.
    ///
    /// Directory creation doubles as the collision check: an id whose
    /// directory already exists is discarded and a new one generated.
    pub async fn allocate_session_dir(&self) -> Result<(String, PathBuf), SessionError> {
        tokio::fs::create_dir_all(&self.cache_root).await?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let file_id = (self.generate_id)();
            let dir = self.session_dir(&file_id);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => return Ok((file_id, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(file_id = %file_id, "session id collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SessionError::IdExhausted(MAX_ID_ATTEMPTS))
    }

    pub fn session_dir(&self, file_id: &str) -> PathBuf {
        self.cache_root.join(file_id)
    }

    /// Working session document.
    pub fn meta_path(&self, file_id: &str) -> PathBuf {
        self.session_dir(file_id).join(META_FILE_NAME)
    }

    /// Session document kept after the cache directory is gone.
    pub fn archived_meta_path(&self, file_id: &str) -> PathBuf {
        self.meta_root.join(format!("{file_id}.meta.json"))
    }

    /// Discrete storage file for one slice. The hash is part of the name
    /// so a re-upload with different bytes never reuses a stale file.
    pub fn slice_path(&self, file_id: &str, index: u64, sha1: &str) -> PathBuf {
        self.session_dir(file_id)
            .join(format!("{file_id}.{index}.{sha1}.slice"))
    }

    /// Sparse storage working file.
    pub fn working_path(&self, file_id: &str) -> PathBuf {
        self.session_dir(file_id).join(WORKING_FILE_NAME)
    }

    /// Final location of the merged artifact.
    pub fn destination_path(&self, meta: &FileMeta) -> PathBuf {
        let mut path = self.upload_root.clone();
        if !meta.prefix.is_empty() {
            path.push(&meta.prefix);
        }
        path.push(&meta.file_name);
        path
    }
}

/// New random session id: 32 lowercase hex characters.
pub fn new_file_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Rejects ids that could not have come from [`new_file_id`] style
/// generation and could escape the cache root.
pub fn validate_file_id(file_id: &str) -> Result<(), SessionError> {
    let ok = !file_id.is_empty()
        && file_id.len() <= 64
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SessionError::Validation(format!("invalid file_id: {file_id:?}")))
    }
}
