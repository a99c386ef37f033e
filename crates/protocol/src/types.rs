use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error returned when a numeric status field holds an unknown value.
#[derive(Debug, thiserror::Error)]
#[error("invalid status value: {0}")]
pub struct InvalidStatus(pub u8);

/// Upload state of a single slice. Serialized as `0` / `1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SliceStatus {
    #[default]
    Pending,
    Uploaded,
}

impl From<SliceStatus> for u8 {
    fn from(s: SliceStatus) -> Self {
        match s {
            SliceStatus::Pending => 0,
            SliceStatus::Uploaded => 1,
        }
    }
}

impl TryFrom<u8> for SliceStatus {
    type Error = InvalidStatus;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(SliceStatus::Pending),
            1 => Ok(SliceStatus::Uploaded),
            other => Err(InvalidStatus(other)),
        }
    }
}

/// Informational session status. Serialized as `0` / `1`.
///
/// Completion is decided from the slice states, never from this field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SessionStatus {
    #[default]
    Incomplete,
    Complete,
}

impl From<SessionStatus> for u8 {
    fn from(s: SessionStatus) -> Self {
        match s {
            SessionStatus::Incomplete => 0,
            SessionStatus::Complete => 1,
        }
    }
}

impl TryFrom<u8> for SessionStatus {
    type Error = InvalidStatus;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(SessionStatus::Incomplete),
            1 => Ok(SessionStatus::Complete),
            other => Err(InvalidStatus(other)),
        }
    }
}

/// How the server stores slices for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One file per slice, concatenated on completion.
    #[default]
    Discrete,
    /// One pre-sized working file written at slice offsets, renamed on completion.
    Sparse,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Discrete => f.write_str("discrete"),
            StorageMode::Sparse => f.write_str("sparse"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discrete" => Ok(StorageMode::Discrete),
            "sparse" => Ok(StorageMode::Sparse),
            other => Err(format!("unknown storage mode: {other}")),
        }
    }
}

/// One slice entry in the session document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    /// Slice index as a decimal string; always equal to its map key.
    #[serde(rename = "slice_id")]
    pub id: String,
    pub status: SliceStatus,
    /// Hex SHA-1 of the received bytes; empty while pending.
    #[serde(default)]
    pub sha1: String,
}

impl Slice {
    /// Creates a pending slice with no hash.
    pub fn pending(index: u64) -> Self {
        Self {
            id: index.to_string(),
            status: SliceStatus::Pending,
            sha1: String::new(),
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.status == SliceStatus::Uploaded
    }
}

/// The session document for one resumable upload.
///
/// Always read and written as a whole; there are no partial updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_size: u64,
    #[serde(default)]
    pub prefix: String,
    pub created_at: i64,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub storage: StorageMode,
    pub slices: BTreeMap<String, Slice>,
}

impl FileMeta {
    /// Total number of slices.
    pub fn slice_count(&self) -> u64 {
        self.slices.len() as u64
    }

    /// Looks up a slice by numeric index.
    pub fn slice(&self, index: u64) -> Option<&Slice> {
        self.slices.get(&index.to_string())
    }

    /// Returns `true` iff every slice has been uploaded.
    pub fn is_complete(&self) -> bool {
        self.slices.values().all(Slice::is_uploaded)
    }

    /// Number of uploaded slices.
    pub fn uploaded_count(&self) -> u64 {
        self.slices.values().filter(|s| s.is_uploaded()).count() as u64
    }

    /// Indices of pending slices in ascending numeric order.
    pub fn pending_indices(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .slices
            .values()
            .filter(|s| !s.is_uploaded())
            .filter_map(|s| s.id.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Marks a slice uploaded with the given hash. Returns `false` if the
    /// index is not part of this session.
    pub fn mark_uploaded(&mut self, index: u64, sha1: impl Into<String>) -> bool {
        match self.slices.get_mut(&index.to_string()) {
            Some(slice) => {
                slice.status = SliceStatus::Uploaded;
                slice.sha1 = sha1.into();
                true
            }
            None => false,
        }
    }

    /// Resets a slice to pending, keeping its last known hash.
    pub fn mark_pending(&mut self, index: u64) -> bool {
        match self.slices.get_mut(&index.to_string()) {
            Some(slice) => {
                slice.status = SliceStatus::Pending;
                true
            }
            None => false,
        }
    }
}
