//! Server configuration.
//!
//! Read from the TOML file given by `--config` or `$SLICEUP_CONFIG`;
//! every key is optional:
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! slice_cache_dir = "data/cache"
//! upload_dir = "data/upload"
//! metafile_dir = "data/meta"
//! default_storage = "sparse"
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sliceup_protocol::StorageMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-session working directories.
    #[serde(default = "default_slice_cache_dir")]
    pub slice_cache_dir: PathBuf,

    /// Where merged files land.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Session documents of completed uploads.
    #[serde(default = "default_metafile_dir")]
    pub metafile_dir: PathBuf,

    /// Storage used when a client does not ask for one.
    #[serde(default = "default_storage")]
    pub default_storage: StorageMode,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_slice_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("data/upload")
}

fn default_metafile_dir() -> PathBuf {
    PathBuf::from("data/meta")
}

fn default_storage() -> StorageMode {
    StorageMode::Sparse
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            slice_cache_dir: default_slice_cache_dir(),
            upload_dir: default_upload_dir(),
            metafile_dir: default_metafile_dir(),
            default_storage: default_storage(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or the defaults when none is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "configuration file read");
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
