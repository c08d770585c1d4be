use std::{fs, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Default cap on the size of a single metadata document (5 MiB).
pub const DEFAULT_MAX_METADATA_SIZE: u64 = 5 * 1024 * 1024;
/// Default cap on root versions walked in one update.
pub const DEFAULT_MAX_ROOT_ROTATIONS: u64 = 256;
/// Default timeout for remote requests, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Globally unique name of the repository, e.g. `docker.io/library/alpine`
    pub gun: String,
    /// Base URL of the metadata server
    #[serde(default)]
    pub server_url: Option<String>,
    /// Directory for the local metadata cache
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_metadata_size")]
    pub max_metadata_size: u64,
    #[serde(default = "default_max_root_rotations")]
    pub max_root_rotations: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_metadata_size() -> u64 {
    DEFAULT_MAX_METADATA_SIZE
}

fn default_max_root_rotations() -> u64 {
    DEFAULT_MAX_ROOT_ROTATIONS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl RepositoryConfig {
    pub fn new(gun: &str) -> Self {
        Self {
            gun: gun.to_owned(),
            server_url: None,
            cache_dir: None,
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
            max_root_rotations: DEFAULT_MAX_ROOT_ROTATIONS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn with_server_url(mut self, url: &str) -> Self {
        self.server_url = Some(url.to_owned());
        self
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn with_max_metadata_size(mut self, size: u64) -> Self {
        self.max_metadata_size = size;
        self
    }

    pub fn with_max_root_rotations(mut self, steps: u64) -> Self {
        self.max_root_rotations = steps;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Loads a config from a JSON file.
    pub fn from_json_file(path: PathBuf) -> Result<Self> {
        let config_str = fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read config {}: {e}", path.display()))?;
        let config = serde_json::from_str(&config_str)?;
        Ok(config)
    }
}
