//! Configuration types for ksync

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::traits::SyncResult;
use crate::types::HashAlgorithm;

/// Default upper bound on a single wire frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint name for logging
    pub name: String,

    /// Logging filter, in `tracing_subscriber::EnvFilter` syntax
    pub log_level: String,

    /// Digest used for range hashes until the peer picks another
    pub hash_algorithm: HashAlgorithm,

    /// Largest frame accepted or produced
    pub max_frame_bytes: usize,

    /// JSON dataset backing the in-memory database
    pub dataset: Option<PathBuf>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "ksync-from".to_string(),
            log_level: "info".to_string(),
            hash_algorithm: HashAlgorithm::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            dataset: None,
        }
    }
}

impl EndpointConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SyncError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.max_frame_bytes < 1024 {
            return Err(SyncError::ConfigError(format!(
                "max_frame_bytes {} is too small",
                self.max_frame_bytes
            )));
        }
        Ok(())
    }
}
