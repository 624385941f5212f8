//! Configuration for the filesystem preparator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the filesystem preparator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparatorConfig {
    /// Directory where items are fetched and customized.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Root of the delivery tree: `{delivery_dir}/{user}/{order_id}/{file}`.
    #[serde(default = "default_delivery_dir")]
    pub delivery_dir: PathBuf,

    /// Buffer size for file copies in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Whether to use rename when possible.
    #[serde(default = "default_true")]
    pub prefer_atomic_moves: bool,

    /// Whether to compute a SHA-256 of each delivered file.
    #[serde(default)]
    pub verify_checksums: bool,
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("oseo-staging")
}

fn default_delivery_dir() -> PathBuf {
    PathBuf::from("./delivery")
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for PreparatorConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            delivery_dir: default_delivery_dir(),
            buffer_size: default_buffer_size(),
            prefer_atomic_moves: true,
            verify_checksums: false,
        }
    }
}

impl PreparatorConfig {
    /// Config rooted in the given staging and delivery directories.
    pub fn new(staging_dir: impl Into<PathBuf>, delivery_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            delivery_dir: delivery_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_atomic_moves(mut self, enabled: bool) -> Self {
        self.prefer_atomic_moves = enabled;
        self
    }

    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}
