use crate::{RofsError, RofsResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tuning for the data path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Maximum pages combined into one I/O request
    pub fan_out_limit: usize,
    /// Threads completing batched requests
    pub io_workers: usize,
    /// Soft cap on cached metadata blocks
    pub meta_cache_blocks: usize,
    /// Pages handed to one readahead batch by whole-file readers
    pub readahead_pages: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            fan_out_limit: 256,
            io_workers: 4,
            meta_cache_blocks: 1024,
            readahead_pages: 32,
        }
    }
}

impl ReadConfig {
    pub fn from_json_str(json: &str) -> RofsResult<Self> {
        let config: ReadConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> RofsResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> RofsResult<()> {
        let fields = [
            ("fan_out_limit", self.fan_out_limit),
            ("io_workers", self.io_workers),
            ("meta_cache_blocks", self.meta_cache_blocks),
            ("readahead_pages", self.readahead_pages),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(RofsError::Configuration(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}
