//! Reader configuration.
//!
//! Defines how split readers reach the bytes of a point file and how much they
//! buffer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::V2_MAX_RECORD_LEN;
use crate::{Error, Result};

/// How `open_reader_for_split` reaches file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoMode {
    /// Map the whole file read-only.
    Mmap,
    /// Positional reads into the reader's lookahead window.
    Pread,
}

/// Configuration shared by every reader opened through one input format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Default: mmap
    pub io_mode: IoMode,

    /// Lookahead window for positional reads, in bytes.
    /// Default: 64 KiB
    pub window_size: usize,

    /// Upper bound on the header (preamble plus tag dictionary) size.
    /// Default: 1 MiB
    pub max_header_len: usize,

    /// Share confirmed record boundaries between readers of the same file so
    /// variable-length boundary walks start near their target.
    /// Default: true
    pub share_anchors: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            io_mode: IoMode::Mmap,
            window_size: 64 * 1024,
            max_header_len: 1024 * 1024,
            share_anchors: true,
        }
    }
}

impl ReaderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < V2_MAX_RECORD_LEN {
            return Err(Error::Config(format!(
                "window_size must be at least {V2_MAX_RECORD_LEN} bytes"
            )));
        }
        if self.max_header_len < crate::header::PREAMBLE_SIZE {
            return Err(Error::Config("max_header_len is smaller than the preamble".into()));
        }
        Ok(())
    }
}
