//! Runtime limits for the VFS.
//!
//! Every table in the core is bounded. The bounds live here so a board
//! support package can size them from a RON file instead of recompiling:
//!
//! ```ron
//! (
//!     fd_initial: 4,
//!     fd_grow_step: 4,
//!     fd_max: 16,
//!     mounts_max: 3,
//!     working_directory: "/",
//! )
//! ```
//!
//! Omitted fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// VFS sizing and initial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfsConfig {
    /// Descriptor slots allocated up front.
    pub fd_initial: usize,
    /// Slots added each time the descriptor table grows.
    pub fd_grow_step: usize,
    /// Hard ceiling on descriptor slots.
    pub fd_max: usize,
    /// Mount table capacity.
    pub mounts_max: usize,
    /// Filesystem driver registry capacity.
    pub fs_types_max: usize,
    /// Longest accepted canonical path, in bytes.
    pub path_max: usize,
    /// Working directory at startup.
    pub working_directory: String,
}

impl Default for DfsConfig {
    fn default() -> Self {
        Self {
            fd_initial: 4,
            fd_grow_step: 4,
            fd_max: 32,
            mounts_max: 4,
            fs_types_max: 4,
            path_max: 256,
            working_directory: "/".to_string(),
        }
    }
}

impl DfsConfig {
    /// Parse a RON document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: DfsConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Set the descriptor table bounds.
    pub fn with_fd_limits(mut self, initial: usize, grow_step: usize, max: usize) -> Self {
        self.fd_initial = initial;
        self.fd_grow_step = grow_step;
        self.fd_max = max;
        self
    }

    /// Set the mount table capacity.
    pub fn with_mounts_max(mut self, mounts_max: usize) -> Self {
        self.mounts_max = mounts_max;
        self
    }

    /// Check the limits are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fd_max == 0 {
            return Err(ConfigError::Invalid("fd_max must be at least 1".into()));
        }
        if self.fd_grow_step == 0 {
            return Err(ConfigError::Invalid("fd_grow_step must be at least 1".into()));
        }
        if self.fd_initial > self.fd_max {
            return Err(ConfigError::Invalid(format!(
                "fd_initial ({}) exceeds fd_max ({})",
                self.fd_initial, self.fd_max
            )));
        }
        if self.mounts_max == 0 {
            return Err(ConfigError::Invalid("mounts_max must be at least 1".into()));
        }
        if self.path_max == 0 {
            return Err(ConfigError::Invalid("path_max must be at least 1".into()));
        }
        if !self.working_directory.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "working_directory must be absolute: {}",
                self.working_directory
            )));
        }
        Ok(())
    }
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}
