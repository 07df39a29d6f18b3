//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into [`crate::StorageService`].
//! Request handling never reads environment variables.

use crate::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_DATA_DIR, DEFAULT_TRANSFER_TIMEOUT, MAX_CHUNK_SIZE};
use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    chunk_size: usize,
    transfer_timeout: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `chunk_size` must be in `1..=MAX_CHUNK_SIZE` and `transfer_timeout` must be non-zero.
    pub fn new(data_dir: PathBuf, chunk_size: usize, transfer_timeout: Duration) -> CoreResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig("data_dir cannot be empty".into()));
        }

        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(CoreError::InvalidConfig(format!(
                "chunk_size must be between 1 and {} bytes, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }

        if transfer_timeout.is_zero() {
            return Err(CoreError::InvalidConfig(
                "transfer_timeout must be greater than zero".into(),
            ));
        }

        Ok(Self {
            data_dir,
            chunk_size,
            transfer_timeout,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn transfer_timeout(&self) -> Duration {
        self.transfer_timeout
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }
}
