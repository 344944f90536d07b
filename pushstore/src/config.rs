//! Store configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default number of write requests that may wait in the queue.
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 1000;

/// Default minimum time between two persistence runs.
pub const DEFAULT_PERSISTENCE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for a [`DiskMetricStore`](crate::store::DiskMetricStore).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use pushstore::config::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_persistence_file("/var/lib/pushstore/metrics.store")
///     .with_persistence_interval(Duration::from_secs(30));
/// assert!(config.persistence_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// File the index is persisted to and restored from.
    ///
    /// `None` or an empty path disables persistence entirely: nothing is
    /// restored at startup and nothing is ever written.
    pub persistence_file: Option<PathBuf>,

    /// Minimum time between two persistence runs.
    ///
    /// A write is persisted at most this long after it was applied. A zero
    /// interval persists after essentially every batch of writes.
    pub persistence_interval: Duration,

    /// Capacity of the bounded write queue. `submit` blocks while it is full.
    pub write_queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persistence_file: None,
            persistence_interval: DEFAULT_PERSISTENCE_INTERVAL,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the persistence file.
    #[must_use]
    pub fn with_persistence_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence_file = Some(path.into());
        self
    }

    /// Sets the persistence interval.
    #[must_use]
    pub fn with_persistence_interval(mut self, interval: Duration) -> Self {
        self.persistence_interval = interval;
        self
    }

    /// Sets the write queue capacity.
    #[must_use]
    pub fn with_write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity;
        self
    }

    /// The persistence file, or `None` if persistence is disabled.
    pub fn persistence_path(&self) -> Option<&Path> {
        self.persistence_file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Returns `true` if the store will restore from and write to disk.
    pub fn persistence_enabled(&self) -> bool {
        self.persistence_path().is_some()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the queue capacity is zero or the
    /// persistence path is an existing directory.
    pub fn validate(&self) -> Result<()> {
        if self.write_queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity {
                capacity: self.write_queue_capacity,
            }
            .into());
        }

        if let Some(path) = self.persistence_path()
            && path.is_dir()
        {
            return Err(ConfigError::PathIsDirectory {
                path: path.to_path_buf(),
            }
            .into());
        }

        Ok(())
    }
}
