use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LockError;

/// Settings for opening the relational lock store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file shared by every competing client
    pub path: PathBuf,
    /// Upper bound on pooled connections
    pub pool_size: u32,
    /// How long a statement waits on a locked database before failing
    pub busy_timeout_ms: u64,
    /// How long a pool checkout waits before reporting a connection error
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tenure.db"),
            pool_size: 8,
            busy_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long a granted lease stays valid, in seconds
    pub retention_secs: u64,
    pub store: StoreConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retention_secs: 30,
            store: StoreConfig::default(),
        }
    }
}

impl LockConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn validate(&self) -> Result<(), LockError> {
        if self.retention_secs == 0 {
            return Err(LockError::InvalidConfig(
                "retention_secs must be greater than 0".to_string(),
            ));
        }
        if self.store.pool_size == 0 {
            return Err(LockError::InvalidConfig(
                "store.pool_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
