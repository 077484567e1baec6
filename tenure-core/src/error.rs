use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::ResourceId;

/// Failure reported by a lock store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or a connection could not be checked out.
    #[error("store connection failed: {0}")]
    Connection(String),
    /// A statement failed to execute.
    #[error("store query failed: {0}")]
    Query(String),
}

/// Why a single acquisition attempt did not produce a lease. Both causes are
/// retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("lock is held until {expiry}")]
    LockUnavailable { expiry: DateTime<Utc> },
    #[error("expired lock was reclaimed or replaced by a competitor")]
    ReclaimRaceLost,
}

#[derive(Debug, Error)]
pub enum LockError {
    /// Fatal; never governed by backoff.
    #[error("lock store unreachable: {0}")]
    Connection(String),

    /// A store fault while acquiring. Fatal; never retried.
    #[error("lock store failure: {0}")]
    Store(String),

    #[error("unable to lock {resource_id} after {attempts} attempts: {last_cause}")]
    AcquisitionExhausted {
        resource_id: ResourceId,
        attempts: u32,
        last_cause: AttemptFailure,
    },

    #[error("acquisition of {resource_id} cancelled after {attempts} attempts")]
    Cancelled { resource_id: ResourceId, attempts: u32 },

    /// The lease row may remain until it expires.
    #[error("failed to release lock on {resource_id}: {source}")]
    Release {
        resource_id: ResourceId,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<StoreError> for LockError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => LockError::Connection(msg),
            StoreError::Query(msg) => LockError::Store(msg),
        }
    }
}

impl LockError {
    /// The retryable cause behind an exhausted acquisition, if any.
    pub fn last_cause(&self) -> Option<&AttemptFailure> {
        match self {
            LockError::AcquisitionExhausted { last_cause, .. } => Some(last_cause),
            _ => None,
        }
    }
}
