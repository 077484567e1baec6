//! # tenure-core
//!
//! Mutually-exclusive, expiring leases on named resources, coordinated
//! through a shared relational store. Crashed holders are tolerated by
//! reclaiming expired rows, and every grant carries a per-resource sequence
//! number that supersedes older leases.

pub mod backoff;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod types;

pub use backoff::{Backoff, BackoffConfig, ExponentialBackoff};
pub use coordinator::{Lock, LockCoordinator, ReleaseOutcome};
pub use error::{AttemptFailure, LockError, StoreError};
pub use types::{ClientId, Lease, LockRow, ResourceId};

#[cfg(test)]
mod backoff_test;
#[cfg(test)]
mod cancel_test;
#[cfg(test)]
#[path = "infrastructure_test.rs"]
mod infrastructure_test;
