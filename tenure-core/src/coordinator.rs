//! The acquisition protocol: insert, or reclaim an expired row, retried
//! under a backoff schedule.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::cancel::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::config::LockConfig;
use crate::error::{AttemptFailure, LockError};
use crate::infrastructure::{InsertOutcome, LockStore, ReclaimOutcome};
use crate::types::{from_unix_seconds, ClientId, Lease, LockRow, ResourceId};

/// Result of a release call. Both variants are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease's row was deleted.
    Released,
    /// No row matched the lease: it was already released, or it expired and
    /// was superseded by another client's reclamation.
    NotHeld,
}

/// Obtains and releases resource leases.
pub trait Lock: Send + Sync {
    /// Acquire using the default backoff (three retries from one second, x1.5).
    fn acquire(&self, resource_id: &ResourceId, client_id: &ClientId) -> Result<Lease, LockError> {
        self.acquire_with_backoff(resource_id, client_id, &mut ExponentialBackoff::default())
    }

    /// A single attempt; the first failure is final.
    fn acquire_no_wait(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
    ) -> Result<Lease, LockError> {
        self.acquire_with_backoff(resource_id, client_id, &mut ExponentialBackoff::no_retry())
    }

    fn acquire_with_backoff(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        backoff: &mut dyn Backoff,
    ) -> Result<Lease, LockError>;

    /// Delete the lock row identified by the lease's resource, client and
    /// sequence. A stale lease never removes a newer owner's row.
    fn release(&self, lease: &Lease) -> Result<ReleaseOutcome, LockError>;

    /// The current lock row for a resource, expired or not.
    fn inspect(&self, resource_id: &ResourceId) -> Result<Option<LockRow>, LockError>;
}

enum Attempt {
    Acquired(Lease),
    Failed(AttemptFailure),
}

/// The production [`Lock`]: drives the protocol against an injected store.
///
/// Holds no in-process lock of its own; the store's atomicity is the only
/// serialization between competitors.
pub struct LockCoordinator<S> {
    store: S,
    retention: Duration,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl<S: LockStore> LockCoordinator<S> {
    pub fn new(store: S, retention: Duration) -> Self {
        Self {
            store,
            retention,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(store: S, config: &LockConfig) -> Result<Self, LockError> {
        config.validate()?;
        Ok(Self::new(store, config.retention()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Every acquisition through this coordinator stops waiting once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Like [`Lock::acquire_with_backoff`], but also stops as soon as `cancel`
    /// fires while waiting between attempts.
    pub fn acquire_cancellable(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        backoff: &mut dyn Backoff,
        cancel: &CancellationToken,
    ) -> Result<Lease, LockError> {
        backoff.start();
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() || self.cancel.is_cancelled() {
                return Err(LockError::Cancelled {
                    resource_id: resource_id.clone(),
                    attempts,
                });
            }

            attempts += 1;
            let cause = match self.attempt(resource_id, client_id)? {
                Attempt::Acquired(lease) => {
                    tracing::debug!(
                        resource_id = %resource_id,
                        sequence = lease.sequence(),
                        attempts,
                        "Lock obtained"
                    );
                    return Ok(lease);
                }
                Attempt::Failed(cause) => cause,
            };
            tracing::info!(resource_id = %resource_id, attempts, cause = %cause, "Lock attempt failed");

            let Some(interval) = backoff.next() else {
                return Err(LockError::AcquisitionExhausted {
                    resource_id: resource_id.clone(),
                    attempts,
                    last_cause: cause,
                });
            };
            if self.sleep(interval, cancel) {
                return Err(LockError::Cancelled {
                    resource_id: resource_id.clone(),
                    attempts,
                });
            }
        }
    }

    /// Returns `true` if either token fired during the wait.
    fn sleep(&self, interval: Duration, cancel: &CancellationToken) -> bool {
        if cancel.same_as(&self.cancel) {
            return cancel.wait_timeout(interval);
        }
        // Poll the coordinator-wide token in slices while blocking on the
        // per-call one, so either can interrupt the wait.
        const SLICE: Duration = Duration::from_millis(50);
        let mut left = interval;
        while !left.is_zero() {
            let step = left.min(SLICE);
            if cancel.wait_timeout(step) || self.cancel.is_cancelled() {
                return true;
            }
            left -= step;
        }
        false
    }

    fn attempt(&self, resource_id: &ResourceId, client_id: &ClientId) -> Result<Attempt, LockError> {
        let now = self.clock.now();
        let expiry = self.candidate_expiry(now);
        let expiry_secs = expiry.timestamp();

        if let InsertOutcome::Inserted { sequence } =
            self.store.insert(resource_id, client_id, expiry_secs)?
        {
            tracing::debug!(resource_id = %resource_id, "Initial lock insert succeeded");
            return Ok(Attempt::Acquired(Lease::new(
                resource_id.clone(),
                client_id.clone(),
                expiry,
                sequence,
            )));
        }

        let Some(current) = self.store.fetch(resource_id)? else {
            // Released between our insert and the lookup.
            return Ok(Attempt::Failed(AttemptFailure::ReclaimRaceLost));
        };

        let now_secs = now.timestamp();
        tracing::debug!(resource_id = %resource_id, current_expiry = current.expiry, now = now_secs, "Lock exists");
        if current.expiry > now_secs {
            return Ok(Attempt::Failed(AttemptFailure::LockUnavailable {
                expiry: current.expiry_time(),
            }));
        }

        match self
            .store
            .reclaim(resource_id, client_id, expiry_secs, now_secs)?
        {
            ReclaimOutcome::Reclaimed { sequence } => {
                tracing::debug!(
                    resource_id = %resource_id,
                    previous_sequence = current.sequence_no,
                    sequence,
                    "Expired lock cleaned up and new inserted"
                );
                Ok(Attempt::Acquired(Lease::new(
                    resource_id.clone(),
                    client_id.clone(),
                    expiry,
                    sequence,
                )))
            }
            ReclaimOutcome::RaceLost { deleted } => {
                tracing::debug!(resource_id = %resource_id, deleted, "Reclaim of expired lock lost");
                Ok(Attempt::Failed(AttemptFailure::ReclaimRaceLost))
            }
        }
    }

    /// `now + retention`, truncated to the whole seconds the store persists.
    fn candidate_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let expiry = now
            .checked_add_signed(retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        from_unix_seconds(expiry.timestamp())
    }
}

impl<S: LockStore> Lock for LockCoordinator<S> {
    fn acquire_with_backoff(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        backoff: &mut dyn Backoff,
    ) -> Result<Lease, LockError> {
        self.acquire_cancellable(resource_id, client_id, backoff, &self.cancel)
    }

    fn release(&self, lease: &Lease) -> Result<ReleaseOutcome, LockError> {
        let deleted = self
            .store
            .delete(lease.resource_id(), lease.client_id(), lease.sequence())
            .map_err(|source| LockError::Release {
                resource_id: lease.resource_id().clone(),
                source,
            })?;

        if deleted == 0 {
            tracing::warn!(
                resource_id = %lease.resource_id(),
                sequence = lease.sequence(),
                "Release matched no lock; lease was already released or superseded"
            );
            Ok(ReleaseOutcome::NotHeld)
        } else {
            tracing::debug!(resource_id = %lease.resource_id(), sequence = lease.sequence(), "Lock released");
            Ok(ReleaseOutcome::Released)
        }
    }

    fn inspect(&self, resource_id: &ResourceId) -> Result<Option<LockRow>, LockError> {
        Ok(self.store.fetch(resource_id)?)
    }
}
