use crate::error::StoreError;
use crate::types::{ClientId, LockRow, ResourceId};

/// Outcome of inserting a fresh lock row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was created; carries the store-assigned sequence number.
    Inserted { sequence: i64 },
    /// A row for the resource already exists.
    AlreadyLocked,
}

/// Outcome of the delete-expired-then-insert transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    Reclaimed { sequence: i64 },
    /// The expired-row delete did not affect exactly one row, so the
    /// transaction was rolled back.
    RaceLost { deleted: usize },
}

/// Statement contract a relational backend provides to the lock protocol.
///
/// Expiry values are unix seconds. Implementations must keep at most one row
/// per resource and assign strictly increasing, never reused sequence numbers.
/// A store failure is reported as `Err`, never folded into an outcome.
pub trait LockStore: Send + Sync {
    /// Insert `(resource_id, client_id, expiry)` unless a row for the resource exists.
    fn insert(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
    ) -> Result<InsertOutcome, StoreError>;

    /// The current row for a resource, if any.
    fn fetch(&self, resource_id: &ResourceId) -> Result<Option<LockRow>, StoreError>;

    /// Atomically delete the resource's row if `expiry < now` (exactly one
    /// row affected) and insert the replacement.
    fn reclaim(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
        now: i64,
    ) -> Result<ReclaimOutcome, StoreError>;

    /// Delete the row matching the full triple. Returns the affected row count.
    fn delete(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        sequence_no: i64,
    ) -> Result<usize, StoreError>;
}

impl<S: LockStore + ?Sized> LockStore for std::sync::Arc<S> {
    fn insert(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
    ) -> Result<InsertOutcome, StoreError> {
        (**self).insert(resource_id, client_id, expiry)
    }

    fn fetch(&self, resource_id: &ResourceId) -> Result<Option<LockRow>, StoreError> {
        (**self).fetch(resource_id)
    }

    fn reclaim(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
        now: i64,
    ) -> Result<ReclaimOutcome, StoreError> {
        (**self).reclaim(resource_id, client_id, expiry, now)
    }

    fn delete(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        sequence_no: i64,
    ) -> Result<usize, StoreError> {
        (**self).delete(resource_id, client_id, sequence_no)
    }
}
