use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClientId, ResourceId};

/// A granted, time-bounded lock on a resource.
///
/// Only a successful acquisition creates a lease. The caller holds it for the
/// duration of its critical section and hands it back to `release`. A lease
/// serializes to JSON so a process other than the acquirer can release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    resource_id: ResourceId,
    client_id: ClientId,
    /// UTC instant at which the lock stops being valid (whole seconds)
    expiry: DateTime<Utc>,
    /// Store-assigned sequence number; higher means more recent
    sequence: i64,
}

impl Lease {
    pub(crate) fn new(
        resource_id: ResourceId,
        client_id: ClientId,
        expiry: DateTime<Utc>,
        sequence: i64,
    ) -> Self {
        Self {
            resource_id,
            client_id,
            expiry,
            sequence,
        }
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Whether the lease has run out at `now`. An expired lease may already
    /// have been superseded by another client's reclamation.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// A persisted row of the `resource_locks` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub resource_id: ResourceId,
    pub client_id: ClientId,
    /// Unix seconds
    pub expiry: i64,
    pub sequence_no: i64,
}

impl LockRow {
    pub fn expiry_time(&self) -> DateTime<Utc> {
        from_unix_seconds(self.expiry)
    }
}

/// Converts a persisted unix-seconds value back to UTC, clamping values
/// outside chrono's range.
pub fn from_unix_seconds(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(if secs < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
