use crate::error::StoreError;
use crate::infrastructure::{InsertOutcome, LockStore, ReclaimOutcome};
use crate::types::{ClientId, LockRow, ResourceId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Rows {
    // Map of Resource ID -> current lock row
    by_resource: HashMap<ResourceId, LockRow>,
    // Last sequence handed out, shared by all resources
    last_sequence: i64,
}

/// Process-local lock store. Every statement runs under one mutex, which
/// makes each call atomic the way a transaction is.
pub struct InMemoryLockStore {
    rows: Mutex<Rows>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Rows {
                by_resource: HashMap::new(),
                last_sequence: 0,
            }),
        }
    }

    fn rows(&self) -> Result<MutexGuard<'_, Rows>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Connection("in-memory lock store poisoned".to_string()))
    }

    /// Number of rows currently held. Still readable after a poisoning
    /// panic, while statements report the store as failed.
    pub fn len(&self) -> usize {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_resource
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Rows {
    fn insert_row(&mut self, resource_id: &ResourceId, client_id: &ClientId, expiry: i64) -> i64 {
        self.last_sequence += 1;
        self.by_resource.insert(
            resource_id.clone(),
            LockRow {
                resource_id: resource_id.clone(),
                client_id: client_id.clone(),
                expiry,
                sequence_no: self.last_sequence,
            },
        );
        self.last_sequence
    }
}

impl LockStore for InMemoryLockStore {
    fn insert(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
    ) -> Result<InsertOutcome, StoreError> {
        let mut rows = self.rows()?;
        if rows.by_resource.contains_key(resource_id) {
            return Ok(InsertOutcome::AlreadyLocked);
        }
        let sequence = rows.insert_row(resource_id, client_id, expiry);
        Ok(InsertOutcome::Inserted { sequence })
    }

    fn fetch(&self, resource_id: &ResourceId) -> Result<Option<LockRow>, StoreError> {
        Ok(self.rows()?.by_resource.get(resource_id).cloned())
    }

    fn reclaim(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
        now: i64,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut rows = self.rows()?;
        let expired = rows
            .by_resource
            .get(resource_id)
            .is_some_and(|row| row.expiry < now);
        if !expired {
            return Ok(ReclaimOutcome::RaceLost { deleted: 0 });
        }
        rows.by_resource.remove(resource_id);
        let sequence = rows.insert_row(resource_id, client_id, expiry);
        Ok(ReclaimOutcome::Reclaimed { sequence })
    }

    fn delete(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        sequence_no: i64,
    ) -> Result<usize, StoreError> {
        let mut rows = self.rows()?;
        let matches = rows.by_resource.get(resource_id).is_some_and(|row| {
            row.client_id == *client_id && row.sequence_no == sequence_no
        });
        if matches {
            rows.by_resource.remove(resource_id);
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_poisoned_store_keeps_row_count() {
        let store = Arc::new(InMemoryLockStore::new());
        let res = ResourceId::new("orders/42");
        store.insert(&res, &ClientId::new("a"), 1_000).unwrap();

        let poisoner = Arc::clone(&store);
        let result = thread::spawn(move || {
            let _rows = poisoner.rows.lock().unwrap();
            panic!("poison the row mutex");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
        assert!(matches!(
            store.insert(&ResourceId::new("b"), &ClientId::new("a"), 1_000),
            Err(StoreError::Connection(_))
        ));
    }
}
