#[cfg(test)]
mod tests {
    use crate::infrastructure::{InsertOutcome, LockStore, ReclaimOutcome};
    use crate::infrastructure_in_memory::InMemoryLockStore;
    use crate::types::{ClientId, ResourceId};

    #[test]
    fn test_in_memory_store_insert_and_delete() {
        let store = InMemoryLockStore::new();
        let res = ResourceId::new("orders/42");
        let client = ClientId::new("client_1");

        let sequence = match store.insert(&res, &client, 1_000).unwrap() {
            InsertOutcome::Inserted { sequence } => sequence,
            other => panic!("Expected Inserted, got {:?}", other),
        };
        assert_eq!(store.len(), 1);

        let row = store.fetch(&res).unwrap().expect("row exists");
        assert_eq!(row.client_id, client);
        assert_eq!(row.expiry, 1_000);
        assert_eq!(row.sequence_no, sequence);

        // Wrong sequence or wrong client leaves the row alone
        assert_eq!(store.delete(&res, &client, sequence + 1).unwrap(), 0);
        assert_eq!(store.delete(&res, &ClientId::new("other"), sequence).unwrap(), 0);
        assert_eq!(store.len(), 1);

        assert_eq!(store.delete(&res, &client, sequence).unwrap(), 1);
        assert!(store.is_empty());
        assert!(store.fetch(&res).unwrap().is_none());
    }

    #[test]
    fn test_in_memory_store_rejects_second_insert() {
        let store = InMemoryLockStore::new();
        let res = ResourceId::new("orders/42");

        assert!(matches!(
            store.insert(&res, &ClientId::new("a"), 1_000).unwrap(),
            InsertOutcome::Inserted { .. }
        ));
        assert_eq!(
            store.insert(&res, &ClientId::new("b"), 2_000).unwrap(),
            InsertOutcome::AlreadyLocked
        );
        assert_eq!(store.fetch(&res).unwrap().unwrap().client_id, ClientId::new("a"));
    }

    #[test]
    fn test_in_memory_store_reclaim() {
        let store = InMemoryLockStore::new();
        let res = ResourceId::new("orders/42");
        let first = match store.insert(&res, &ClientId::new("a"), 1_000).unwrap() {
            InsertOutcome::Inserted { sequence } => sequence,
            other => panic!("Expected Inserted, got {:?}", other),
        };

        // Not expired yet: expiry == now does not satisfy expiry < now
        assert_eq!(
            store.reclaim(&res, &ClientId::new("b"), 2_000, 1_000).unwrap(),
            ReclaimOutcome::RaceLost { deleted: 0 }
        );

        let second = match store.reclaim(&res, &ClientId::new("b"), 2_000, 1_001).unwrap() {
            ReclaimOutcome::Reclaimed { sequence } => sequence,
            other => panic!("Expected Reclaimed, got {:?}", other),
        };
        assert!(second > first);

        // The expired row is gone, so a competitor's reclaim loses
        assert_eq!(
            store.reclaim(&res, &ClientId::new("c"), 2_000, 1_001).unwrap(),
            ReclaimOutcome::RaceLost { deleted: 0 }
        );
        let row = store.fetch(&res).unwrap().unwrap();
        assert_eq!(row.client_id, ClientId::new("b"));
        assert_eq!(row.sequence_no, second);
    }

    #[test]
    fn test_in_memory_store_reclaim_missing_row() {
        let store = InMemoryLockStore::new();
        assert_eq!(
            store
                .reclaim(&ResourceId::new("nothing"), &ClientId::new("a"), 10, 5)
                .unwrap(),
            ReclaimOutcome::RaceLost { deleted: 0 }
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_in_memory_store_sequences_never_reused() {
        let store = InMemoryLockStore::new();
        let client = ClientId::new("a");
        let mut seen = Vec::new();

        for name in ["r1", "r2", "r1", "r3"] {
            let res = ResourceId::new(name);
            if let InsertOutcome::Inserted { sequence } = store.insert(&res, &client, 10).unwrap() {
                seen.push(sequence);
                store.delete(&res, &client, sequence).unwrap();
            }
        }

        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
