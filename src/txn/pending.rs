//! Pending Changes Account
//!
//! An uninitialized passive receives live commits before it has received
//! every object they touch. Deltas against objects it does not know yet are
//! parked here, per object in arrival order, until the object arrives in an
//! object sync transaction (or is deleted by the collector).

use super::transaction::Change;
use crate::model::{GlobalTransactionId, ObjectId, TransactionId};
use std::collections::{BTreeMap, HashMap};

/// A delta parked until its object arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub transaction_id: TransactionId,
    pub global_id: GlobalTransactionId,
    pub change: Change,
}

/// Parked deltas, indexed by object and by owning transaction.
#[derive(Debug, Default)]
pub struct PendingChangesAccount {
    by_object: BTreeMap<ObjectId, Vec<PendingRecord>>,
    // records still parked per global id
    by_global_id: HashMap<GlobalTransactionId, usize>,
}

impl PendingChangesAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `change` from the transaction identified by `transaction_id`/`global_id`.
    pub fn add(&mut self, transaction_id: TransactionId, global_id: GlobalTransactionId, change: Change) {
        let object = change.object_id;
        self.by_object.entry(object).or_default().push(PendingRecord {
            transaction_id,
            global_id,
            change,
        });
        *self.by_global_id.entry(global_id).or_insert(0) += 1;
    }

    /// Remove and return everything parked for `object`, in arrival order.
    pub fn take_for(&mut self, object: &ObjectId) -> Vec<PendingRecord> {
        let records = self.by_object.remove(object).unwrap_or_default();
        for record in &records {
            if let Some(count) = self.by_global_id.get_mut(&record.global_id) {
                *count -= 1;
                if *count == 0 {
                    self.by_global_id.remove(&record.global_id);
                }
            }
        }
        records
    }

    /// Everything parked for `object`, in arrival order.
    pub fn parked_for(&self, object: &ObjectId) -> &[PendingRecord] {
        self.by_object.get(object).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check if anything is parked for `object`.
    pub fn has_pending(&self, object: &ObjectId) -> bool {
        self.by_object.contains_key(object)
    }

    /// Number of transactions with at least one parked change.
    pub fn transaction_count(&self) -> usize {
        self.by_global_id.len()
    }

    /// Number of parked changes.
    pub fn change_count(&self) -> usize {
        self.by_object.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_object.clear();
        self.by_global_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(id: u64) -> Change {
        Change::delta(ObjectId::new(id), vec![id as u8])
    }

    #[test]
    fn test_take_returns_arrival_order() {
        let mut account = PendingChangesAccount::new();
        account.add(TransactionId::new(1), GlobalTransactionId::new(10), delta(5));
        account.add(TransactionId::new(2), GlobalTransactionId::new(11), delta(5));

        let records = account.take_for(&ObjectId::new(5));
        let versions: Vec<u64> = records.iter().map(|r| r.global_id.as_u64()).collect();
        assert_eq!(versions, vec![10, 11]);
        assert!(account.is_empty());
    }

    #[test]
    fn test_transaction_count_tracks_distinct_global_ids() {
        let mut account = PendingChangesAccount::new();
        let gid = GlobalTransactionId::new(7);
        account.add(TransactionId::new(1), gid, delta(1));
        account.add(TransactionId::new(1), gid, delta(2));
        account.add(TransactionId::new(2), GlobalTransactionId::new(8), delta(2));

        assert_eq!(account.transaction_count(), 2);
        assert_eq!(account.change_count(), 3);

        account.take_for(&ObjectId::new(1));
        assert_eq!(account.transaction_count(), 2);

        account.take_for(&ObjectId::new(2));
        assert_eq!(account.transaction_count(), 0);
    }

    #[test]
    fn test_take_unknown_object_is_empty() {
        let mut account = PendingChangesAccount::new();
        assert!(account.take_for(&ObjectId::new(3)).is_empty());
        assert!(!account.has_pending(&ObjectId::new(3)));
    }

    #[test]
    fn test_clear() {
        let mut account = PendingChangesAccount::new();
        account.add(TransactionId::new(1), GlobalTransactionId::new(1), delta(1));
        account.clear();
        assert!(account.is_empty());
        assert_eq!(account.transaction_count(), 0);
    }
}
