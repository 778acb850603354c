//! Replicated Transactions
//!
//! `ServerTransaction` is the read contract every admitted transaction
//! satisfies. Two flavours implement it:
//! - `FullTransaction`: all changes as authored
//! - `PrunedTransaction`: changes filtered to what the receiving passive can
//!   apply, everything else delegated to the original
//!
//! Downstream consumers never need to know which flavour they hold.

use crate::model::{GlobalTransactionId, NodeId, ObjectId, ObjectIdSet, RootNameMapping, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Shared handle to an admitted transaction.
pub type TxnRef = Arc<dyn ServerTransaction>;

/// Client batch a transaction arrived in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

/// Identity of a lock held by the transaction's author.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(pub String);

/// Wait/notify issued inside the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notify {
    pub lock: LockId,
    pub all: bool,
}

/// String table the object state bytes were encoded against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringTable(pub Vec<String>);

/// Where a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnType {
    /// Committed by a client on the active
    Normal,
    /// Generated by the object sync process
    ObjectSync,
}

/// One object's state change.
///
/// The state bytes are opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub object_id: ObjectId,
    /// Full state of a newly created object, as opposed to a delta
    pub is_new: bool,
    /// Commit order assigned when a deferred delta is merged into a sync transaction
    pub version: Option<GlobalTransactionId>,
    pub state: Vec<u8>,
}

impl Change {
    /// Full state of a new object.
    pub fn new_object(object_id: ObjectId, state: Vec<u8>) -> Self {
        Self {
            object_id,
            is_new: true,
            version: None,
            state,
        }
    }

    /// Delta against an existing object.
    pub fn delta(object_id: ObjectId, state: Vec<u8>) -> Self {
        Self {
            object_id,
            is_new: false,
            version: None,
            state,
        }
    }

    /// Same change stamped with the global id it was committed under.
    pub fn versioned(mut self, version: GlobalTransactionId) -> Self {
        self.version = Some(version);
        self
    }
}

/// Read contract of a transaction entering the transaction manager.
pub trait ServerTransaction: fmt::Debug + Send + Sync {
    fn source(&self) -> NodeId;
    fn transaction_id(&self) -> TransactionId;
    fn global_id(&self) -> GlobalTransactionId;
    fn batch_id(&self) -> BatchId;
    fn txn_type(&self) -> TxnType;
    fn lock_ids(&self) -> &[LockId];
    fn changes(&self) -> &[Change];
    /// Every object the changes touch
    fn object_ids(&self) -> &ObjectIdSet;
    /// Objects the changes create
    fn new_object_ids(&self) -> &ObjectIdSet;
    fn new_roots(&self) -> &RootNameMapping;
    fn notifies(&self) -> &[Notify];
    fn serializer(&self) -> &StringTable;

    /// Whether this transaction was reduced by the admission gate.
    fn is_pruned(&self) -> bool {
        false
    }
}

/// A transaction with all of its changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTransaction {
    source: NodeId,
    transaction_id: TransactionId,
    global_id: GlobalTransactionId,
    batch_id: BatchId,
    txn_type: TxnType,
    lock_ids: Vec<LockId>,
    changes: Vec<Change>,
    object_ids: ObjectIdSet,
    new_object_ids: ObjectIdSet,
    new_roots: RootNameMapping,
    notifies: Vec<Notify>,
    serializer: StringTable,
}

impl FullTransaction {
    /// A client-committed transaction. Object id sets are derived from the changes.
    pub fn new(
        source: NodeId,
        transaction_id: TransactionId,
        global_id: GlobalTransactionId,
        changes: Vec<Change>,
    ) -> Self {
        let (object_ids, new_object_ids) = ids_of(&changes);
        Self {
            source,
            transaction_id,
            global_id,
            batch_id: BatchId::default(),
            txn_type: TxnType::Normal,
            lock_ids: Vec::new(),
            changes,
            object_ids,
            new_object_ids,
            new_roots: RootNameMapping::new(),
            notifies: Vec::new(),
            serializer: StringTable::default(),
        }
    }

    /// A sync-origin transaction: object states plus the complete new-root
    /// mapping, no lock identities, no global id.
    pub fn object_sync(
        source: NodeId,
        transaction_id: TransactionId,
        changes: Vec<Change>,
        new_roots: RootNameMapping,
    ) -> Self {
        let mut txn = Self::new(source, transaction_id, GlobalTransactionId::NULL, changes);
        txn.txn_type = TxnType::ObjectSync;
        txn.new_roots = new_roots;
        txn
    }

    pub fn with_batch_id(mut self, batch_id: BatchId) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn with_lock_ids(mut self, lock_ids: Vec<LockId>) -> Self {
        self.lock_ids = lock_ids;
        self
    }

    pub fn with_notifies(mut self, notifies: Vec<Notify>) -> Self {
        self.notifies = notifies;
        self
    }

    pub fn with_new_roots(mut self, new_roots: RootNameMapping) -> Self {
        self.new_roots = new_roots;
        self
    }

    pub fn with_serializer(mut self, serializer: StringTable) -> Self {
        self.serializer = serializer;
        self
    }
}

impl ServerTransaction for FullTransaction {
    fn source(&self) -> NodeId {
        self.source
    }

    fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    fn global_id(&self) -> GlobalTransactionId {
        self.global_id
    }

    fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    fn txn_type(&self) -> TxnType {
        self.txn_type
    }

    fn lock_ids(&self) -> &[LockId] {
        &self.lock_ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }

    fn object_ids(&self) -> &ObjectIdSet {
        &self.object_ids
    }

    fn new_object_ids(&self) -> &ObjectIdSet {
        &self.new_object_ids
    }

    fn new_roots(&self) -> &RootNameMapping {
        &self.new_roots
    }

    fn notifies(&self) -> &[Notify] {
        &self.notifies
    }

    fn serializer(&self) -> &StringTable {
        &self.serializer
    }
}

/// A transaction reduced to the changes the receiving node can apply.
///
/// Batch id, lock ids, serializer, notifies, roots and identities all come
/// from the original.
#[derive(Debug, Clone)]
pub struct PrunedTransaction {
    original: TxnRef,
    changes: Vec<Change>,
    object_ids: ObjectIdSet,
    new_object_ids: ObjectIdSet,
}

impl PrunedTransaction {
    pub fn new(
        original: TxnRef,
        changes: Vec<Change>,
        object_ids: ObjectIdSet,
        new_object_ids: ObjectIdSet,
    ) -> Self {
        Self {
            original,
            changes,
            object_ids,
            new_object_ids,
        }
    }

    /// The transaction this one was pruned from.
    pub fn original(&self) -> &TxnRef {
        &self.original
    }
}

impl ServerTransaction for PrunedTransaction {
    fn source(&self) -> NodeId {
        self.original.source()
    }

    fn transaction_id(&self) -> TransactionId {
        self.original.transaction_id()
    }

    fn global_id(&self) -> GlobalTransactionId {
        self.original.global_id()
    }

    fn batch_id(&self) -> BatchId {
        self.original.batch_id()
    }

    fn txn_type(&self) -> TxnType {
        self.original.txn_type()
    }

    fn lock_ids(&self) -> &[LockId] {
        self.original.lock_ids()
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }

    fn object_ids(&self) -> &ObjectIdSet {
        &self.object_ids
    }

    fn new_object_ids(&self) -> &ObjectIdSet {
        &self.new_object_ids
    }

    fn new_roots(&self) -> &RootNameMapping {
        self.original.new_roots()
    }

    fn notifies(&self) -> &[Notify] {
        self.original.notifies()
    }

    fn serializer(&self) -> &StringTable {
        self.original.serializer()
    }

    fn is_pruned(&self) -> bool {
        true
    }
}

/// Wire form of an object sync transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSyncPayload {
    pub transaction_id: TransactionId,
    pub changes: Vec<Change>,
    pub roots: RootNameMapping,
}

impl ObjectSyncPayload {
    /// Rebuild the transaction on the receiving side.
    pub fn into_transaction(self, source: NodeId) -> FullTransaction {
        FullTransaction::object_sync(source, self.transaction_id, self.changes, self.roots)
    }
}

fn ids_of(changes: &[Change]) -> (ObjectIdSet, ObjectIdSet) {
    let mut all = ObjectIdSet::new();
    let mut created = ObjectIdSet::new();
    for change in changes {
        all.insert(change.object_id);
        if change.is_new {
            created.insert(change.object_id);
        }
    }
    (all, created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::object_ids;

    fn oid(raw: u64) -> ObjectId {
        ObjectId::new(raw)
    }

    #[test]
    fn test_full_transaction_derives_id_sets() {
        let txn = FullTransaction::new(
            NodeId::new(),
            TransactionId::new(1),
            GlobalTransactionId::new(10),
            vec![
                Change::new_object(oid(1), vec![1]),
                Change::delta(oid(2), vec![2]),
            ],
        );

        assert_eq!(txn.object_ids(), &object_ids([1, 2]));
        assert_eq!(txn.new_object_ids(), &object_ids([1]));
        assert_eq!(txn.txn_type(), TxnType::Normal);
        assert!(!txn.is_pruned());
    }

    #[test]
    fn test_object_sync_carries_roots_and_no_locks() {
        let mut roots = RootNameMapping::new();
        roots.insert("root", oid(1));
        let txn = FullTransaction::object_sync(
            NodeId::new(),
            TransactionId::new(5),
            vec![Change::new_object(oid(1), vec![])],
            roots.clone(),
        );

        assert_eq!(txn.txn_type(), TxnType::ObjectSync);
        assert_eq!(txn.new_roots(), &roots);
        assert!(txn.lock_ids().is_empty());
        assert!(txn.global_id().is_null());
    }

    #[test]
    fn test_pruned_delegates_everything_but_changes() {
        let source = NodeId::new();
        let original: TxnRef = Arc::new(
            FullTransaction::new(
                source,
                TransactionId::new(3),
                GlobalTransactionId::new(30),
                vec![
                    Change::new_object(oid(1), vec![]),
                    Change::delta(oid(2), vec![]),
                ],
            )
            .with_batch_id(BatchId(9))
            .with_lock_ids(vec![LockId("lock-a".into())])
            .with_notifies(vec![Notify {
                lock: LockId("lock-a".into()),
                all: true,
            }])
            .with_serializer(StringTable(vec!["field".into()])),
        );

        let pruned = PrunedTransaction::new(
            Arc::clone(&original),
            vec![Change::delta(oid(2), vec![])],
            object_ids([2]),
            ObjectIdSet::new(),
        );

        assert!(pruned.is_pruned());
        assert_eq!(pruned.changes().len(), 1);
        assert_eq!(pruned.object_ids(), &object_ids([2]));
        assert_eq!(pruned.source(), source);
        assert_eq!(pruned.transaction_id(), TransactionId::new(3));
        assert_eq!(pruned.global_id(), GlobalTransactionId::new(30));
        assert_eq!(pruned.batch_id(), BatchId(9));
        assert_eq!(pruned.lock_ids(), original.lock_ids());
        assert_eq!(pruned.notifies(), original.notifies());
        assert_eq!(pruned.serializer(), original.serializer());
    }

    #[test]
    fn test_versioned_change() {
        let change = Change::delta(oid(4), vec![]).versioned(GlobalTransactionId::new(12));
        assert_eq!(change.version, Some(GlobalTransactionId::new(12)));
        assert!(!change.is_new);
    }
}
