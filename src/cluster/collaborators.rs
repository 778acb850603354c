//! Collaborator interfaces
//!
//! The synchronization core never owns storage, the collector, the
//! transaction pipeline or the network. It reaches them through these
//! traits so tests can substitute in-memory implementations.

use super::errors::TransportResult;
use super::messages::{ClusterMessage, ZapReason};
use crate::gc::CollectionInfo;
use crate::model::{NodeId, ObjectIdSet, RootNameMapping, TransactionId};
use crate::txn::{Change, TxnRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One-shot continuation run once every transaction admitted so far has
/// been applied.
pub type TxnsApplied = Box<dyn FnOnce() + Send + 'static>;

/// Role of the local node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// The single node accepting writes
    ActiveCoordinator,
    /// Passive that has not finished its initial sync
    PassiveUninitialized,
    /// Fully synced passive, eligible for promotion
    PassiveStandby,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveCoordinator => "ACTIVE_COORDINATOR",
            Self::PassiveUninitialized => "PASSIVE_UNINITIALIZED",
            Self::PassiveStandby => "PASSIVE_STANDBY",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object states read for one sync batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPayload {
    /// Full state of every object that could be read
    pub changes: Vec<Change>,
    /// Objects that were checked out and must be retried later
    pub busy: ObjectIdSet,
    /// Requested objects that no longer exist
    pub deleted: ObjectIdSet,
}

/// Group messaging between cluster members.
pub trait GroupTransport: Send + Sync {
    /// Unicast.
    fn send_to(&self, node: NodeId, message: ClusterMessage) -> TransportResult<()>;

    /// Broadcast, fire-and-forget.
    fn send_all(&self, message: ClusterMessage) -> TransportResult<()>;

    /// Broadcast and collect one response per member.
    fn send_all_and_await(
        &self,
        message: ClusterMessage,
    ) -> TransportResult<Vec<(NodeId, ClusterMessage)>>;

    /// Sever a peer's connection.
    fn sever(&self, node: NodeId, reason: ZapReason, detail: &str);
}

/// Authoritative object store.
pub trait ObjectManager: Send + Sync {
    /// Every live object id.
    fn all_object_ids(&self) -> ObjectIdSet;

    /// Every named root.
    fn root_name_mapping(&self) -> RootNameMapping;

    /// Read the full state of `ids` for shipping.
    fn sync_payload(&self, ids: &ObjectIdSet) -> SyncPayload;
}

/// Distributed garbage collector.
pub trait GarbageCollector: Send + Sync {
    /// Try to suppress collection. False while a cycle is running.
    fn disable(&self) -> bool;

    /// Allow collection again.
    fn enable(&self);

    /// Apply a remote collection result. False if it could not be applied.
    fn delete_garbage(&self, deleted: &ObjectIdSet, info: &CollectionInfo) -> bool;
}

/// Local transaction pipeline.
pub trait TransactionManager: Send + Sync {
    /// Admit transactions from `source`. `resent` marks replay after a role change.
    fn incoming_transactions(&self, source: NodeId, txns: &[TxnRef], resent: bool);

    /// Run `callback` once every transaction admitted so far has been applied.
    fn callback_on_all_current_transactions_applied(&self, callback: TxnsApplied);

    /// Transactions admitted but not yet applied.
    fn pending_transaction_count(&self) -> usize;
}

/// Applies admitted transactions to the object graph.
pub trait TransactionalObjectManager: Send + Sync {
    fn add_transactions(&self, txns: Vec<TxnRef>, completed: Vec<TransactionId>);
}

/// Local view of cluster membership and role.
pub trait ClusterStateManager: Send + Sync {
    fn is_active_coordinator(&self) -> bool;

    fn current_role(&self) -> NodeRole;

    /// Whether persisted state is clean (no earlier run left data behind).
    fn is_clean_database(&self) -> bool;

    /// Mark a passive as synced and promotable.
    fn move_node_to_passive_standby(&self, node: NodeId);

    /// This passive was told by the active that its sync completed.
    fn object_sync_completed(&self);
}
