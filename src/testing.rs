//! In-memory collaborators for exercising the replication core.
//!
//! Every external service the core talks to has a scripted stand-in here:
//!
//! - **Transport**: records unicasts, broadcasts and zaps; sends can be
//!   failed per node and `send_all_and_await` answers from a script
//! - **Object store**: a plain id set with roots and a busy set
//! - **Collector**: can be marked as running so disabling fails
//! - **Transaction pipeline**: holds continuations until `drain`
//! - **Cluster state**: role, clean flag and promotion record
//!
//! `TestCluster` wires all of them to one `ReplicatedObjectManager`.
//!
//! ## Example
//!
//! ```ignore
//! use objsync::testing::TestCluster;
//!
//! let mut cluster = TestCluster::active(&[1, 2, 3]);
//! cluster.manager.on_list_response(node, ObjectIdSet::new(), true);
//! cluster.settle();
//! ```

use std::{
    collections::{BTreeSet, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use crate::cluster::{
    ClusterMessage, ClusterStateManager, GarbageCollector, GroupTransport, NodeRole,
    ObjectManager, SyncPayload, TransactionManager, TransactionalObjectManager, TransportError,
    TransportResult, TxnsApplied, ZapReason,
};
use crate::gc::CollectionInfo;
use crate::model::{NodeId, ObjectId, ObjectIdSet, RootNameMapping, TransactionId};
use crate::replication::{Collaborators, ObjectSyncHandler, ReplicatedObjectManager, ReplicationConfig};
use crate::txn::{Change, ObjectSyncPayload, TxnRef};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Transport
// ============================================================================

/// Transport that records traffic instead of delivering it.
///
/// Every message is pushed through the wire codec, so anything recorded
/// here is known to encode and decode.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(NodeId, ClusterMessage)>>,
    broadcasts: Mutex<Vec<ClusterMessage>>,
    zaps: Mutex<Vec<(NodeId, ZapReason, String)>>,
    responses: Mutex<Vec<(NodeId, ClusterMessage)>>,
    failing: Mutex<HashSet<NodeId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `send_all_and_await` with `response` from `node`.
    pub fn respond_with(&self, node: NodeId, response: ClusterMessage) {
        lock(&self.responses).push((node, response));
    }

    /// Make every unicast to `node` fail.
    pub fn fail_sends_to(&self, node: NodeId) {
        lock(&self.failing).insert(node);
    }

    /// Undo `fail_sends_to`.
    pub fn restore_sends_to(&self, node: NodeId) {
        lock(&self.failing).remove(&node);
    }

    /// Unicasts in send order.
    pub fn sent(&self) -> Vec<(NodeId, ClusterMessage)> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, node: NodeId) -> Vec<ClusterMessage> {
        lock(&self.sent)
            .iter()
            .filter(|(to, _)| *to == node)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<ClusterMessage> {
        lock(&self.broadcasts).clone()
    }

    pub fn zaps(&self) -> Vec<(NodeId, ZapReason, String)> {
        lock(&self.zaps).clone()
    }

    pub fn was_zapped(&self, node: NodeId) -> bool {
        lock(&self.zaps).iter().any(|(zapped, _, _)| *zapped == node)
    }

    /// Object sync batches shipped to `node`, with their deleted ids.
    pub fn object_syncs_to(&self, node: NodeId) -> Vec<(ObjectSyncPayload, ObjectIdSet)> {
        self.sent_to(node)
            .into_iter()
            .filter_map(|message| match message {
                ClusterMessage::ObjectSync {
                    transaction,
                    deleted_ids,
                } => Some((transaction, deleted_ids)),
                _ => None,
            })
            .collect()
    }

    /// Sequences of the sync completed messages sent to `node`.
    pub fn sync_completed_to(&self, node: NodeId) -> Vec<u64> {
        self.sent_to(node)
            .into_iter()
            .filter_map(|message| match message {
                ClusterMessage::SyncCompleted { sequence } => Some(sequence),
                _ => None,
            })
            .collect()
    }

    fn through_wire(message: ClusterMessage) -> TransportResult<ClusterMessage> {
        ClusterMessage::decode(&message.encode()?)
    }
}

impl GroupTransport for RecordingTransport {
    fn send_to(&self, node: NodeId, message: ClusterMessage) -> TransportResult<()> {
        if lock(&self.failing).contains(&node) {
            return Err(TransportError::SendFailed {
                node,
                reason: "scripted failure".to_string(),
            });
        }
        let message = Self::through_wire(message)?;
        lock(&self.sent).push((node, message));
        Ok(())
    }

    fn send_all(&self, message: ClusterMessage) -> TransportResult<()> {
        let message = Self::through_wire(message)?;
        lock(&self.broadcasts).push(message);
        Ok(())
    }

    fn send_all_and_await(
        &self,
        message: ClusterMessage,
    ) -> TransportResult<Vec<(NodeId, ClusterMessage)>> {
        self.send_all(message)?;
        std::mem::take(&mut *lock(&self.responses))
            .into_iter()
            .map(|(node, response)| Self::through_wire(response).map(|response| (node, response)))
            .collect()
    }

    fn sever(&self, node: NodeId, reason: ZapReason, detail: &str) {
        lock(&self.zaps).push((node, reason, detail.to_string()));
    }
}

// ============================================================================
// Object store
// ============================================================================

/// Object store holding ids only; object state is the id's bytes.
#[derive(Default)]
pub struct InMemoryObjectManager {
    objects: Mutex<ObjectIdSet>,
    roots: Mutex<RootNameMapping>,
    busy: Mutex<ObjectIdSet>,
    payload_requests: AtomicUsize,
}

impl InMemoryObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects<I: IntoIterator<Item = u64>>(ids: I) -> Self {
        let manager = Self::new();
        manager.add_objects(ids);
        manager
    }

    pub fn add_objects<I: IntoIterator<Item = u64>>(&self, ids: I) {
        let mut objects = lock(&self.objects);
        for id in ids {
            objects.insert(ObjectId::new(id));
        }
    }

    pub fn delete_objects(&self, ids: &ObjectIdSet) {
        lock(&self.objects).remove_all(ids);
    }

    /// Name `id` as a root. The object is created if absent.
    pub fn add_root(&self, name: &str, id: u64) {
        lock(&self.objects).insert(ObjectId::new(id));
        lock(&self.roots).insert(name, ObjectId::new(id));
    }

    /// Objects reported as checked out until replaced.
    pub fn set_busy(&self, busy: ObjectIdSet) {
        *lock(&self.busy) = busy;
    }

    pub fn payload_requests(&self) -> usize {
        self.payload_requests.load(Ordering::SeqCst)
    }
}

impl ObjectManager for InMemoryObjectManager {
    fn all_object_ids(&self) -> ObjectIdSet {
        lock(&self.objects).clone()
    }

    fn root_name_mapping(&self) -> RootNameMapping {
        lock(&self.roots).clone()
    }

    fn sync_payload(&self, ids: &ObjectIdSet) -> SyncPayload {
        self.payload_requests.fetch_add(1, Ordering::SeqCst);
        let objects = lock(&self.objects);
        let busy = lock(&self.busy);

        let mut payload = SyncPayload::default();
        for id in ids.iter() {
            if busy.contains(id) {
                payload.busy.insert(*id);
            } else if objects.contains(id) {
                payload
                    .changes
                    .push(Change::new_object(*id, id.as_u64().to_be_bytes().to_vec()));
            } else {
                payload.deleted.insert(*id);
            }
        }
        payload
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Collector whose disable succeeds unless a cycle is "running".
#[derive(Default)]
pub struct ScriptedCollector {
    running: AtomicBool,
    disabled: AtomicBool,
    reject_results: AtomicBool,
    disable_calls: AtomicUsize,
    enable_count: AtomicUsize,
    applied: Mutex<Vec<(ObjectIdSet, CollectionInfo)>>,
    before_disable: Mutex<Option<TxnsApplied>>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Make `delete_garbage` refuse results.
    pub fn reject_results(&self, reject: bool) {
        self.reject_results.store(reject, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> usize {
        self.disable_calls.load(Ordering::SeqCst)
    }

    pub fn enable_count(&self) -> usize {
        self.enable_count.load(Ordering::SeqCst)
    }

    /// Run `hook` once, at the start of the next `disable` call.
    pub fn before_next_disable(&self, hook: impl FnOnce() + Send + 'static) {
        *lock(&self.before_disable) = Some(Box::new(hook));
    }

    /// Results applied through `delete_garbage`.
    pub fn applied(&self) -> Vec<(ObjectIdSet, CollectionInfo)> {
        lock(&self.applied).clone()
    }
}

impl GarbageCollector for ScriptedCollector {
    fn disable(&self) -> bool {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        let hook = lock(&self.before_disable).take();
        if let Some(hook) = hook {
            hook();
        }
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.disabled.store(true, Ordering::SeqCst);
        true
    }

    fn enable(&self) {
        self.enable_count.fetch_add(1, Ordering::SeqCst);
        self.disabled.store(false, Ordering::SeqCst);
    }

    fn delete_garbage(&self, deleted: &ObjectIdSet, info: &CollectionInfo) -> bool {
        if self.reject_results.load(Ordering::SeqCst) {
            return false;
        }
        lock(&self.applied).push((deleted.clone(), info.clone()));
        true
    }
}

// ============================================================================
// Transaction pipeline
// ============================================================================

/// Transaction pipeline that applies nothing until told to.
///
/// Continuations registered through
/// `callback_on_all_current_transactions_applied` run on `drain`.
#[derive(Default)]
pub struct ManualTransactionManager {
    incoming: Mutex<Vec<TxnRef>>,
    last_resent: AtomicBool,
    callbacks: Mutex<Vec<TxnsApplied>>,
    pending: AtomicUsize,
}

impl ManualTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transaction received so far.
    pub fn incoming(&self) -> Vec<TxnRef> {
        lock(&self.incoming).clone()
    }

    pub fn last_resent(&self) -> bool {
        self.last_resent.load(Ordering::SeqCst)
    }

    pub fn set_pending_count(&self, pending: usize) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    pub fn waiting_callbacks(&self) -> usize {
        lock(&self.callbacks).len()
    }

    /// Run the waiting continuations, including ones they register.
    /// Returns how many ran.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            let callbacks = std::mem::take(&mut *lock(&self.callbacks));
            if callbacks.is_empty() {
                return ran;
            }
            for callback in callbacks {
                callback();
                ran += 1;
            }
        }
    }
}

impl TransactionManager for ManualTransactionManager {
    fn incoming_transactions(&self, _source: NodeId, txns: &[TxnRef], resent: bool) {
        lock(&self.incoming).extend(txns.iter().cloned());
        self.last_resent.store(resent, Ordering::SeqCst);
    }

    fn callback_on_all_current_transactions_applied(&self, callback: TxnsApplied) {
        lock(&self.callbacks).push(callback);
    }

    fn pending_transaction_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Records what the admission gate hands to the object graph.
#[derive(Default)]
pub struct RecordingObjectSink {
    added: Mutex<Vec<TxnRef>>,
    completed: Mutex<Vec<TransactionId>>,
}

impl RecordingObjectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&self) -> Vec<TxnRef> {
        lock(&self.added).clone()
    }

    pub fn completed(&self) -> Vec<TransactionId> {
        lock(&self.completed).clone()
    }

    /// Ids of every object touched by an added transaction.
    pub fn applied_objects(&self) -> BTreeSet<u64> {
        lock(&self.added)
            .iter()
            .flat_map(|txn| txn.object_ids().iter().map(|id| id.as_u64()).collect::<Vec<_>>())
            .collect()
    }
}

impl TransactionalObjectManager for RecordingObjectSink {
    fn add_transactions(&self, txns: Vec<TxnRef>, completed: Vec<TransactionId>) {
        lock(&self.added).extend(txns);
        lock(&self.completed).extend(completed);
    }
}

// ============================================================================
// Cluster state
// ============================================================================

/// Cluster state with a settable role.
pub struct InMemoryClusterState {
    role: Mutex<NodeRole>,
    clean: AtomicBool,
    promoted: Mutex<Vec<NodeId>>,
    sync_completed: AtomicUsize,
}

impl InMemoryClusterState {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role: Mutex::new(role),
            clean: AtomicBool::new(true),
            promoted: Mutex::new(Vec::new()),
            sync_completed: AtomicUsize::new(0),
        }
    }

    pub fn set_role(&self, role: NodeRole) {
        *lock(&self.role) = role;
    }

    pub fn set_clean(&self, clean: bool) {
        self.clean.store(clean, Ordering::SeqCst);
    }

    /// Nodes moved to passive standby, in order.
    pub fn promoted(&self) -> Vec<NodeId> {
        lock(&self.promoted).clone()
    }

    pub fn sync_completed_count(&self) -> usize {
        self.sync_completed.load(Ordering::SeqCst)
    }
}

impl ClusterStateManager for InMemoryClusterState {
    fn is_active_coordinator(&self) -> bool {
        *lock(&self.role) == NodeRole::ActiveCoordinator
    }

    fn current_role(&self) -> NodeRole {
        *lock(&self.role)
    }

    fn is_clean_database(&self) -> bool {
        self.clean.load(Ordering::SeqCst)
    }

    fn move_node_to_passive_standby(&self, node: NodeId) {
        lock(&self.promoted).push(node);
    }

    fn object_sync_completed(&self) {
        self.sync_completed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Wired cluster
// ============================================================================

/// One replication endpoint wired to in-memory collaborators.
pub struct TestCluster {
    pub manager: Arc<ReplicatedObjectManager>,
    pub handler: ObjectSyncHandler,
    pub transport: Arc<RecordingTransport>,
    pub state: Arc<InMemoryClusterState>,
    pub objects: Arc<InMemoryObjectManager>,
    pub collector: Arc<ScriptedCollector>,
    pub transactions: Arc<ManualTransactionManager>,
    pub applier: Arc<RecordingObjectSink>,
}

impl TestCluster {
    /// Configuration with millisecond collector retries.
    pub fn config() -> ReplicationConfig {
        ReplicationConfig {
            gc_disable_max_attempts: 3,
            gc_disable_backoff_ms: 1,
            gc_disable_max_backoff_ms: 2,
            ..ReplicationConfig::default()
        }
    }

    /// Active coordinator holding `objects`.
    pub fn active(objects: &[u64]) -> Self {
        Self::with_config(Self::config(), NodeRole::ActiveCoordinator, objects)
    }

    /// Active coordinator shipping at most `batch_size` objects per batch.
    pub fn active_with_batch(objects: &[u64], batch_size: usize) -> Self {
        let config = ReplicationConfig {
            object_sync_batch_size: batch_size,
            ..Self::config()
        };
        Self::with_config(config, NodeRole::ActiveCoordinator, objects)
    }

    /// Uninitialized passive holding `objects`.
    pub fn passive(objects: &[u64]) -> Self {
        Self::with_config(Self::config(), NodeRole::PassiveUninitialized, objects)
    }

    pub fn with_config(config: ReplicationConfig, role: NodeRole, objects: &[u64]) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let state = Arc::new(InMemoryClusterState::new(role));
        let store = Arc::new(InMemoryObjectManager::with_objects(objects.iter().copied()));
        let collector = Arc::new(ScriptedCollector::new());
        let transactions = Arc::new(ManualTransactionManager::new());
        let applier = Arc::new(RecordingObjectSink::new());

        let collaborators = Collaborators {
            transport: transport.clone(),
            cluster: state.clone(),
            objects: store.clone(),
            collector: collector.clone(),
            transactions: transactions.clone(),
            applier: applier.clone(),
        };
        let (manager, handler) = match ReplicatedObjectManager::start(config, collaborators) {
            Ok(started) => started,
            Err(err) => panic!("test cluster failed to start: {}", err),
        };

        Self {
            manager,
            handler,
            transport,
            state,
            objects: store,
            collector,
            transactions,
            applier,
        }
    }

    /// Alternate draining transactions and sync requests until both are idle.
    ///
    /// Returns the number of rounds; gives up after `MAX_ROUNDS`.
    pub fn settle(&mut self) -> usize {
        const MAX_ROUNDS: usize = 10_000;
        for round in 0..MAX_ROUNDS {
            let ran = self.transactions.drain();
            let handled = self.handler.drain_pending();
            if ran == 0 && handled == 0 {
                return round;
            }
        }
        MAX_ROUNDS
    }
}
