//! Replicated Object Manager
//!
//! Cluster-facing side of object replication. On the active it:
//! - asks members for the objects they hold and vets their answers
//! - gates each sync on the collector being disabled
//! - hands batch work to the `ObjectSyncHandler` queue
//! - acknowledges completion and promotes synced passives
//!
//! On a passive it answers object list requests, admits object sync
//! batches and applies collection results from the active.
//!
//! Peers that violate the protocol are zapped, never retried. Local
//! invariant violations are logged as fatal and returned.

use super::config::ReplicationConfig;
use super::errors::{ReplicationError, ReplicationErrorKind, ReplicationResult};
use super::sequence::{SequenceGenerator, SequenceValidator};
use super::sync_handler::{ObjectSyncHandler, SyncObjectsRequest};
use crate::cluster::{
    ClusterMessage, ClusterStateManager, GarbageCollector, GroupTransport, NodeRole,
    ObjectManager, TransactionManager, TransactionalObjectManager, ZapReason,
};
use crate::gc::{CollectionInfo, GateDecision, GcCoordinator, GcResult};
use crate::model::{NodeId, ObjectIdSet, RootNameMapping};
use crate::observability::{log_event_with_fields, Event, SyncMetrics};
use crate::sync::{ObjectStateManager, SyncState};
use crate::txn::{
    AdmissionMode, ObjectSyncPayload, SyncAdmission, TransactionAdmissionGate, TxnRef,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// External services the replication core drives.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn GroupTransport>,
    pub cluster: Arc<dyn ClusterStateManager>,
    pub objects: Arc<dyn ObjectManager>,
    pub collector: Arc<dyn GarbageCollector>,
    pub transactions: Arc<dyn TransactionManager>,
    pub applier: Arc<dyn TransactionalObjectManager>,
}

/// Replication protocol endpoint for one node.
pub struct ReplicatedObjectManager {
    config: ReplicationConfig,
    transport: Arc<dyn GroupTransport>,
    cluster: Arc<dyn ClusterStateManager>,
    objects: Arc<dyn ObjectManager>,
    collector: Arc<dyn GarbageCollector>,
    transactions: Arc<dyn TransactionManager>,
    state: ObjectStateManager,
    gc: GcCoordinator,
    gate: TransactionAdmissionGate,
    sequences: SequenceGenerator,
    acknowledgements: SequenceValidator,
    // set once the first object sync batch arrives; the database is dirty from then on
    sync_started: AtomicBool,
    work: mpsc::UnboundedSender<SyncObjectsRequest>,
    metrics: Arc<SyncMetrics>,
    this: Weak<Self>,
}

impl ReplicatedObjectManager {
    /// Validate `config` and wire the manager to its batch driver.
    pub fn start(
        config: ReplicationConfig,
        collaborators: Collaborators,
    ) -> ReplicationResult<(Arc<Self>, ObjectSyncHandler)> {
        config.validate()?;

        let Collaborators {
            transport,
            cluster,
            objects,
            collector,
            transactions,
            applier,
        } = collaborators;
        let metrics = Arc::new(SyncMetrics::new());
        let (work, requests) = mpsc::unbounded_channel();

        let mode = match cluster.current_role() {
            NodeRole::ActiveCoordinator => AdmissionMode::Active,
            NodeRole::PassiveStandby => AdmissionMode::PassiveStandby,
            NodeRole::PassiveUninitialized => AdmissionMode::uninitialized(),
        };
        let batch_size = config.object_sync_batch_size;

        let manager = Arc::new_cyclic(|this| Self {
            state: ObjectStateManager::new(Arc::clone(&objects), Arc::clone(&metrics)),
            gc: GcCoordinator::new(
                Arc::clone(&collector),
                Arc::clone(&transactions),
                Arc::clone(&transport),
                config.gc_retry_policy(),
                Arc::clone(&metrics),
            ),
            gate: TransactionAdmissionGate::with_mode(Arc::clone(&transactions), applier, mode),
            config,
            transport,
            cluster,
            objects,
            collector,
            transactions,
            sequences: SequenceGenerator::new(),
            acknowledgements: SequenceValidator::new(),
            sync_started: AtomicBool::new(false),
            work,
            metrics,
            this: this.clone(),
        });

        let handler = ObjectSyncHandler::new(Arc::downgrade(&manager), requests, batch_size);
        Ok((manager, handler))
    }

    // ==================
    // Active side
    // ==================

    /// Ask every member for its objects and start syncing the eligible ones.
    pub fn sync_all_members(&self) -> ReplicationResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        if !self.cluster.is_active_coordinator() {
            let err = ReplicationError::wrong_role("sync of all members requested while not active");
            self.report(None, &err);
            return Err(err);
        }

        let responses = self
            .transport
            .send_all_and_await(ClusterMessage::ObjectListRequest)
            .map_err(|e| {
                let err = ReplicationError::from(e);
                self.report(None, &err);
                err
            })?;

        let mut eligible = Vec::new();
        for (node, message) in responses {
            match message {
                ClusterMessage::ObjectListResponse {
                    object_ids,
                    is_clean_database,
                } => {
                    if self.gc.is_syncing_or_synced(node) {
                        log_event_with_fields(
                            Event::NodeAddRejected,
                            &[("node", &node.to_string()), ("cause", "already syncing")],
                        );
                    } else if !is_clean_database {
                        self.zap_dirty(node);
                    } else if !object_ids.is_empty() {
                        self.zap(
                            node,
                            ZapReason::PartiallySyncedPassive,
                            &format!(
                                "unexpected objects: {} joined holding {} objects",
                                node,
                                object_ids.len()
                            ),
                        );
                    } else {
                        eligible.push((node, object_ids));
                    }
                }
                other => self.zap(
                    node,
                    ZapReason::ProgramError,
                    &format!("wrong response {} to object list request from {}", other, node),
                ),
            }
        }

        for (node, known) in self.gc.disable_and_admit(eligible) {
            self.start_sync(node, known);
        }
        Ok(())
    }

    /// Ask one member for its objects.
    pub fn query(&self, node: NodeId) -> ReplicationResult<()> {
        self.transport
            .send_to(node, ClusterMessage::ObjectListRequest)
            .map_err(ReplicationError::from)
    }

    /// A member answered an object list request.
    pub fn on_list_response(&self, from: NodeId, object_ids: ObjectIdSet, is_clean_database: bool) {
        if !self.config.enabled {
            return;
        }
        if !self.cluster.is_active_coordinator() {
            self.zap(
                from,
                ZapReason::ProgramError,
                &format!("object list response from {} while not active coordinator", from),
            );
            return;
        }
        if self.gc.is_syncing_or_synced(from) {
            log_event_with_fields(
                Event::NodeAddRejected,
                &[("node", &from.to_string()), ("cause", "sync already initiated")],
            );
            return;
        }
        if !is_clean_database {
            self.zap_dirty(from);
            return;
        }

        if self.gc.await_transactions(from) {
            self.when_transactions_applied(move |manager| {
                manager.admit_when_gc_disabled(from, object_ids)
            });
        }
    }

    /// A member could not answer in its current role.
    pub fn on_list_failed_response(&self, from: NodeId) {
        self.zap(
            from,
            ZapReason::ProgramError,
            &format!("object list failed response from {}", from),
        );
    }

    /// `count` objects remain for `node`.
    ///
    /// Zero promotes the node; anything else queues another batch.
    pub fn on_missing_object_count(&self, node: NodeId, count: usize) {
        if count == 0 {
            self.on_sync_complete_promote(node);
        } else if self.work.send(SyncObjectsRequest::new(node)).is_err() {
            log_event_with_fields(
                Event::SyncCancelled,
                &[("node", &node.to_string()), ("cause", "sync driver stopped")],
            );
        }
    }

    /// Release the collector hold for `node` and move it to passive standby.
    pub fn on_sync_complete_promote(&self, node: NodeId) {
        self.gc.sync_complete_for(node);
        self.cluster.move_node_to_passive_standby(node);
        log_event_with_fields(Event::NodePromoted, &[("node", &node.to_string())]);
    }

    /// Acknowledge a completed sync to `node` and promote it.
    pub fn on_sync_completed(&self, node: NodeId) -> ReplicationResult<()> {
        let sequence = self.sequences.next_sequence(node);
        if let Err(err) = self
            .transport
            .send_to(node, ClusterMessage::SyncCompleted { sequence })
        {
            self.zap(
                node,
                ZapReason::CommunicationError,
                &format!("error sending sync completed to {}: {}", node, err),
            );
            return Err(err.into());
        }

        self.metrics.increment_syncs_completed();
        log_event_with_fields(
            Event::SyncCompleted,
            &[("node", &node.to_string()), ("sequence", &sequence.to_string())],
        );
        self.on_sync_complete_promote(node);
        Ok(())
    }

    /// Whether outgoing transactions must be mirrored to anyone.
    pub fn relay_transactions(&self) -> bool {
        self.config.enabled && self.state.node_count() > 0
    }

    /// The local collector finished a cycle.
    pub fn on_collection_completed(&self, info: CollectionInfo, deleted: ObjectIdSet) {
        for (node, known) in self.gc.on_collection_completed(GcResult::new(info, deleted)) {
            self.start_sync(node, known);
        }
    }

    // ==================
    // Passive side
    // ==================

    /// The active asked which objects this node holds.
    pub fn on_list_request(&self, from: NodeId) {
        log_event_with_fields(Event::ListRequestReceived, &[("from", &from.to_string())]);

        if self.cluster.is_active_coordinator() {
            if let Err(err) = self
                .transport
                .send_to(from, ClusterMessage::ObjectListFailedResponse)
            {
                self.report(Some(from), &err.into());
            }
            self.zap(
                from,
                ZapReason::SplitBrain,
                &format!(
                    "split-brain: object list request from {} while active coordinator",
                    from
                ),
            );
            return;
        }

        self.when_transactions_applied(move |manager| manager.reply_object_list(from));
    }

    /// A collection result from the active.
    pub fn on_gc_result(&self, from: NodeId, result: GcResult) {
        let iteration = result.iteration.to_string();
        if self.cluster.is_active_coordinator() {
            log_event_with_fields(
                Event::GcResultIgnored,
                &[
                    ("from", &from.to_string()),
                    ("iteration", &iteration),
                    ("cause", "this node is active"),
                ],
            );
            return;
        }

        if self.collector.delete_garbage(&result.deleted, &result.info) {
            self.metrics.increment_gc_results_applied();
            log_event_with_fields(
                Event::GcResultApplied,
                &[
                    ("from", &from.to_string()),
                    ("iteration", &iteration),
                    ("deleted", &result.deleted.len().to_string()),
                ],
            );
        } else {
            log_event_with_fields(
                Event::GcResultIgnored,
                &[
                    ("from", &from.to_string()),
                    ("iteration", &iteration),
                    ("cause", "collector rejected result"),
                ],
            );
        }

        self.on_collection_completed(result.info, ObjectIdSet::new());
    }

    /// One batch of objects from the active.
    pub fn on_object_sync(
        &self,
        from: NodeId,
        transaction: ObjectSyncPayload,
        deleted: ObjectIdSet,
    ) -> ReplicationResult<SyncAdmission> {
        let txn: TxnRef = Arc::new(transaction.into_transaction(from));
        let admission = self.gate.admit_sync_transaction(txn, &deleted).map_err(|e| {
            let err = ReplicationError::from(e);
            self.report(Some(from), &err);
            err
        })?;
        self.sync_started.store(true, Ordering::SeqCst);
        Ok(admission)
    }

    /// The active acknowledged that this node's sync completed.
    pub fn on_sync_completed_message(&self, from: NodeId, sequence: u64) -> ReplicationResult<()> {
        if self.cluster.is_active_coordinator() {
            self.zap(
                from,
                ZapReason::ProgramError,
                &format!("sync completed from {} while active coordinator", from),
            );
            return Ok(());
        }
        if !self.acknowledgements.accept(from, sequence) {
            let err = ReplicationError::sequence_regression(format!(
                "sync completed sequence {} from {} does not follow {:?}",
                sequence,
                from,
                self.acknowledgements.last_accepted(from)
            ));
            self.report(Some(from), &err);
            return Err(err);
        }

        self.cluster.object_sync_completed();
        log_event_with_fields(
            Event::SyncAcknowledged,
            &[("from", &from.to_string()), ("sequence", &sequence.to_string())],
        );
        Ok(())
    }

    /// Switch admission behaviour with the node's role.
    pub fn on_role_changed(&self, role: NodeRole) {
        self.gate.on_role_changed(role);
    }

    // ==================
    // Membership and dispatch
    // ==================

    /// `node` disconnected. Idempotent.
    pub fn on_node_left(&self, node: NodeId) {
        self.state.remove(node);
        self.gc.on_node_removed(node);
        self.sequences.clear(node);
        self.acknowledgements.clear(node);
    }

    /// Route an incoming group message.
    pub fn on_message(&self, from: NodeId, message: ClusterMessage) -> ReplicationResult<()> {
        match message {
            ClusterMessage::ObjectListRequest => self.on_list_request(from),
            ClusterMessage::ObjectListResponse {
                object_ids,
                is_clean_database,
            } => self.on_list_response(from, object_ids, is_clean_database),
            ClusterMessage::ObjectListFailedResponse => self.on_list_failed_response(from),
            ClusterMessage::GcResult { result } => self.on_gc_result(from, result),
            ClusterMessage::SyncCompleted { sequence } => {
                self.on_sync_completed_message(from, sequence)?
            }
            ClusterMessage::ObjectSync {
                transaction,
                deleted_ids,
            } => {
                self.on_object_sync(from, transaction, deleted_ids)?;
            }
        }
        Ok(())
    }

    // ==================
    // Accessors
    // ==================

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn state(&self) -> &ObjectStateManager {
        &self.state
    }

    pub fn gc(&self) -> &GcCoordinator {
        &self.gc
    }

    pub fn gate(&self) -> &TransactionAdmissionGate {
        &self.gate
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub(crate) fn objects(&self) -> &dyn ObjectManager {
        self.objects.as_ref()
    }

    pub(crate) fn transport(&self) -> &dyn GroupTransport {
        self.transport.as_ref()
    }

    // ==================
    // Internals
    // ==================

    /// Missing set drained for `node`; finish once in-flight transactions apply.
    pub(crate) fn on_pending_notify(&self, node: NodeId) {
        log_event_with_fields(Event::SyncPendingNotify, &[("node", &node.to_string())]);
        self.when_transactions_applied(move |manager| {
            let finished = manager
                .state
                .mark_in_sync(node)
                .map_err(ReplicationError::from)
                .and_then(|()| manager.on_sync_completed(node));
            if let Err(err) = finished {
                manager.report(Some(node), &err);
            }
        });
    }

    /// Log `err` at the severity its kind calls for.
    pub(crate) fn report(&self, node: Option<NodeId>, err: &ReplicationError) {
        let node = node.map(|n| n.to_string()).unwrap_or_default();
        let message = err.to_string();
        let fields = [("node", node.as_str()), ("error", message.as_str())];
        let event = if err.is_fatal() {
            Event::InvariantViolation
        } else if err.kind == ReplicationErrorKind::Transport {
            Event::SendFailed
        } else {
            Event::SyncCancelled
        };
        log_event_with_fields(event, &fields);
    }

    fn start_sync(&self, node: NodeId, known: ObjectIdSet) {
        if !self.state.add(node, known, RootNameMapping::new()) {
            return;
        }
        if !self.gc.is_admitted(node) {
            // left between admission and registration
            self.state.remove(node);
            log_event_with_fields(
                Event::SyncCancelled,
                &[("node", &node.to_string()), ("cause", "left before sync start")],
            );
            return;
        }
        self.when_transactions_applied(move |manager| manager.compute_diff_for(node));
    }

    fn compute_diff_for(&self, node: NodeId) {
        match self.state.compute_diff(node) {
            Ok(summary) if summary.state == SyncState::InSync => {
                if let Err(err) = self.on_sync_completed(node) {
                    self.report(Some(node), &err);
                }
            }
            Ok(summary) => self.on_missing_object_count(node, summary.backlog()),
            Err(err) => self.report(Some(node), &err.into()),
        }
    }

    fn admit_when_gc_disabled(&self, node: NodeId, known: ObjectIdSet) {
        match self.gc.request_sync_when_gc_disabled(node, known) {
            GateDecision::StartNow(known) => self.start_sync(node, known),
            GateDecision::Queued => {}
            GateDecision::AlreadyTracked => {}
            GateDecision::Cancelled => log_event_with_fields(
                Event::SyncCancelled,
                &[("node", &node.to_string()), ("cause", "left before sync start")],
            ),
        }
    }

    fn reply_object_list(&self, to: NodeId) {
        let known = self.objects.all_object_ids();
        self.gate.init(&known);
        let clean = self.cluster.is_clean_database() && !self.sync_started.load(Ordering::SeqCst);
        let count = known.len().to_string();

        let reply = ClusterMessage::ObjectListResponse {
            object_ids: known,
            is_clean_database: clean,
        };
        match self.transport.send_to(to, reply) {
            Ok(()) => log_event_with_fields(
                Event::ListResponseSent,
                &[
                    ("to", &to.to_string()),
                    ("objects", &count),
                    ("clean", &clean.to_string()),
                ],
            ),
            Err(err) => self.report(Some(to), &err.into()),
        }
    }

    fn zap_dirty(&self, node: NodeId) {
        self.zap(
            node,
            ZapReason::NodeJoinedWithDirtyDb,
            &format!(
                "stale database: {} joined with state from an earlier run or sync",
                node
            ),
        );
    }

    fn zap(&self, node: NodeId, reason: ZapReason, detail: &str) {
        self.transport.sever(node, reason, detail);
        self.metrics.increment_nodes_zapped();
        log_event_with_fields(
            Event::NodeZapped,
            &[
                ("node", &node.to_string()),
                ("reason", reason.as_str()),
                ("detail", detail),
            ],
        );
    }

    fn when_transactions_applied<F>(&self, continuation: F)
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let this = self.this.clone();
        self.transactions
            .callback_on_all_current_transactions_applied(Box::new(move || {
                if let Some(manager) = this.upgrade() {
                    continuation(&manager);
                }
            }));
    }
}
