//! Transaction Admission Gate
//!
//! Every transaction reaching this node from the active, committed or
//! generated by object sync, enters the local transaction manager and then
//! the transactional object manager through here, so sync never bypasses
//! transaction bookkeeping.
//!
//! Behaviour depends on the node's role:
//! - Uninitialized passive: prunes what it already has, parks deltas to
//!   objects it has not received yet, replays them once the object arrives
//! - Standby passive: passes everything through, ignores object sync
//! - Active: receives nothing; stray commits are dropped, an object sync
//!   transaction is a local invariant violation

use super::errors::{AdmissionError, AdmissionResult};
use super::pending::PendingChangesAccount;
use super::transaction::{Change, PrunedTransaction, TxnRef};
use crate::cluster::{NodeRole, TransactionManager, TransactionalObjectManager};
use crate::model::{GlobalTransactionId, NodeId, ObjectId, ObjectIdSet, TransactionId};
use crate::observability::{log_event_at, log_event_with_fields, Event, Severity};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Role-dependent admission behaviour.
#[derive(Debug)]
pub enum AdmissionMode {
    /// Initial sync in progress
    PassiveUninitialized {
        /// Objects this node holds or has been sent
        existing: ObjectIdSet,
        /// Deltas waiting for their object
        pending: PendingChangesAccount,
    },
    /// Fully synced passive
    PassiveStandby,
    /// This node is the active
    Active,
}

impl AdmissionMode {
    pub fn uninitialized() -> Self {
        Self::PassiveUninitialized {
            existing: ObjectIdSet::new(),
            pending: PendingChangesAccount::new(),
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::PassiveUninitialized { .. } => "PASSIVE_UNINITIALIZED",
            Self::PassiveStandby => "PASSIVE_STANDBY",
            Self::Active => "ACTIVE",
        }
    }
}

/// Outcome of admitting one object sync transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAdmission {
    /// Forwarded with this many changes (objects plus replayed deltas)
    Admitted { changes: usize },
    /// Nothing left to apply
    Ignored,
}

/// Admits replicated transactions into the local pipeline.
pub struct TransactionAdmissionGate {
    transactions: Arc<dyn TransactionManager>,
    objects: Arc<dyn TransactionalObjectManager>,
    mode: Mutex<AdmissionMode>,
    // held from pruning until forwarding returns; `mode` is released first
    forwarding: Mutex<()>,
}

impl TransactionAdmissionGate {
    /// A gate for a node that starts as an uninitialized passive.
    pub fn new(
        transactions: Arc<dyn TransactionManager>,
        objects: Arc<dyn TransactionalObjectManager>,
    ) -> Self {
        Self::with_mode(transactions, objects, AdmissionMode::uninitialized())
    }

    pub fn with_mode(
        transactions: Arc<dyn TransactionManager>,
        objects: Arc<dyn TransactionalObjectManager>,
        mode: AdmissionMode,
    ) -> Self {
        Self {
            transactions,
            objects,
            mode: Mutex::new(mode),
            forwarding: Mutex::new(()),
        }
    }

    /// Seed the known object set. Only meaningful while uninitialized.
    pub fn init(&self, known: &ObjectIdSet) {
        let mut mode = self.lock();
        match &mut *mode {
            AdmissionMode::PassiveUninitialized { existing, .. } => existing.extend_from(known),
            other => log_event_with_fields(
                Event::TxnIgnored,
                &[
                    ("cause", "init outside uninitialized mode"),
                    ("mode", other.mode_name()),
                    ("known", &known.len().to_string()),
                ],
            ),
        }
    }

    /// Admit transactions committed on the active.
    pub fn admit_committed(&self, source: NodeId, txns: Vec<TxnRef>, completed: Vec<TransactionId>) {
        self.admit(source, txns, completed, false);
    }

    /// Admit transactions the active replays after a role change.
    pub fn admit_resent(&self, source: NodeId, txns: Vec<TxnRef>, completed: Vec<TransactionId>) {
        self.admit(source, txns, completed, true);
    }

    /// Admit one object sync transaction.
    ///
    /// Parked changes of `deleted` objects are dropped: the collector retired
    /// them on the active and they will never arrive. On error the gate is
    /// left as it was.
    pub fn admit_sync_transaction(
        &self,
        txn: TxnRef,
        deleted: &ObjectIdSet,
    ) -> AdmissionResult<SyncAdmission> {
        let _forwarding = lock(&self.forwarding);
        let compound = {
            let mut mode = self.lock();
            match &mut *mode {
                AdmissionMode::Active => {
                    return Err(AdmissionError::SyncWhileActive(txn.transaction_id()));
                }
                AdmissionMode::PassiveStandby => {
                    log_event_with_fields(
                        Event::TxnIgnored,
                        &[
                            ("txn", &txn.transaction_id().to_string()),
                            ("cause", "object sync while standby"),
                        ],
                    );
                    return Ok(SyncAdmission::Ignored);
                }
                AdmissionMode::PassiveUninitialized { existing, pending } => {
                    let plan = compound_transaction(existing, pending, deleted, &txn)?;
                    for id in deleted.iter().chain(plan.new_ids.iter()) {
                        pending.take_for(id);
                    }
                    existing.extend_from(&plan.new_ids);
                    plan.transaction
                }
            }
        };

        match compound {
            Some(compound) => {
                let changes = compound.changes().len();
                self.forward(txn.source(), vec![compound], Vec::new(), false);
                log_event_with_fields(
                    Event::SyncTxnAdmitted,
                    &[
                        ("txn", &txn.transaction_id().to_string()),
                        ("changes", &changes.to_string()),
                    ],
                );
                Ok(SyncAdmission::Admitted { changes })
            }
            None => {
                log_event_with_fields(
                    Event::TxnIgnored,
                    &[
                        ("txn", &txn.transaction_id().to_string()),
                        ("cause", "all objects already present"),
                    ],
                );
                Ok(SyncAdmission::Ignored)
            }
        }
    }

    /// Switch behaviour with the node's new role.
    pub fn on_role_changed(&self, role: NodeRole) {
        let mut mode = self.lock();
        let next = match role {
            NodeRole::ActiveCoordinator => AdmissionMode::Active,
            NodeRole::PassiveStandby => AdmissionMode::PassiveStandby,
            NodeRole::PassiveUninitialized => return,
        };
        let previous = mode.mode_name();
        *mode = next;
        log_event_with_fields(
            Event::AdmissionModeChanged,
            &[("from", previous), ("to", mode.mode_name())],
        );
    }

    /// Transactions admitted but not applied, plus parked ones.
    pub fn pending_transactions(&self) -> usize {
        let mode = self.lock();
        match &*mode {
            AdmissionMode::Active => 0,
            AdmissionMode::PassiveStandby => self.transactions.pending_transaction_count(),
            AdmissionMode::PassiveUninitialized { pending, .. } => {
                self.transactions.pending_transaction_count() + pending.transaction_count()
            }
        }
    }

    pub fn mode_name(&self) -> &'static str {
        self.lock().mode_name()
    }

    /// Whether `id` is known. Always false outside uninitialized mode.
    pub fn is_known(&self, id: &ObjectId) -> bool {
        match &*self.lock() {
            AdmissionMode::PassiveUninitialized { existing, .. } => existing.contains(id),
            _ => false,
        }
    }

    fn admit(&self, source: NodeId, txns: Vec<TxnRef>, completed: Vec<TransactionId>, resent: bool) {
        let _forwarding = lock(&self.forwarding);
        let admitted = {
            let mut mode = self.lock();
            match &mut *mode {
                AdmissionMode::Active => {
                    log_event_with_fields(
                        Event::TxnIgnored,
                        &[
                            ("source", &source.to_string()),
                            ("count", &txns.len().to_string()),
                            ("cause", "commit while active"),
                        ],
                    );
                    return;
                }
                AdmissionMode::PassiveStandby => txns,
                AdmissionMode::PassiveUninitialized { existing, pending } => {
                    prune(existing, pending, txns)
                }
            }
        };
        self.forward(source, admitted, completed, resent);
    }

    // Calls out to collaborators; never hold `mode` here.
    fn forward(&self, source: NodeId, txns: Vec<TxnRef>, completed: Vec<TransactionId>, resent: bool) {
        self.transactions.incoming_transactions(source, &txns, resent);
        self.objects.add_transactions(txns, completed);
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionMode> {
        lock(&self.mode)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop new objects already known, park deltas to unknown objects.
fn prune(existing: &mut ObjectIdSet, pending: &mut PendingChangesAccount, txns: Vec<TxnRef>) -> Vec<TxnRef> {
    let mut admitted = Vec::with_capacity(txns.len());
    for txn in txns {
        let mut kept: Vec<Change> = Vec::with_capacity(txn.changes().len());
        let mut ids = ObjectIdSet::new();
        let mut new_ids = ObjectIdSet::new();

        for change in txn.changes() {
            let id = change.object_id;
            if change.is_new {
                if existing.insert(id) {
                    kept.push(change.clone());
                    ids.insert(id);
                    new_ids.insert(id);
                } else {
                    log_event_with_fields(
                        Event::TxnIgnored,
                        &[
                            ("txn", &txn.transaction_id().to_string()),
                            ("object", &id.to_string()),
                            ("cause", "new object already present"),
                        ],
                    );
                }
            } else if existing.contains(&id) {
                kept.push(change.clone());
                ids.insert(id);
            } else {
                pending.add(txn.transaction_id(), txn.global_id(), change.clone());
            }
        }

        if kept.len() == txn.changes().len() {
            admitted.push(txn);
        } else if !kept.is_empty() {
            log_event_at(
                Severity::Trace,
                Event::TxnPruned,
                &[
                    ("txn", &txn.transaction_id().to_string()),
                    ("kept", &kept.len().to_string()),
                    ("total", &txn.changes().len().to_string()),
                ],
            );
            admitted.push(Arc::new(PrunedTransaction::new(txn, kept, ids, new_ids)));
        }
    }
    admitted
}

/// A compound sync transaction, built without touching gate state.
struct CompoundPlan {
    /// `None` when every object was already present
    transaction: Option<TxnRef>,
    new_ids: ObjectIdSet,
}

/// Each newly known object followed by its parked deltas in commit order.
///
/// Reads `existing` and `pending` only; the caller commits the plan.
fn compound_transaction(
    existing: &ObjectIdSet,
    pending: &PendingChangesAccount,
    deleted: &ObjectIdSet,
    txn: &TxnRef,
) -> AdmissionResult<CompoundPlan> {
    let mut changes = Vec::with_capacity(txn.changes().len() * 2);
    let mut ids = ObjectIdSet::new();
    let mut modified = false;

    for change in txn.changes() {
        let id = change.object_id;
        if ids.contains(&id) {
            modified = true;
            continue;
        }
        let parked = if deleted.contains(&id) {
            &[][..]
        } else {
            pending.parked_for(&id)
        };
        if existing.contains(&id) {
            modified = true;
            if !parked.is_empty() {
                return Err(AdmissionError::PendingChangesForKnownObject(id));
            }
            continue;
        }

        changes.push(change.clone());
        ids.insert(id);

        let mut last: Option<GlobalTransactionId> = None;
        for record in parked {
            if let Some(previous) = last {
                if previous >= record.global_id {
                    return Err(AdmissionError::VersionOutOfOrder {
                        object: id,
                        previous,
                        next: record.global_id,
                    });
                }
            }
            last = Some(record.global_id);
            changes.push(record.change.clone().versioned(record.global_id));
            modified = true;
        }
    }

    let transaction = if !modified {
        Some(Arc::clone(txn))
    } else if changes.is_empty() {
        None
    } else {
        Some(Arc::new(PrunedTransaction::new(
            Arc::clone(txn),
            changes,
            ids.clone(),
            ids.clone(),
        )) as TxnRef)
    };
    Ok(CompoundPlan {
        transaction,
        new_ids: ids,
    })
}
