//! GC Coordinator
//!
//! Per-node bookkeeping:
//! - `WaitingForTxns`: list response accepted, waiting for resent
//!   transactions to drain
//! - `Queued`: collector was running when the node asked to sync
//! - `Added`: collector disabled, node handed to the sync state machine
//!
//! The collector is disabled while any node is `Added` and re-enabled when
//! the last syncing node completes or leaves. Disabling may block (bounded
//! retry with backoff); the lock is never held while sleeping.

use super::result::GcResult;
use crate::cluster::{ClusterMessage, GarbageCollector, GroupTransport, TransactionManager};
use crate::model::{NodeId, ObjectIdSet};
use crate::observability::{log_event, log_event_with_fields, Event, SyncMetrics};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Bounded retry for disabling the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcRetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl GcRetryPolicy {
    /// Delay after `attempt` (1-based) failed, before jitter.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for GcRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(2000),
        }
    }
}

/// Answer to a node asking to start syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Collector is disabled; start syncing with the node's known set
    StartNow(ObjectIdSet),
    /// Collector is running; sync starts after the cycle completes
    Queued,
    /// Node is already queued or syncing
    AlreadyTracked,
    /// Node left while its transactions were draining
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    WaitingForTxns,
    // reserved while `disable_and_admit` waits on the collector
    Admitting(ObjectIdSet),
    Queued(ObjectIdSet),
    Added,
}

#[derive(Debug, Default)]
struct Inner {
    disabled: bool,
    syncing: HashMap<NodeId, Slot>,
    synced: HashSet<NodeId>,
}

/// Mutual exclusion between object sync and garbage collection.
pub struct GcCoordinator {
    collector: Arc<dyn GarbageCollector>,
    transactions: Arc<dyn TransactionManager>,
    transport: Arc<dyn GroupTransport>,
    policy: GcRetryPolicy,
    metrics: Arc<SyncMetrics>,
    inner: Mutex<Inner>,
}

impl GcCoordinator {
    pub fn new(
        collector: Arc<dyn GarbageCollector>,
        transactions: Arc<dyn TransactionManager>,
        transport: Arc<dyn GroupTransport>,
        policy: GcRetryPolicy,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            collector,
            transactions,
            transport,
            policy,
            metrics,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A collection cycle finished.
    ///
    /// A non-empty result is broadcast once local transactions drain. Queued
    /// nodes are then promoted if the collector can be disabled; the returned
    /// nodes must start syncing now. Nodes stay queued if disabling fails.
    pub fn on_collection_completed(&self, result: GcResult) -> Vec<(NodeId, ObjectIdSet)> {
        if !result.is_empty() {
            self.broadcast_when_applied(result);
        }

        for _ in 0..self.policy.max_attempts {
            {
                let mut inner = self.lock();
                let has_queued = inner
                    .syncing
                    .values()
                    .any(|slot| matches!(slot, Slot::Queued(_)));
                if !has_queued {
                    // queued nodes may have left while the collector was being disabled
                    self.enable_locked(&mut inner);
                    return Vec::new();
                }
                if inner.disabled {
                    return promote_queued(&mut inner);
                }
            }
            if !self.disable_gc() {
                return Vec::new();
            }
        }
        self.enable_gc_if_necessary();
        Vec::new()
    }

    /// Mark `node` as waiting for in-flight transactions before it syncs.
    ///
    /// Returns false if the node is already tracked.
    pub fn await_transactions(&self, node: NodeId) -> bool {
        let mut inner = self.lock();
        if inner.syncing.contains_key(&node) {
            return false;
        }
        inner.syncing.insert(node, Slot::WaitingForTxns);
        true
    }

    /// Transactions drained for `node`: admit it if the collector can be
    /// disabled with a single attempt, otherwise queue it.
    pub fn request_sync_when_gc_disabled(&self, node: NodeId, known: ObjectIdSet) -> GateDecision {
        let mut inner = self.lock();
        match inner.syncing.get(&node) {
            Some(Slot::WaitingForTxns) => {}
            Some(_) => {
                log_event_with_fields(
                    Event::NodeAddRejected,
                    &[("node", &node.to_string()), ("cause", "already syncing")],
                );
                return GateDecision::AlreadyTracked;
            }
            None => return GateDecision::Cancelled,
        }

        if !inner.disabled {
            inner.disabled = self.collector.disable();
            self.metrics.record_gc_disable(1, inner.disabled);
            if inner.disabled {
                log_event(Event::GcDisabled);
            }
        }

        if inner.disabled {
            inner.syncing.insert(node, Slot::Added);
            GateDecision::StartNow(known)
        } else {
            inner.syncing.insert(node, Slot::Queued(known));
            log_event_with_fields(Event::SyncDeferred, &[("node", &node.to_string())]);
            GateDecision::Queued
        }
    }

    /// Disable the collector (blocking) and admit every node not already
    /// tracked. If the collector cannot be disabled the nodes are queued.
    ///
    /// Nodes are reserved before the first disable attempt, so a node that
    /// leaves while the collector is being disabled is never admitted.
    pub fn disable_and_admit(&self, nodes: Vec<(NodeId, ObjectIdSet)>) -> Vec<(NodeId, ObjectIdSet)> {
        let reserved = reserve_untracked(&mut self.lock(), nodes);
        if reserved.is_empty() {
            return Vec::new();
        }

        for _ in 0..self.policy.max_attempts {
            {
                let mut inner = self.lock();
                if inner.disabled {
                    let admitted = release_reserved(&mut inner, &reserved, true);
                    self.enable_locked(&mut inner);
                    return admitted;
                }
            }
            if !self.disable_gc() {
                break;
            }
        }

        let mut inner = self.lock();
        if inner.disabled {
            let admitted = release_reserved(&mut inner, &reserved, true);
            self.enable_locked(&mut inner);
            return admitted;
        }
        release_reserved(&mut inner, &reserved, false);
        Vec::new()
    }

    /// Disable the collector, retrying with exponential backoff and jitter.
    ///
    /// Returns false once the attempt budget is spent.
    pub fn disable_gc(&self) -> bool {
        let mut attempts = 0;
        while attempts < self.policy.max_attempts {
            attempts += 1;
            if self.collector.disable() {
                self.lock().disabled = true;
                self.metrics.record_gc_disable(u64::from(attempts), true);
                log_event_with_fields(Event::GcDisabled, &[("attempts", &attempts.to_string())]);
                return true;
            }

            if attempts < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempts);
                let jitter = jitter_for(delay);
                log_event_with_fields(
                    Event::GcDisableRetry,
                    &[
                        ("attempt", &attempts.to_string()),
                        ("delay_ms", &(delay + jitter).as_millis().to_string()),
                    ],
                );
                thread::sleep(delay + jitter);
            }
        }

        self.metrics.record_gc_disable(u64::from(attempts), false);
        log_event_with_fields(Event::GcDisableFailed, &[("attempts", &attempts.to_string())]);
        false
    }

    /// Re-enable the collector if no node is syncing.
    pub fn enable_gc_if_necessary(&self) {
        let mut inner = self.lock();
        self.enable_locked(&mut inner);
    }

    /// `node` finished syncing.
    pub fn sync_complete_for(&self, node: NodeId) {
        let mut inner = self.lock();
        if inner.syncing.remove(&node).is_some() {
            inner.synced.insert(node);
            self.enable_locked(&mut inner);
        }
    }

    /// `node` left the cluster. Idempotent.
    pub fn on_node_removed(&self, node: NodeId) {
        let mut inner = self.lock();
        if inner.syncing.remove(&node).is_some() {
            self.enable_locked(&mut inner);
        }
        inner.synced.remove(&node);
    }

    pub fn is_syncing_or_synced(&self, node: NodeId) -> bool {
        let inner = self.lock();
        inner.syncing.contains_key(&node) || inner.synced.contains(&node)
    }

    /// Whether `node` is waiting for the collector.
    pub fn is_queued(&self, node: NodeId) -> bool {
        matches!(self.lock().syncing.get(&node), Some(Slot::Queued(_)))
    }

    /// Whether `node` holds collection suppression.
    pub fn is_admitted(&self, node: NodeId) -> bool {
        matches!(self.lock().syncing.get(&node), Some(Slot::Added))
    }

    pub fn is_disabled(&self) -> bool {
        self.lock().disabled
    }

    /// Nodes queued, waiting or syncing.
    pub fn syncing_count(&self) -> usize {
        self.lock().syncing.len()
    }

    fn enable_locked(&self, inner: &mut Inner) {
        if inner.disabled && inner.syncing.is_empty() {
            self.collector.enable();
            inner.disabled = false;
            log_event(Event::GcEnabled);
        }
    }

    fn broadcast_when_applied(&self, result: GcResult) {
        let transport = Arc::clone(&self.transport);
        let metrics = Arc::clone(&self.metrics);
        self.transactions
            .callback_on_all_current_transactions_applied(Box::new(move || {
                let iteration = result.iteration.to_string();
                let deleted = result.deleted.len().to_string();
                match transport.send_all(ClusterMessage::GcResult { result }) {
                    Ok(()) => {
                        metrics.increment_gc_results_broadcast();
                        log_event_with_fields(
                            Event::GcResultBroadcast,
                            &[("iteration", &iteration), ("deleted", &deleted)],
                        );
                    }
                    Err(err) => log_event_with_fields(
                        Event::SendFailed,
                        &[("iteration", &iteration), ("error", &err.to_string())],
                    ),
                }
            }));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn promote_queued(inner: &mut Inner) -> Vec<(NodeId, ObjectIdSet)> {
    let mut started = Vec::new();
    for (node, slot) in inner.syncing.iter_mut() {
        if let Slot::Queued(known) = slot {
            let known = std::mem::take(known);
            *slot = Slot::Added;
            started.push((*node, known));
        }
    }
    started.sort_by_key(|(node, _)| *node);
    started
}

fn reserve_untracked(inner: &mut Inner, nodes: Vec<(NodeId, ObjectIdSet)>) -> Vec<NodeId> {
    let mut reserved = Vec::with_capacity(nodes.len());
    for (node, known) in nodes {
        if inner.syncing.contains_key(&node) {
            log_event_with_fields(
                Event::NodeAddRejected,
                &[("node", &node.to_string()), ("cause", "already syncing")],
            );
            continue;
        }
        inner.syncing.insert(node, Slot::Admitting(known));
        reserved.push(node);
    }
    reserved
}

/// Admit or queue the reserved nodes that are still present.
fn release_reserved(inner: &mut Inner, reserved: &[NodeId], admit: bool) -> Vec<(NodeId, ObjectIdSet)> {
    let mut admitted = Vec::new();
    for node in reserved {
        let Some(slot) = inner.syncing.get_mut(node) else {
            log_event_with_fields(
                Event::SyncCancelled,
                &[("node", &node.to_string()), ("cause", "left before sync start")],
            );
            continue;
        };
        let Slot::Admitting(known) = slot else {
            continue;
        };
        let known = std::mem::take(known);
        if admit {
            *slot = Slot::Added;
            admitted.push((*node, known));
        } else {
            *slot = Slot::Queued(known);
            log_event_with_fields(Event::SyncDeferred, &[("node", &node.to_string())]);
        }
    }
    admitted
}

fn jitter_for(delay: Duration) -> Duration {
    let half = delay.as_millis() as u64 / 2;
    if half == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=half))
}
