//! Sync metrics
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed atomics; values are exact once the writers are quiescent

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the object synchronization core.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    nodes_added: AtomicU64,
    nodes_removed: AtomicU64,
    diffs_computed: AtomicU64,
    batches_sent: AtomicU64,
    objects_synced: AtomicU64,
    objects_resubmitted: AtomicU64,
    syncs_completed: AtomicU64,
    nodes_zapped: AtomicU64,
    gc_disable_attempts: AtomicU64,
    gc_disable_failures: AtomicU64,
    gc_results_broadcast: AtomicU64,
    gc_results_applied: AtomicU64,
}

impl SyncMetrics {
    /// Create a registry with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_nodes_added(&self) {
        self.nodes_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_nodes_removed(&self) {
        self.nodes_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_diffs_computed(&self) {
        self.diffs_computed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one batch handed to the transport.
    pub fn record_batch(&self, synced: u64, resubmitted: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.objects_synced.fetch_add(synced, Ordering::Relaxed);
        self.objects_resubmitted.fetch_add(resubmitted, Ordering::Relaxed);
    }

    pub fn increment_syncs_completed(&self) {
        self.syncs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_nodes_zapped(&self) {
        self.nodes_zapped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record collector disable attempts; `disabled` is the final outcome.
    pub fn record_gc_disable(&self, attempts: u64, disabled: bool) {
        self.gc_disable_attempts.fetch_add(attempts, Ordering::Relaxed);
        if !disabled {
            self.gc_disable_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_gc_results_broadcast(&self) {
        self.gc_results_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_gc_results_applied(&self) {
        self.gc_results_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot.
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            nodes_added: self.nodes_added.load(Ordering::Relaxed),
            nodes_removed: self.nodes_removed.load(Ordering::Relaxed),
            diffs_computed: self.diffs_computed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            objects_synced: self.objects_synced.load(Ordering::Relaxed),
            objects_resubmitted: self.objects_resubmitted.load(Ordering::Relaxed),
            syncs_completed: self.syncs_completed.load(Ordering::Relaxed),
            nodes_zapped: self.nodes_zapped.load(Ordering::Relaxed),
            gc_disable_attempts: self.gc_disable_attempts.load(Ordering::Relaxed),
            gc_disable_failures: self.gc_disable_failures.load(Ordering::Relaxed),
            gc_results_broadcast: self.gc_results_broadcast.load(Ordering::Relaxed),
            gc_results_applied: self.gc_results_applied.load(Ordering::Relaxed),
        }
    }

    /// Current counters as a JSON object.
    pub fn to_json(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"{{"nodes_added":{},"nodes_removed":{},"diffs_computed":{},"batches_sent":{},"objects_synced":{},"objects_resubmitted":{},"syncs_completed":{},"nodes_zapped":{},"gc_disable_attempts":{},"gc_disable_failures":{},"gc_results_broadcast":{},"gc_results_applied":{}}}"#,
            s.nodes_added,
            s.nodes_removed,
            s.diffs_computed,
            s.batches_sent,
            s.objects_synced,
            s.objects_resubmitted,
            s.syncs_completed,
            s.nodes_zapped,
            s.gc_disable_attempts,
            s.gc_disable_failures,
            s.gc_results_broadcast,
            s.gc_results_applied,
        )
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub nodes_added: u64,
    pub nodes_removed: u64,
    pub diffs_computed: u64,
    pub batches_sent: u64,
    pub objects_synced: u64,
    pub objects_resubmitted: u64,
    pub syncs_completed: u64,
    pub nodes_zapped: u64,
    pub gc_disable_attempts: u64,
    pub gc_disable_failures: u64,
    pub gc_results_broadcast: u64,
    pub gc_results_applied: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        assert_eq!(SyncMetrics::new().snapshot(), SyncMetricsSnapshot::default());
    }

    #[test]
    fn test_record_batch() {
        let metrics = SyncMetrics::new();
        metrics.record_batch(10, 2);
        metrics.record_batch(5, 0);

        let s = metrics.snapshot();
        assert_eq!(s.batches_sent, 2);
        assert_eq!(s.objects_synced, 15);
        assert_eq!(s.objects_resubmitted, 2);
    }

    #[test]
    fn test_gc_disable_failure_counted_once() {
        let metrics = SyncMetrics::new();
        metrics.record_gc_disable(4, false);
        metrics.record_gc_disable(1, true);

        let s = metrics.snapshot();
        assert_eq!(s.gc_disable_attempts, 5);
        assert_eq!(s.gc_disable_failures, 1);
    }

    #[test]
    fn test_to_json() {
        let metrics = SyncMetrics::new();
        metrics.increment_nodes_zapped();
        metrics.record_batch(3, 0);

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["nodes_zapped"], 1);
        assert_eq!(parsed["objects_synced"], 3);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(SyncMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.increment_nodes_added();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.snapshot().nodes_added, 800);
    }
}
