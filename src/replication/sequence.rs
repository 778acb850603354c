//! Per-node completion sequences
//!
//! The active stamps every `SyncCompleted` it sends with a per-node
//! sequence; the passive accepts only strictly increasing values from each
//! sender.

use crate::model::NodeId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Issues monotonically increasing sequences per node, starting at 1.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: Mutex<HashMap<NodeId, u64>>,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence for `node`.
    pub fn next_sequence(&self, node: NodeId) -> u64 {
        let mut next = lock(&self.next);
        let sequence = next.entry(node).or_insert(0);
        *sequence += 1;
        *sequence
    }

    /// Forget `node`; a rejoining node starts again at 1.
    pub fn clear(&self, node: NodeId) {
        lock(&self.next).remove(&node);
    }
}

/// Rejects sequences that do not increase per sender.
#[derive(Debug, Default)]
pub struct SequenceValidator {
    last: Mutex<HashMap<NodeId, u64>>,
}

impl SequenceValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence` from `from` if it is greater than the last one seen.
    pub fn accept(&self, from: NodeId, sequence: u64) -> bool {
        let mut last = lock(&self.last);
        match last.get(&from) {
            Some(previous) if *previous >= sequence => false,
            _ => {
                last.insert(from, sequence);
                true
            }
        }
    }

    /// Forget `from`; a sender that reconnects may start again at 1.
    pub fn clear(&self, from: NodeId) {
        lock(&self.last).remove(&from);
    }

    /// Last accepted sequence from `from`.
    pub fn last_accepted(&self, from: NodeId) -> Option<u64> {
        lock(&self.last).get(&from).copied()
    }
}

fn lock(map: &Mutex<HashMap<NodeId, u64>>) -> MutexGuard<'_, HashMap<NodeId, u64>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_per_node() {
        let generator = SequenceGenerator::new();
        let a = NodeId::new();
        let b = NodeId::new();

        assert_eq!(generator.next_sequence(a), 1);
        assert_eq!(generator.next_sequence(a), 2);
        assert_eq!(generator.next_sequence(b), 1);

        generator.clear(a);
        assert_eq!(generator.next_sequence(a), 1);
    }

    #[test]
    fn test_validator_rejects_repeats_and_regressions() {
        let validator = SequenceValidator::new();
        let active = NodeId::new();

        assert!(validator.accept(active, 1));
        assert!(!validator.accept(active, 1));
        assert!(validator.accept(active, 3));
        assert!(!validator.accept(active, 2));
        assert_eq!(validator.last_accepted(active), Some(3));
    }

    #[test]
    fn test_validator_restarts_after_clear() {
        let validator = SequenceValidator::new();
        let active = NodeId::new();

        assert!(validator.accept(active, 1));
        validator.clear(active);
        assert_eq!(validator.last_accepted(active), None);
        assert!(validator.accept(active, 1));
    }
}
