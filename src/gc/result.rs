//! Garbage collection results
//!
//! The collection authority broadcasts every non-empty result. Other members
//! apply it to their local collector; the authority never applies its own.

use crate::model::ObjectIdSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which collector produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    Full,
    Young,
}

/// Statistics of one collection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Monotonic cycle number
    pub iteration: u64,
    pub kind: CollectorKind,
    pub started_at: DateTime<Utc>,
    /// Objects considered for collection
    pub candidates: usize,
    /// Objects found to be garbage
    pub deleted: usize,
}

impl CollectionInfo {
    /// Info for a cycle starting now.
    pub fn new(iteration: u64, kind: CollectorKind) -> Self {
        Self {
            iteration,
            kind,
            started_at: Utc::now(),
            candidates: 0,
            deleted: 0,
        }
    }

    pub fn with_counts(mut self, candidates: usize, deleted: usize) -> Self {
        self.candidates = candidates;
        self.deleted = deleted;
        self
    }
}

/// Outcome of a collection cycle, as broadcast to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcResult {
    /// Cycle number, monotonic per authority
    pub iteration: u64,
    pub deleted: ObjectIdSet,
    pub info: CollectionInfo,
}

impl GcResult {
    pub fn new(info: CollectionInfo, deleted: ObjectIdSet) -> Self {
        Self {
            iteration: info.iteration,
            deleted,
            info,
        }
    }

    /// Check if the cycle deleted nothing.
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::object_ids;

    #[test]
    fn test_result_takes_iteration_from_info() {
        let info = CollectionInfo::new(42, CollectorKind::Young).with_counts(10, 2);
        let result = GcResult::new(info, object_ids([3, 8]));

        assert_eq!(result.iteration, 42);
        assert_eq!(result.info.deleted, 2);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_json_roundtrip_keeps_timestamp() {
        let info = CollectionInfo::new(1, CollectorKind::Full);
        let result = GcResult::new(info, object_ids([1]));

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"kind\":\"full\""));
        let back: GcResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
