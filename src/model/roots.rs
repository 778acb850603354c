//! Named graph roots
//!
//! Roots may be only partially present on a given passive, so comparison is
//! "remove what's known, sync what remains" rather than strict equality.

use super::ids::ObjectId;
use super::object_set::ObjectIdSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered `name -> ObjectId` mapping of graph roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootNameMapping {
    roots: BTreeMap<String, ObjectId>,
}

impl RootNameMapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if there are no roots.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Insert or replace a root.
    pub fn insert(&mut self, name: impl Into<String>, id: ObjectId) -> Option<ObjectId> {
        self.roots.insert(name.into(), id)
    }

    /// Look up a root by name.
    pub fn get(&self, name: &str) -> Option<ObjectId> {
        self.roots.get(name).copied()
    }

    /// Check if a root name is present.
    pub fn contains_name(&self, name: &str) -> bool {
        self.roots.contains_key(name)
    }

    /// Roots of `self` whose names are not present in `known`.
    pub fn without_names_of(&self, known: &RootNameMapping) -> RootNameMapping {
        self.roots
            .iter()
            .filter(|(name, _)| !known.contains_name(name))
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }

    /// Remove and return up to `count` roots in name order.
    pub fn take_first(&mut self, count: usize) -> RootNameMapping {
        let mut taken = RootNameMapping::new();
        while taken.len() < count {
            match self.roots.pop_first() {
                Some((name, id)) => {
                    taken.roots.insert(name, id);
                }
                None => break,
            }
        }
        taken
    }

    /// Add every root of `other`, replacing same-named entries.
    pub fn merge(&mut self, other: &RootNameMapping) {
        for (name, id) in other.iter() {
            self.roots.insert(name.to_string(), id);
        }
    }

    /// The object ids the roots point at.
    pub fn object_ids(&self) -> ObjectIdSet {
        self.roots.values().copied().collect()
    }

    /// Iterate `(name, id)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ObjectId)> + '_ {
        self.roots.iter().map(|(name, id)| (name.as_str(), *id))
    }
}

impl FromIterator<(String, ObjectId)> for RootNameMapping {
    fn from_iter<I: IntoIterator<Item = (String, ObjectId)>>(iter: I) -> Self {
        Self {
            roots: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots(entries: &[(&str, u64)]) -> RootNameMapping {
        entries
            .iter()
            .map(|(name, id)| (name.to_string(), ObjectId::new(*id)))
            .collect()
    }

    #[test]
    fn test_without_names_of_keeps_unknown() {
        let local = roots(&[("a", 1), ("b", 2), ("c", 3)]);
        let known = roots(&[("b", 2), ("z", 26)]);

        assert_eq!(local.without_names_of(&known), roots(&[("a", 1), ("c", 3)]));
    }

    #[test]
    fn test_take_first_in_name_order() {
        let mut all = roots(&[("c", 3), ("a", 1), ("b", 2)]);
        let taken = all.take_first(2);

        assert_eq!(taken, roots(&[("a", 1), ("b", 2)]));
        assert_eq!(all, roots(&[("c", 3)]));
    }

    #[test]
    fn test_object_ids_of_roots() {
        let mapping = roots(&[("x", 5), ("y", 5), ("z", 8)]);
        assert_eq!(mapping.object_ids().len(), 2);
    }

    #[test]
    fn test_merge_replaces_same_name() {
        let mut base = roots(&[("a", 1)]);
        base.merge(&roots(&[("a", 4), ("b", 2)]));
        assert_eq!(base.get("a"), Some(ObjectId::new(4)));
        assert_eq!(base.len(), 2);
    }
}
