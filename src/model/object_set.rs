//! Ordered object identity set
//!
//! Backed by a `BTreeSet` so that draining in bounded batches always hands
//! out the smallest ids first and repeated runs are deterministic.

use super::ids::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Sorted set of unique object ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIdSet {
    ids: BTreeSet<ObjectId>,
}

impl ObjectIdSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Insert an id. Returns true if it was not already present.
    pub fn insert(&mut self, id: ObjectId) -> bool {
        self.ids.insert(id)
    }

    /// Remove an id. Returns true if it was present.
    pub fn remove(&mut self, id: &ObjectId) -> bool {
        self.ids.remove(id)
    }

    /// Membership test.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.ids.contains(id)
    }

    /// Add every id of `other` to this set.
    pub fn extend_from(&mut self, other: &ObjectIdSet) {
        self.ids.extend(other.ids.iter().copied());
    }

    /// Remove every id of `other` from this set.
    pub fn remove_all(&mut self, other: &ObjectIdSet) {
        if other.len() > self.len() {
            self.ids.retain(|id| !other.contains(id));
        } else {
            for id in other.iter() {
                self.ids.remove(id);
            }
        }
    }

    /// `self \ other`
    pub fn difference(&self, other: &ObjectIdSet) -> ObjectIdSet {
        self.ids.difference(&other.ids).copied().collect()
    }

    /// `self ∪ other`
    pub fn union(&self, other: &ObjectIdSet) -> ObjectIdSet {
        self.ids.union(&other.ids).copied().collect()
    }

    /// `self ∩ other`
    pub fn intersection(&self, other: &ObjectIdSet) -> ObjectIdSet {
        self.ids.intersection(&other.ids).copied().collect()
    }

    /// Remove and return up to `count` of the smallest ids.
    pub fn drain_first(&mut self, count: usize) -> ObjectIdSet {
        let mut drained = ObjectIdSet::new();
        while drained.len() < count {
            match self.ids.pop_first() {
                Some(id) => {
                    drained.insert(id);
                }
                None => break,
            }
        }
        drained
    }

    /// Iterate in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectId> + '_ {
        self.ids.iter()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

impl FromIterator<ObjectId> for ObjectIdSet {
    fn from_iter<I: IntoIterator<Item = ObjectId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<ObjectId> for ObjectIdSet {
    fn extend<I: IntoIterator<Item = ObjectId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

impl IntoIterator for ObjectIdSet {
    type Item = ObjectId;
    type IntoIter = std::collections::btree_set::IntoIter<ObjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl<'a> IntoIterator for &'a ObjectIdSet {
    type Item = &'a ObjectId;
    type IntoIter = std::collections::btree_set::Iter<'a, ObjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

impl fmt::Display for ObjectIdSet {
    /// Short form for logs: size plus the first and last id.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ids.first(), self.ids.last()) {
            (Some(first), Some(last)) => write!(
                f,
                "ObjectIdSet[size={}, first={}, last={}]",
                self.len(),
                first.as_u64(),
                last.as_u64()
            ),
            _ => write!(f, "ObjectIdSet[size=0]"),
        }
    }
}

/// Build a set from raw ids. Mostly useful in tests.
pub fn object_ids<I: IntoIterator<Item = u64>>(raw: I) -> ObjectIdSet {
    raw.into_iter().map(ObjectId::new).collect()
}
