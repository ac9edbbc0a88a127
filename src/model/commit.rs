use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ComponentKind, Id, Timestamp};

/// Kind of commit: authored content, or one of the two merge directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitKind {
    Content,
    Rebase,
    Promotion,
}

impl CommitKind {
    /// Merge commits tolerate transient hierarchy cycles; content commits
    /// fail fast on them.
    pub fn is_merge(&self) -> bool {
        matches!(self, CommitKind::Rebase | CommitKind::Promotion)
    }
}

/// One atomic set of component writes applied to a branch at a timestamp.
/// Created when a transaction opens; immutable once published to the listener
/// pipeline. A failed commit's writes are rolled back before any reader can
/// observe them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub branch_path: String,
    /// Monotonic and unique within the branch lineage
    pub timestamp: Timestamp,
    pub kind: CommitKind,
    /// The other branch involved in a rebase/promotion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl Commit {
    pub fn new(branch_path: impl Into<String>, timestamp: Timestamp, kind: CommitKind) -> Self {
        Self {
            branch_path: branch_path.into(),
            timestamp,
            kind,
            source_path: None,
        }
    }

    pub fn with_source(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = Some(source_path.into());
        self
    }
}

/// Per-kind sets of component ids touched by a commit, handed to every
/// listener stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangedComponents {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    map: BTreeMap<ComponentKind, BTreeSet<Id>>,
}

impl ChangedComponents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ComponentKind, id: Id) {
        self.map.entry(kind).or_default().insert(id);
    }

    pub fn extend(&mut self, kind: ComponentKind, ids: impl IntoIterator<Item = Id>) {
        self.map.entry(kind).or_default().extend(ids);
    }

    pub fn merge(&mut self, other: &ChangedComponents) {
        for (kind, ids) in &other.map {
            self.map
                .entry(*kind)
                .or_default()
                .extend(ids.iter().cloned());
        }
    }

    pub fn ids(&self, kind: ComponentKind) -> impl Iterator<Item = &Id> {
        self.map.get(&kind).into_iter().flatten()
    }

    pub fn id_vec(&self, kind: ComponentKind) -> Vec<Id> {
        self.ids(kind).cloned().collect()
    }

    pub fn contains(&self, kind: ComponentKind, id: &str) -> bool {
        self.map.get(&kind).map_or(false, |ids| ids.contains(id))
    }

    pub fn count(&self, kind: ComponentKind) -> usize {
        self.map.get(&kind).map_or(0, |ids| ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(|ids| ids.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_per_kind_sets() {
        let mut left = ChangedComponents::new();
        left.add(ComponentKind::Concept, "a".to_string());
        let mut right = ChangedComponents::new();
        right.add(ComponentKind::Concept, "b".to_string());
        right.add(ComponentKind::Relationship, "r".to_string());

        left.merge(&right);
        assert_eq!(left.count(ComponentKind::Concept), 2);
        assert!(left.contains(ComponentKind::Relationship, "r"));
    }
}
