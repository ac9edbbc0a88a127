use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    BranchCriteria, ComponentKind, CriteriaSegment, Id, OntoError, Timestamp,
};
use crate::store::traits::BranchStore;

/// Build the reusable visibility criteria for a branch at an optional
/// historical timepoint.
///
/// The lineage is walked leaf-to-root: each branch contributes the window of
/// its own component versions, then its parent is entered frozen at the
/// branch document's base timestamp. Historical timepoints resolve the branch
/// document that was open at that moment, so a child keeps seeing its
/// parent's state as it was at the child's base until the child rebases; the
/// parent never sees the child's unpublished content.
pub async fn branch_criteria<S: BranchStore + ?Sized>(
    store: &S,
    path: &str,
    timepoint: Option<Timestamp>,
) -> Result<BranchCriteria, OntoError> {
    let mut segments = Vec::new();
    // versions_replaced of every branch below the segment being built
    let mut masked: BTreeMap<ComponentKind, BTreeSet<Id>> = BTreeMap::new();

    let mut cursor = path.to_string();
    let mut cursor_timepoint = timepoint;
    loop {
        let branch = match cursor_timepoint {
            Some(t) => store.load_branch_at(&cursor, t).await?,
            None => store.load_branch(&cursor).await?,
        }
        .ok_or_else(|| OntoError::BranchNotFound {
            path: cursor.clone(),
        })?;

        segments.push(CriteriaSegment {
            path: branch.path.clone(),
            max_timestamp: cursor_timepoint.unwrap_or(branch.head_timestamp),
            masked: masked.clone(),
        });

        for (kind, ids) in &branch.versions_replaced {
            masked
                .entry(*kind)
                .or_default()
                .extend(ids.iter().cloned());
        }

        match branch.parent_path() {
            Some(parent) => {
                cursor = parent.to_string();
                cursor_timepoint = Some(branch.base_timestamp);
            }
            None => break,
        }
    }

    Ok(BranchCriteria { segments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Branch;
    use crate::store::memory::MemoryStore;
    use crate::store::traits::BranchStore as _;

    async fn seed_lineage(store: &MemoryStore) {
        // MAIN created at 10, head 40; child based at 20
        let mut root = Branch::new("MAIN", 10, 10);
        root.head_timestamp = 40;
        store.create_branch_doc(root).await.unwrap();

        let mut child = Branch::new("MAIN/A", 20, 20);
        child.head_timestamp = 30;
        store.create_branch_doc(child).await.unwrap();
    }

    #[tokio::test]
    async fn child_sees_parent_frozen_at_base() {
        let store = MemoryStore::new();
        seed_lineage(&store).await;

        let criteria = branch_criteria(&store, "MAIN/A", None).await.unwrap();
        assert_eq!(criteria.segments.len(), 2);
        assert_eq!(criteria.segments[0].path, "MAIN/A");
        assert_eq!(criteria.segments[0].max_timestamp, 30);
        assert_eq!(criteria.segments[1].path, "MAIN");
        // Frozen at the child's base, not the parent's head
        assert_eq!(criteria.segments[1].max_timestamp, 20);
    }

    #[tokio::test]
    async fn missing_branch_is_an_explicit_error() {
        let store = MemoryStore::new();
        let err = branch_criteria(&store, "MAIN/NOPE", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("MAIN/NOPE"));
    }

    #[tokio::test]
    async fn historical_timepoint_bounds_the_own_segment() {
        let store = MemoryStore::new();
        seed_lineage(&store).await;

        let criteria = branch_criteria(&store, "MAIN/A", Some(25)).await.unwrap();
        assert_eq!(criteria.segments[0].max_timestamp, 25);
    }
}
