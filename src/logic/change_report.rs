use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::logic::visibility::branch_criteria;
use crate::model::{
    parent_path, ClassAxiom, ComponentKind, Concept, Description, Id, OntoError,
    ReferenceSetMember, Relationship, Timestamp, Versioned,
};
use crate::store::traits::{Store, VersionSelection};

/// Created/updated/deleted entity-id sets for one branch and time window,
/// consumed by review and approval tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub branch_path: String,
    pub from: Timestamp,
    pub to: Timestamp,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub created: BTreeMap<ComponentKind, BTreeSet<Id>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub updated: BTreeMap<ComponentKind, BTreeSet<Id>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deleted: BTreeMap<ComponentKind, BTreeSet<Id>>,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.created.values().all(|s| s.is_empty())
            && self.updated.values().all(|s| s.is_empty())
            && self.deleted.values().all(|s| s.is_empty())
    }

    fn created_of(&mut self, kind: ComponentKind) -> &mut BTreeSet<Id> {
        self.created.entry(kind).or_default()
    }

    fn updated_of(&mut self, kind: ComponentKind) -> &mut BTreeSet<Id> {
        self.updated.entry(kind).or_default()
    }

    fn deleted_of(&mut self, kind: ComponentKind) -> &mut BTreeSet<Id> {
        self.deleted.entry(kind).or_default()
    }
}

/// Report the component changes on a branch within `(from, to]`. With
/// `include_from_parents` the parent lineage's own windows are folded in,
/// for reviews that care about inherited change.
pub async fn change_report<S: Store>(
    store: &S,
    path: &str,
    from: Timestamp,
    to: Timestamp,
    include_from_parents: bool,
) -> Result<ChangeReport, OntoError> {
    let mut paths = vec![path.to_string()];
    if include_from_parents {
        let mut cursor = path;
        while let Some(parent) = parent_path(cursor) {
            paths.push(parent.to_string());
            cursor = parent;
        }
    }

    let mut report = ChangeReport {
        branch_path: path.to_string(),
        from,
        to,
        ..ChangeReport::default()
    };
    for branch_path in paths {
        if store.load_branch(&branch_path).await?.is_none() {
            return Err(OntoError::BranchNotFound { path: branch_path });
        }
        collect_branch_window(store, &branch_path, from, to, &mut report).await?;
    }
    Ok(report)
}

async fn collect_branch_window<S: Store>(
    store: &S,
    path: &str,
    from: Timestamp,
    to: Timestamp,
    report: &mut ChangeReport,
) -> Result<(), OntoError> {
    // What was already visible (own or inherited) when the window opened
    // decides created vs updated. A window opening before the branch existed
    // means everything in it is new.
    let criteria_at_from = branch_criteria(store, path, Some(from)).await.ok();

    // Deletions of ancestor content never end a local version; they only
    // grow the branch document's versions_replaced sets. The branch
    // documents are versioned, so the window's deletions are the diff.
    let replaced_from = store
        .load_branch_at(path, from)
        .await?
        .map(|b| b.versions_replaced)
        .unwrap_or_default();
    let replaced_to = store
        .load_branch_at(path, to)
        .await?
        .map(|b| b.versions_replaced)
        .unwrap_or_default();

    macro_rules! collect_kind {
        ($ty:ty) => {{
            let kind = <$ty as Versioned>::KIND;
            let started: Vec<$ty> = store
                .find_on_branch(path, VersionSelection::StartedBetween(from, to))
                .await?;
            let ended: Vec<$ty> = store
                .find_on_branch(path, VersionSelection::EndedBetween(from, to))
                .await?;

            let started_ids: Vec<Id> = started
                .iter()
                .map(|d| d.doc_id().clone())
                .unique()
                .collect();
            let existed_at_from: BTreeSet<Id> = match &criteria_at_from {
                Some(criteria) => store
                    .find_visible::<$ty>(criteria, Some(&started_ids))
                    .await?
                    .iter()
                    .map(|d| d.doc_id().clone())
                    .collect(),
                None => BTreeSet::new(),
            };
            for id in &started_ids {
                if existed_at_from.contains(id) {
                    report.updated_of(kind).insert(id.clone());
                } else {
                    report.created_of(kind).insert(id.clone());
                }
            }

            // Locally-ended versions without a successor in the window
            for doc in &ended {
                if !started_ids.contains(doc.doc_id()) {
                    report.deleted_of(kind).insert(doc.doc_id().clone());
                }
            }
            // Masked ancestor content without a local replacement
            let before = replaced_from.get(&kind);
            if let Some(after) = replaced_to.get(&kind) {
                for id in after {
                    let newly_replaced = before.map_or(true, |ids| !ids.contains(id));
                    if newly_replaced && !started_ids.contains(id) {
                        report.deleted_of(kind).insert(id.clone());
                    }
                }
            }
        }};
    }

    collect_kind!(Concept);
    collect_kind!(Description);
    collect_kind!(Relationship);
    collect_kind!(ReferenceSetMember);
    collect_kind!(ClassAxiom);
    Ok(())
}
