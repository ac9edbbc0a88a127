use std::collections::{BTreeMap, BTreeSet};

use crate::config::IndexConfig;
use crate::logic::commit::{CommitContext, CommitListener};
use crate::logic::visibility::branch_criteria;
use crate::model::{
    BranchCriteria, CommitKind, ComponentKind, Id, LookupDirection, OntoError,
    ReferenceSetMember, RefsetLookup, Timestamp,
};
use crate::store::traits::{LookupLevel, Store, VersionSelection};

/// Incremental maintainer of cached reference-set membership, a
/// listener-pipeline stage with the same branch-inheritance shape as the
/// semantic index. A branch's effective membership folds the lineage
/// root-to-leaf: ancestor INCLUDE lookups add members, EXCLUDE lookups at or
/// below the branch remove them, and the branch's own lookup adds its local
/// members. Reference sets below the materialization threshold have no
/// lookup at all; queries fall back to direct scanning.
pub struct RefsetLookupUpdater {
    config: IndexConfig,
}

impl RefsetLookupUpdater {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl<S: Store> CommitListener<S> for RefsetLookupUpdater {
    fn name(&self) -> &'static str {
        "refset-lookup"
    }

    async fn on_commit(&self, store: &S, ctx: &mut CommitContext) -> Result<(), OntoError> {
        let path = ctx.commit.branch_path.clone();
        let ts = ctx.commit.timestamp;

        let changed_member_ids = ctx.changed.id_vec(ComponentKind::ReferenceSetMember);
        if changed_member_ids.is_empty() {
            return Ok(());
        }
        let criteria = branch_criteria(store, &path, None).await?;

        // Referenced ids touched per reference set, from both the new
        // versions and the versions ended by this commit
        let visible: Vec<ReferenceSetMember> = store
            .find_visible(&criteria, Some(&changed_member_ids))
            .await?;
        let ended: Vec<ReferenceSetMember> = store
            .find_on_branch(&path, VersionSelection::EndedAt(ts))
            .await?;
        let mut touched: BTreeMap<Id, BTreeSet<Id>> = BTreeMap::new();
        for member in visible.iter().chain(ended.iter()) {
            touched
                .entry(member.refset_id.clone())
                .or_default()
                .insert(member.referenced_component_id.clone());
        }

        for (refset_id, touched_refs) in touched {
            self.update_refset(store, &path, ts, &criteria, ctx, &refset_id, touched_refs)
                .await?;
        }
        Ok(())
    }
}

impl RefsetLookupUpdater {
    #[allow(clippy::too_many_arguments)]
    async fn update_refset<S: Store>(
        &self,
        store: &S,
        path: &str,
        ts: Timestamp,
        criteria: &BranchCriteria,
        ctx: &mut CommitContext,
        refset_id: &str,
        touched_refs: BTreeSet<Id>,
    ) -> Result<(), OntoError> {
        let levels = store.find_lookups(criteria, refset_id).await?;

        if levels.is_empty() {
            // Not materialized anywhere in the lineage: materialize once the
            // branch-local change count crosses the threshold
            let local_count = store
                .find_on_branch::<ReferenceSetMember>(path, VersionSelection::Open)
                .await?
                .iter()
                .filter(|m| m.refset_id == refset_id)
                .count();
            if local_count < self.config.lookup_member_threshold {
                return Ok(());
            }
            let members = active_membership(store, criteria, refset_id).await?;
            log::info!(
                "materializing lookup for reference set {} on {} ({} members)",
                refset_id,
                path,
                members.len()
            );
            let mut include =
                RefsetLookup::new(refset_id, LookupDirection::Include).with_members(members);
            include.start = ts;
            store.bulk_upsert(path, vec![include]).await?;
            return Ok(());
        }

        // Maintained: fold the ancestor levels, then recompute this branch's
        // own deltas. A rebase may surface ancestor lookups the branch has
        // never reconciled against, so merge commits resync from a direct
        // scan; content commits apply the touched ids only.
        let ancestor_membership = fold_levels(
            levels
                .iter()
                .filter(|level| level.path != path)
                .collect::<Vec<_>>()
                .as_slice(),
        );
        let own_level = levels.iter().find(|level| level.path == path);
        let mut include: BTreeSet<Id> = own_level
            .and_then(|l| l.include.as_ref())
            .map(|l| l.member_ids.clone())
            .unwrap_or_default();
        let mut exclude: BTreeSet<Id> = own_level
            .and_then(|l| l.exclude.as_ref())
            .map(|l| l.member_ids.clone())
            .unwrap_or_default();

        if ctx.commit.kind == CommitKind::Rebase {
            let actual = active_membership(store, criteria, refset_id).await?;
            include = actual.difference(&ancestor_membership).cloned().collect();
            exclude = ancestor_membership.difference(&actual).cloned().collect();
        } else {
            let touched_vec: Vec<Id> = touched_refs.iter().cloned().collect();
            let present_docs = store
                .find_members_by_referenced(criteria, &touched_vec)
                .await?;
            for referenced in &touched_refs {
                let present = present_docs
                    .iter()
                    .any(|m| m.refset_id == refset_id && m.referenced_component_id == *referenced && m.active);
                if present {
                    if ancestor_membership.contains(referenced) {
                        include.remove(referenced);
                        exclude.remove(referenced);
                    } else {
                        include.insert(referenced.clone());
                        exclude.remove(referenced);
                    }
                } else if ancestor_membership.contains(referenced) {
                    exclude.insert(referenced.clone());
                    include.remove(referenced);
                } else {
                    include.remove(referenced);
                    exclude.remove(referenced);
                }
            }
        }

        // Supersede the branch-local lookup documents
        let doc_ids = vec![
            RefsetLookup::lookup_id(refset_id, LookupDirection::Include),
            RefsetLookup::lookup_id(refset_id, LookupDirection::Exclude),
        ];
        store
            .end_versions(path, ComponentKind::RefsetLookup, &doc_ids, ts)
            .await?;
        let mut upserts = Vec::new();
        if !include.is_empty() {
            let mut doc =
                RefsetLookup::new(refset_id, LookupDirection::Include).with_members(include);
            doc.start = ts;
            upserts.push(doc);
        }
        if !exclude.is_empty() {
            let mut doc =
                RefsetLookup::new(refset_id, LookupDirection::Exclude).with_members(exclude);
            doc.start = ts;
            upserts.push(doc);
        }
        if !upserts.is_empty() {
            store.bulk_upsert(path, upserts).await?;
        }
        Ok(())
    }
}

/// Fold lookup levels root-to-leaf: `m = (m ∪ include) \ exclude`
fn fold_levels(levels: &[&LookupLevel]) -> BTreeSet<Id> {
    let mut members = BTreeSet::new();
    for level in levels.iter().rev() {
        if let Some(include) = &level.include {
            members.extend(include.member_ids.iter().cloned());
        }
        if let Some(exclude) = &level.exclude {
            for id in &exclude.member_ids {
                members.remove(id);
            }
        }
    }
    members
}

/// Direct scan of the visible active membership of a reference set
async fn active_membership<S: Store>(
    store: &S,
    criteria: &BranchCriteria,
    refset_id: &str,
) -> Result<BTreeSet<Id>, OntoError> {
    Ok(store
        .find_members_by_refset(criteria, refset_id)
        .await?
        .into_iter()
        .filter(|m| m.active)
        .map(|m| m.referenced_component_id)
        .collect())
}

/// Effective membership of a reference set on a branch at an optional
/// timepoint. Uses the materialized lookups when any level has one and falls
/// back to direct scanning otherwise; both paths produce identical results.
pub async fn refset_members<S: Store>(
    store: &S,
    path: &str,
    refset_id: &str,
    timepoint: Option<Timestamp>,
) -> Result<BTreeSet<Id>, OntoError> {
    let criteria = branch_criteria(store, path, timepoint).await?;
    let levels = store.find_lookups(&criteria, refset_id).await?;
    if levels.is_empty() {
        log::debug!(
            "no lookup for reference set {} on {}; falling back to direct scan",
            refset_id,
            path
        );
        return active_membership(store, &criteria, refset_id).await;
    }
    let refs: Vec<&LookupLevel> = levels.iter().collect();
    Ok(fold_levels(&refs))
}

/// Direct-scan membership, exposed so callers (and tests) can cross-check
/// the materialized path
pub async fn refset_members_by_scan<S: Store>(
    store: &S,
    path: &str,
    refset_id: &str,
    timepoint: Option<Timestamp>,
) -> Result<BTreeSet<Id>, OntoError> {
    let criteria = branch_criteria(store, path, timepoint).await?;
    active_membership(store, &criteria, refset_id).await
}

/// Rebuild the branch-local lookup of one reference set from a direct scan
pub async fn rebuild_lookup<S: Store>(
    store: &S,
    path: &str,
    refset_id: &str,
) -> Result<usize, OntoError> {
    let criteria = branch_criteria(store, path, None).await?;
    let ts = criteria.timepoint();
    let actual = active_membership(store, &criteria, refset_id).await?;
    let levels = store.find_lookups(&criteria, refset_id).await?;
    let ancestor_levels: Vec<&LookupLevel> = levels.iter().filter(|l| l.path != path).collect();
    let ancestor_membership = fold_levels(&ancestor_levels);

    let include: BTreeSet<Id> = actual.difference(&ancestor_membership).cloned().collect();
    let exclude: BTreeSet<Id> = ancestor_membership.difference(&actual).cloned().collect();

    let doc_ids = vec![
        RefsetLookup::lookup_id(refset_id, LookupDirection::Include),
        RefsetLookup::lookup_id(refset_id, LookupDirection::Exclude),
    ];
    store
        .end_versions(path, ComponentKind::RefsetLookup, &doc_ids, ts)
        .await?;
    let mut upserts = Vec::new();
    if !include.is_empty() {
        let mut doc = RefsetLookup::new(refset_id, LookupDirection::Include).with_members(include);
        doc.start = ts;
        upserts.push(doc);
    }
    if !exclude.is_empty() {
        let mut doc = RefsetLookup::new(refset_id, LookupDirection::Exclude).with_members(exclude);
        doc.start = ts;
        upserts.push(doc);
    }
    let written = upserts.len();
    if !upserts.is_empty() {
        store.bulk_upsert(path, upserts).await?;
    }
    log::info!("rebuilt lookup for reference set {} on {}", refset_id, path);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(
        path: &str,
        include: &[&str],
        exclude: &[&str],
    ) -> LookupLevel {
        let inc = if include.is_empty() {
            None
        } else {
            Some(
                RefsetLookup::new("rs", LookupDirection::Include)
                    .with_members(include.iter().map(|s| s.to_string()).collect()),
            )
        };
        let exc = if exclude.is_empty() {
            None
        } else {
            Some(
                RefsetLookup::new("rs", LookupDirection::Exclude)
                    .with_members(exclude.iter().map(|s| s.to_string()).collect()),
            )
        };
        LookupLevel {
            path: path.to_string(),
            include: inc,
            exclude: exc,
        }
    }

    #[test]
    fn fold_applies_includes_then_excludes_per_level() {
        // Leaf-first order, as the criteria produces
        let levels = vec![
            level("MAIN/A", &["z"], &["y"]),
            level("MAIN", &["x", "y"], &[]),
        ];
        let refs: Vec<&LookupLevel> = levels.iter().collect();
        let members = fold_levels(&refs);
        assert_eq!(
            members.into_iter().collect::<Vec<_>>(),
            vec!["x".to_string(), "z".to_string()]
        );
    }

    #[test]
    fn child_include_restores_an_excluded_member() {
        let levels = vec![
            level("MAIN/A/A1", &["y"], &[]),
            level("MAIN/A", &[], &["y"]),
            level("MAIN", &["y"], &[]),
        ];
        let refs: Vec<&LookupLevel> = levels.iter().collect();
        assert!(fold_levels(&refs).contains("y"));
    }
}
