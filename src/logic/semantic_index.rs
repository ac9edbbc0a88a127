use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::IndexConfig;
use crate::logic::commit::{CommitContext, CommitListener};
use crate::logic::visibility::branch_criteria;
use crate::model::{
    AttributeFragment, AttributeValue, BranchCriteria, ClosureEntry, CommitKind, ComponentKind,
    Concept, Id, OntoError, Relationship, Timestamp,
};
use crate::store::traits::{Store, VersionSelection};

/// Incremental transitive-closure maintainer, a listener-pipeline stage.
///
/// For every concept whose IS-A edges changed, the ancestor set is recomputed
/// as the union of `{parent} ∪ ancestors(parent)` over the remaining active
/// parents, and the same recomputation cascades over all existing
/// descendants: a lost ancestor reachable via another path is retained, a
/// gained one propagates. The edge set is validated as a DAG before any
/// update lands; a cycle fails a content commit fast but is tolerated for
/// merge commits, which recompute best-effort and self-heal on a later edit.
pub struct SemanticIndexUpdater {
    config: IndexConfig,
}

impl SemanticIndexUpdater {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }
}

/// Adjacency over opaque concept ids: the affected subgraph's active IS-A
/// parents, plus precomputed ancestor sets for parents outside the subgraph.
struct ClosureGraph {
    parents: BTreeMap<Id, BTreeSet<Id>>,
    external: BTreeMap<Id, BTreeSet<Id>>,
}

impl ClosureGraph {
    /// DFS with an explicit recursion-stack set; a cycle comes back as the
    /// loop members (data, not a panic from deep inside traversal).
    fn ancestors_of(
        &self,
        id: &Id,
        memo: &mut BTreeMap<Id, BTreeSet<Id>>,
        stack: &mut Vec<Id>,
    ) -> Result<BTreeSet<Id>, Vec<Id>> {
        if let Some(done) = memo.get(id) {
            return Ok(done.clone());
        }
        if let Some(pos) = stack.iter().position(|s| s == id) {
            return Err(stack[pos..].to_vec());
        }
        let mut ancestors = BTreeSet::new();
        if let Some(direct) = self.parents.get(id) {
            stack.push(id.clone());
            for parent in direct {
                ancestors.insert(parent.clone());
                if self.parents.contains_key(parent) {
                    ancestors.extend(self.ancestors_of(parent, memo, stack)?);
                } else if let Some(external) = self.external.get(parent) {
                    ancestors.extend(external.iter().cloned());
                }
            }
            stack.pop();
        }
        if ancestors.contains(id) {
            // Self-ancestry through an already-indexed path
            return Err(vec![id.clone()]);
        }
        memo.insert(id.clone(), ancestors.clone());
        Ok(ancestors)
    }
}

/// Result of computing the affected subgraph: per-concept ancestor sets and
/// the concepts skipped because they sit on (or above) a cycle.
struct ComputedClosures {
    ancestors: BTreeMap<Id, BTreeSet<Id>>,
    skipped: BTreeSet<Id>,
    first_cycle: Option<Vec<Id>>,
}

fn compute_closures(concept_ids: &BTreeSet<Id>, graph: &ClosureGraph) -> ComputedClosures {
    let mut memo = BTreeMap::new();
    let mut skipped = BTreeSet::new();
    let mut first_cycle = None;
    let mut ancestors = BTreeMap::new();
    for id in concept_ids {
        let mut stack = Vec::new();
        match graph.ancestors_of(id, &mut memo, &mut stack) {
            Ok(set) => {
                ancestors.insert(id.clone(), set);
            }
            Err(loop_members) => {
                skipped.insert(id.clone());
                if first_cycle.is_none() {
                    first_cycle = Some(loop_members);
                }
            }
        }
    }
    ComputedClosures {
        ancestors,
        skipped,
        first_cycle,
    }
}

fn attribute_map(relationships: &[Relationship]) -> BTreeMap<Id, BTreeMap<i32, Vec<AttributeFragment>>> {
    let mut by_concept: BTreeMap<Id, BTreeMap<i32, Vec<AttributeFragment>>> = BTreeMap::new();
    for rel in relationships {
        if !rel.active || rel.is_hierarchy_edge() {
            continue;
        }
        let Some(value) = AttributeValue::from_edge(rel.destination_id.as_ref(), rel.value.as_ref())
        else {
            continue;
        };
        by_concept
            .entry(rel.source_id.clone())
            .or_default()
            .entry(rel.group)
            .or_default()
            .push(AttributeFragment {
                type_id: rel.type_id.clone(),
                value,
            });
    }
    by_concept
}

#[async_trait::async_trait]
impl<S: Store> CommitListener<S> for SemanticIndexUpdater {
    fn name(&self) -> &'static str {
        "semantic-index"
    }

    async fn on_commit(&self, store: &S, ctx: &mut CommitContext) -> Result<(), OntoError> {
        let path = ctx.commit.branch_path.clone();
        let ts = ctx.commit.timestamp;
        let criteria = branch_criteria(store, &path, None).await?;

        // Concepts whose hierarchy or attributes were touched this commit
        let mut hierarchy_affected: BTreeSet<Id> = BTreeSet::new();
        let mut attribute_affected: BTreeSet<Id> = BTreeSet::new();

        let changed_rel_ids = ctx.changed.id_vec(ComponentKind::Relationship);
        if !changed_rel_ids.is_empty() {
            let visible: Vec<Relationship> =
                store.find_visible(&criteria, Some(&changed_rel_ids)).await?;
            let ended: Vec<Relationship> = store
                .find_on_branch(&path, VersionSelection::EndedAt(ts))
                .await?;
            for rel in visible.iter().chain(ended.iter()) {
                if rel.is_hierarchy_edge() {
                    hierarchy_affected.insert(rel.source_id.clone());
                } else {
                    attribute_affected.insert(rel.source_id.clone());
                }
            }
        }
        // Concept activity changes reshape the graph as well
        hierarchy_affected.extend(ctx.changed.ids(ComponentKind::Concept).cloned());
        hierarchy_affected.extend(ctx.deleted.ids(ComponentKind::Concept).cloned());

        if hierarchy_affected.is_empty() && attribute_affected.is_empty() {
            return Ok(());
        }

        // Cascade over all existing descendants of hierarchy-affected concepts
        let mut all_affected = hierarchy_affected.clone();
        for concept_id in &hierarchy_affected {
            for entry in store.find_descendant_entries(&criteria, concept_id).await? {
                all_affected.insert(entry.concept_id);
            }
        }
        all_affected.extend(attribute_affected);

        self.update_entries(store, &path, ts, &criteria, all_affected, ctx)
            .await
    }
}

impl SemanticIndexUpdater {
    async fn update_entries<S: Store>(
        &self,
        store: &S,
        path: &str,
        ts: Timestamp,
        criteria: &BranchCriteria,
        affected: BTreeSet<Id>,
        ctx: &mut CommitContext,
    ) -> Result<(), OntoError> {
        let affected_vec: Vec<Id> = affected.iter().cloned().collect();
        let relationships = store
            .find_relationships_by_source(criteria, &affected_vec)
            .await?;
        let concepts: Vec<Concept> = store.find_visible(criteria, Some(&affected_vec)).await?;
        let active_concepts: BTreeSet<&Id> = concepts
            .iter()
            .filter(|c| c.active)
            .map(|c| &c.id)
            .collect();

        let mut parents: BTreeMap<Id, BTreeSet<Id>> = BTreeMap::new();
        for id in &affected {
            parents.insert(id.clone(), BTreeSet::new());
        }
        for rel in &relationships {
            if rel.active && rel.is_hierarchy_edge() {
                if let Some(dest) = &rel.destination_id {
                    parents
                        .entry(rel.source_id.clone())
                        .or_default()
                        .insert(dest.clone());
                }
            }
        }

        // Ancestor sets of parents outside the affected subgraph come from
        // their stored entries
        let external_ids: Vec<Id> = parents
            .values()
            .flatten()
            .filter(|p| !affected.contains(*p))
            .cloned()
            .unique()
            .collect();
        let mut external: BTreeMap<Id, BTreeSet<Id>> = BTreeMap::new();
        if !external_ids.is_empty() {
            let entries: Vec<ClosureEntry> =
                store.find_visible(criteria, Some(&external_ids)).await?;
            for entry in entries {
                external.insert(entry.concept_id.clone(), entry.ancestors);
            }
        }

        let graph = ClosureGraph { parents, external };
        let computed = compute_closures(&affected, &graph);

        if let Some(loop_members) = &computed.first_cycle {
            if ctx.commit.kind == CommitKind::Content {
                return Err(OntoError::CycleDetected {
                    path: path.to_string(),
                    concept_id: loop_members[0].clone(),
                    loop_members: loop_members.clone(),
                });
            }
            // A rebase/promotion can union two independently-valid edge sets
            // into a transient cycle; recompute lazily and self-heal on the
            // next edit instead of failing the merge.
            log::warn!(
                "transient hierarchy cycle on {} during {:?} ({} concepts skipped): [{}]",
                path,
                ctx.commit.kind,
                computed.skipped.len(),
                loop_members.iter().join(" -> ")
            );
        }

        let attributes = attribute_map(&relationships);

        let mut upserts: Vec<ClosureEntry> = Vec::new();
        let mut removals: Vec<Id> = Vec::new();
        for concept_id in &affected {
            if computed.skipped.contains(concept_id) {
                continue;
            }
            if !active_concepts.contains(concept_id) {
                removals.push(concept_id.clone());
                continue;
            }
            let mut entry = ClosureEntry::new(concept_id.clone());
            entry.ancestors = computed
                .ancestors
                .get(concept_id)
                .cloned()
                .unwrap_or_default();
            entry.attributes = attributes.get(concept_id).cloned().unwrap_or_default();
            entry.start = ts;
            upserts.push(entry);
        }

        // Apply in bounded-size batches to cap per-commit memory
        let batch_size = self.config.update_batch_size.max(1);
        for batch in upserts.chunks(batch_size) {
            let ids: Vec<Id> = batch.iter().map(|e| e.concept_id.clone()).collect();
            let ended = store
                .end_versions(path, ComponentKind::ClosureEntry, &ids, ts)
                .await?;
            for id in &ids {
                if !ended.contains(id) && entry_visible_on_ancestor(store, criteria, id).await? {
                    ctx.branch.record_replaced(ComponentKind::ClosureEntry, id.clone());
                }
            }
            store.bulk_upsert(path, batch.to_vec()).await?;
        }
        for ids in removals.chunks(batch_size) {
            let ended = store
                .end_versions(path, ComponentKind::ClosureEntry, ids, ts)
                .await?;
            for id in ids {
                if !ended.contains(id) && entry_visible_on_ancestor(store, criteria, id).await? {
                    ctx.branch.record_replaced(ComponentKind::ClosureEntry, id.clone());
                }
            }
        }
        Ok(())
    }
}

async fn entry_visible_on_ancestor<S: Store>(
    store: &S,
    criteria: &BranchCriteria,
    id: &Id,
) -> Result<bool, OntoError> {
    if criteria.segments.len() < 2 {
        return Ok(false);
    }
    let ancestor_criteria = BranchCriteria {
        segments: criteria.segments[1..].to_vec(),
    };
    let found: Vec<ClosureEntry> = store
        .find_visible(&ancestor_criteria, Some(std::slice::from_ref(id)))
        .await?;
    Ok(!found.is_empty())
}

/// Recompute every closure entry of a branch from a consistent snapshot.
/// Read-mostly: runs without the commit lock, bounded at the branch head so
/// a commit mid-flight stays invisible. Cycles are tolerated (skip + warn)
/// the way merge-driven recomputation tolerates them.
pub async fn rebuild_branch<S: Store>(
    store: &S,
    config: &IndexConfig,
    path: &str,
) -> Result<usize, OntoError> {
    let criteria = branch_criteria(store, path, None).await?;
    let ts = criteria.timepoint();

    let concepts: Vec<Concept> = store.find_visible(&criteria, None).await?;
    let concept_ids: BTreeSet<Id> = concepts
        .iter()
        .filter(|c| c.active)
        .map(|c| c.id.clone())
        .collect();
    let id_vec: Vec<Id> = concept_ids.iter().cloned().collect();
    let relationships = store.find_relationships_by_source(&criteria, &id_vec).await?;

    let mut parents: BTreeMap<Id, BTreeSet<Id>> = BTreeMap::new();
    for id in &concept_ids {
        parents.insert(id.clone(), BTreeSet::new());
    }
    for rel in &relationships {
        if rel.active && rel.is_hierarchy_edge() {
            if let Some(dest) = &rel.destination_id {
                parents
                    .entry(rel.source_id.clone())
                    .or_default()
                    .insert(dest.clone());
            }
        }
    }
    let graph = ClosureGraph {
        parents,
        external: BTreeMap::new(),
    };
    let computed = compute_closures(&concept_ids, &graph);
    if let Some(loop_members) = &computed.first_cycle {
        log::warn!(
            "hierarchy cycle on {} during rebuild, {} concepts skipped: [{}]",
            path,
            computed.skipped.len(),
            loop_members.iter().join(" -> ")
        );
    }

    let attributes = attribute_map(&relationships);
    let mut entries = Vec::new();
    for concept_id in &concept_ids {
        if computed.skipped.contains(concept_id) {
            continue;
        }
        let mut entry = ClosureEntry::new(concept_id.clone());
        entry.ancestors = computed
            .ancestors
            .get(concept_id)
            .cloned()
            .unwrap_or_default();
        entry.attributes = attributes.get(concept_id).cloned().unwrap_or_default();
        entry.start = ts;
        entries.push(entry);
    }

    let written = entries.len();
    let batch_size = config.update_batch_size.max(1);
    for batch in entries.chunks(batch_size) {
        let ids: Vec<Id> = batch.iter().map(|e| e.concept_id.clone()).collect();
        store
            .end_versions(path, ComponentKind::ClosureEntry, &ids, ts)
            .await?;
        store.bulk_upsert(path, batch.to_vec()).await?;
    }
    log::info!("rebuilt semantic index on {}: {} entries", path, written);
    Ok(written)
}

/// Visible ancestor set of a concept, straight from the semantic index
pub async fn ancestors_of<S: Store>(
    store: &S,
    path: &str,
    concept_id: &str,
) -> Result<BTreeSet<Id>, OntoError> {
    let criteria = branch_criteria(store, path, None).await?;
    let ids = vec![concept_id.to_string()];
    let entries: Vec<ClosureEntry> = store.find_visible(&criteria, Some(&ids)).await?;
    Ok(entries
        .into_iter()
        .next()
        .map(|e| e.ancestors)
        .unwrap_or_default())
}

/// Visible descendant set of a concept (concepts whose closure contains it)
pub async fn descendants_of<S: Store>(
    store: &S,
    path: &str,
    concept_id: &str,
) -> Result<BTreeSet<Id>, OntoError> {
    let criteria = branch_criteria(store, path, None).await?;
    let entries = store.find_descendant_entries(&criteria, concept_id).await?;
    Ok(entries.into_iter().map(|e| e.concept_id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> ClosureGraph {
        let mut parents: BTreeMap<Id, BTreeSet<Id>> = BTreeMap::new();
        for (child, parent) in edges {
            parents
                .entry(child.to_string())
                .or_default()
                .insert(parent.to_string());
        }
        ClosureGraph {
            parents,
            external: BTreeMap::new(),
        }
    }

    #[test]
    fn closure_unions_all_parent_paths() {
        let graph = graph(&[("c", "b"), ("b", "a"), ("c", "x"), ("x", "a")]);
        let ids: BTreeSet<Id> = ["a", "b", "c", "x"].iter().map(|s| s.to_string()).collect();
        let computed = compute_closures(&ids, &graph);
        let c = computed.ancestors.get("c").unwrap();
        assert_eq!(
            c.iter().cloned().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string(), "x".to_string()]
        );
    }

    #[test]
    fn cycle_is_reported_as_data_with_loop_members() {
        let graph = graph(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let ids: BTreeSet<Id> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let computed = compute_closures(&ids, &graph);
        let cycle = computed.first_cycle.expect("cycle expected");
        assert_eq!(cycle.len(), 3);
        assert_eq!(computed.skipped.len(), 3);
    }

    #[test]
    fn external_ancestors_are_reused_without_traversal() {
        let mut graph = graph(&[("c", "b")]);
        graph.external.insert(
            "b".to_string(),
            ["a".to_string()].into_iter().collect(),
        );
        let ids: BTreeSet<Id> = ["c".to_string()].into_iter().collect();
        let computed = compute_closures(&ids, &graph);
        let c = computed.ancestors.get("c").unwrap();
        assert!(c.contains("a"));
        assert!(c.contains("b"));
    }
}
