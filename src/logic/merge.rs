use std::collections::{BTreeMap, BTreeSet};

use crate::logic::auto_merge::{auto_merge, BaseSnapshotProvider};
use crate::logic::commit::{CommitManager, CommitTransaction};
use crate::logic::visibility::branch_criteria;
use crate::model::{
    parent_path, Branch, BranchCriteria, ChangedComponents, ClassAxiom, Commit, CommitKind,
    ComponentKind, Concept, ConceptView, Description, DescriptionView, Id, OntoError,
    ReferenceSetMember, Relationship, Timestamp, Versioned,
};
use crate::store::traits::{Store, VersionSelection};

/// Assemble the visible aggregate of one concept: the concept itself, its
/// descriptions with their language members, its relationships and axioms.
pub async fn load_concept_view<S: Store>(
    store: &S,
    criteria: &BranchCriteria,
    concept_id: &str,
) -> Result<Option<ConceptView>, OntoError> {
    let id = concept_id.to_string();
    let ids = std::slice::from_ref(&id);
    let concept = store
        .find_visible::<Concept>(criteria, Some(ids))
        .await?
        .into_iter()
        .next();
    let Some(concept) = concept else {
        return Ok(None);
    };

    let descriptions = store.find_descriptions_by_concept(criteria, ids).await?;
    let description_ids: Vec<Id> = descriptions.iter().map(|d| d.id.clone()).collect();
    let language_members = if description_ids.is_empty() {
        Vec::new()
    } else {
        store
            .find_members_by_referenced(criteria, &description_ids)
            .await?
    };
    let relationships = store.find_relationships_by_source(criteria, ids).await?;
    let axioms = store.find_axioms_by_concept(criteria, ids).await?;

    let description_views = descriptions
        .into_iter()
        .map(|description| {
            let members = language_members
                .iter()
                .filter(|m| m.referenced_component_id == description.id)
                .cloned()
                .collect();
            DescriptionView {
                description,
                language_members: members,
            }
        })
        .collect();

    Ok(Some(ConceptView {
        concept,
        descriptions: description_views,
        relationships,
        axioms,
    }))
}

/// Snapshot provider backed by the document store at a fixed criteria (the
/// merge's base timepoint).
pub struct StoreSnapshotProvider<'a, S: Store> {
    store: &'a S,
    criteria: BranchCriteria,
}

impl<'a, S: Store> StoreSnapshotProvider<'a, S> {
    pub fn new(store: &'a S, criteria: BranchCriteria) -> Self {
        Self { store, criteria }
    }
}

#[async_trait::async_trait]
impl<'a, S: Store> BaseSnapshotProvider for StoreSnapshotProvider<'a, S> {
    async fn concept_at_base(&self, concept_id: &str) -> Result<Option<ConceptView>, OntoError> {
        load_concept_view(self.store, &self.criteria, concept_id).await
    }
}

/// Changes of one merge side, rolled up to concept granularity
struct SideChanges {
    concepts: BTreeSet<Id>,
    deleted_concepts: BTreeSet<Id>,
    components: ChangedComponents,
}

/// Map a reference-set member to the concept it belongs to: language members
/// reference a description, other members reference the concept directly.
async fn member_owner<S: Store>(
    store: &S,
    criteria: &BranchCriteria,
    referenced_component_id: &Id,
) -> Result<Id, OntoError> {
    let descriptions: Vec<Description> = store
        .find_visible(criteria, Some(std::slice::from_ref(referenced_component_id)))
        .await?;
    Ok(descriptions
        .into_iter()
        .next()
        .map(|d| d.concept_id)
        .unwrap_or_else(|| referenced_component_id.clone()))
}

/// Collect the entities changed on one branch within a window: for the
/// parent side of a rebase the window is (child base, parent head]; for a
/// branch's own side every open local version counts.
async fn side_changes<S: Store>(
    store: &S,
    branch: &Branch,
    criteria: &BranchCriteria,
    window: Option<(Timestamp, Timestamp)>,
) -> Result<SideChanges, OntoError> {
    let path = &branch.path;
    let mut concepts = BTreeSet::new();
    let mut deleted_concepts = BTreeSet::new();
    let mut components = ChangedComponents::new();

    // Ancestor content without the descendant masks, for resolving the
    // owners of components this branch deleted
    let unmasked_ancestors = BranchCriteria {
        segments: criteria
            .segments
            .iter()
            .skip(1)
            .map(|segment| {
                let mut segment = segment.clone();
                segment.masked.clear();
                segment
            })
            .collect(),
    };

    macro_rules! collect_kind {
        ($ty:ty, $owner:expr) => {{
            let changed: Vec<$ty> = match window {
                Some((from, to)) => {
                    store
                        .find_on_branch(path, VersionSelection::StartedBetween(from, to))
                        .await?
                }
                None => store.find_on_branch(path, VersionSelection::Open).await?,
            };
            let open: Vec<$ty> = store.find_on_branch(path, VersionSelection::Open).await?;
            let open_ids: BTreeSet<&Id> = open.iter().map(|d| d.doc_id()).collect();

            for doc in &changed {
                components.add(<$ty as Versioned>::KIND, doc.doc_id().clone());
                let owner: Id = $owner(doc);
                concepts.insert(owner);
            }

            // Deletions: versions ended in the window with no open successor,
            // plus masked ancestor ids without a local replacement
            let (from, to) = window.unwrap_or((branch.base_timestamp, branch.head_timestamp));
            let ended: Vec<$ty> = store
                .find_on_branch(path, VersionSelection::EndedBetween(from, to))
                .await?;
            let mut deleted_ids: BTreeSet<Id> = BTreeSet::new();
            for doc in &ended {
                if !open_ids.contains(doc.doc_id()) {
                    deleted_ids.insert(doc.doc_id().clone());
                    let owner: Id = $owner(doc);
                    concepts.insert(owner);
                }
            }
            if window.is_none() {
                if let Some(replaced) = branch.replaced_ids(<$ty as Versioned>::KIND) {
                    let masked_deletions: Vec<Id> = replaced
                        .iter()
                        .filter(|id| !open_ids.contains(*id) && !deleted_ids.contains(*id))
                        .cloned()
                        .collect();
                    if !masked_deletions.is_empty() {
                        let originals: Vec<$ty> = store
                            .find_visible(&unmasked_ancestors, Some(&masked_deletions))
                            .await?;
                        for doc in &originals {
                            let owner: Id = $owner(doc);
                            concepts.insert(owner);
                        }
                        for id in masked_deletions {
                            if <$ty as Versioned>::KIND == ComponentKind::Concept {
                                concepts.insert(id.clone());
                            }
                            deleted_ids.insert(id);
                        }
                    }
                }
            }
            for id in deleted_ids {
                if <$ty as Versioned>::KIND == ComponentKind::Concept {
                    deleted_concepts.insert(id.clone());
                }
                components.add(<$ty as Versioned>::KIND, id);
            }
        }};
    }

    collect_kind!(Concept, |c: &Concept| c.id.clone());
    collect_kind!(Description, |d: &Description| d.concept_id.clone());
    collect_kind!(Relationship, |r: &Relationship| r.source_id.clone());
    collect_kind!(ClassAxiom, |a: &ClassAxiom| a.concept_id.clone());

    // Members resolve through their referenced component
    let changed_members: Vec<ReferenceSetMember> = match window {
        Some((from, to)) => {
            store
                .find_on_branch(path, VersionSelection::StartedBetween(from, to))
                .await?
        }
        None => store.find_on_branch(path, VersionSelection::Open).await?,
    };
    for member in &changed_members {
        components.add(ComponentKind::ReferenceSetMember, member.member_id.clone());
        let owner = member_owner(store, criteria, &member.referenced_component_id).await?;
        concepts.insert(owner);
    }

    Ok(SideChanges {
        concepts,
        deleted_concepts,
        components,
    })
}

/// Pull a parent branch's changes into a child. Conflicting entities resolve
/// through the caller's manually-merged versions first and the auto-merger
/// otherwise; a deletion on either side wins when no manual replacement was
/// supplied. The whole result lands as one REBASE commit on the child.
pub async fn rebase<S: Store>(
    manager: &CommitManager<S>,
    source_path: &str,
    target_path: &str,
    manual_merges: &BTreeMap<Id, ConceptView>,
) -> Result<Commit, OntoError> {
    if parent_path(target_path) != Some(source_path) {
        return Err(OntoError::BranchesNotRelated {
            source_path: source_path.to_string(),
            target_path: target_path.to_string(),
        });
    }
    let store = manager.store().as_ref();
    let parent = store
        .load_branch(source_path)
        .await?
        .ok_or_else(|| OntoError::BranchNotFound {
            path: source_path.to_string(),
        })?;
    let child = store
        .load_branch(target_path)
        .await?
        .ok_or_else(|| OntoError::BranchNotFound {
            path: target_path.to_string(),
        })?;

    let mut tx = manager
        .open_merge(
            target_path,
            CommitKind::Rebase,
            Some(source_path),
            parent.head_timestamp,
        )
        .await?;

    let parent_criteria = branch_criteria(store, source_path, None).await?;
    let child_criteria = branch_criteria(store, target_path, None).await?;
    let base_criteria = branch_criteria(store, source_path, Some(child.base_timestamp)).await?;
    let provider = StoreSnapshotProvider::new(store, base_criteria);

    let parent_changes = side_changes(
        store,
        &parent,
        &parent_criteria,
        Some((child.base_timestamp, parent.head_timestamp)),
    )
    .await?;
    let child_changes = side_changes(store, &child, &child_criteria, None).await?;

    let conflicts: Vec<&Id> = parent_changes
        .concepts
        .intersection(&child_changes.concepts)
        .collect();
    log::info!(
        "rebase {} -> {}: {} parent-side entities, {} child-side, {} conflicts",
        source_path,
        target_path,
        parent_changes.concepts.len(),
        child_changes.concepts.len(),
        conflicts.len()
    );

    for concept_id in conflicts {
        if let Some(manual) = manual_merges.get(concept_id) {
            // Selective manual resolution: the supplied version is verbatim
            tx.stage_view(manual);
            continue;
        }
        if parent_changes.deleted_concepts.contains(concept_id) {
            // Deleted on the parent: absent a manual replacement, the merge
            // accepts the deletion, sub-components included
            if let Some(child_view) =
                load_concept_view(store, &child_criteria, concept_id).await?
            {
                stage_view_deletion(&mut tx, &child_view);
            } else {
                tx.delete(ComponentKind::Concept, concept_id.clone());
            }
            continue;
        }
        if child_changes.deleted_concepts.contains(concept_id) {
            // Deleted on the child: the deletion stands
            continue;
        }
        let source_view = load_concept_view(store, &parent_criteria, concept_id).await?;
        let target_view = load_concept_view(store, &child_criteria, concept_id).await?;
        match (source_view, target_view) {
            (Some(source_view), Some(target_view)) => {
                let base_view = provider.concept_at_base(concept_id).await?;
                let merged = auto_merge(&source_view, &target_view, base_view.as_ref());
                tx.stage_view(&merged);
            }
            (Some(_), None) | (None, Some(_)) | (None, None) => {
                // One side has nothing visible: the other side's state flows
                // through the rebase untouched
            }
        }
    }

    tx.set_new_base(parent.head_timestamp);
    tx.add_changed(&parent_changes.components);
    tx.add_changed(&child_changes.components);
    manager.commit(tx).await
}

fn stage_view_deletion(tx: &mut CommitTransaction, view: &ConceptView) {
    tx.delete(ComponentKind::Concept, view.concept.id.clone());
    for description in &view.descriptions {
        tx.delete(ComponentKind::Description, description.description.id.clone());
        for member in &description.language_members {
            tx.delete(ComponentKind::ReferenceSetMember, member.member_id.clone());
        }
    }
    for relationship in &view.relationships {
        tx.delete(ComponentKind::Relationship, relationship.id.clone());
    }
    for axiom in &view.axioms {
        tx.delete(ComponentKind::ClassAxiom, axiom.id.clone());
    }
}

/// Push a child branch's changes into its parent as one PROMOTION commit.
/// The child must be rebased (not BEHIND) and free of recorded integrity
/// issues; afterwards it is empty and UP_TO_DATE, its old versions
/// time-bounded for historical reads.
pub async fn promote<S: Store>(
    manager: &CommitManager<S>,
    source_path: &str,
    target_path: &str,
) -> Result<Commit, OntoError> {
    if parent_path(source_path) != Some(target_path) {
        return Err(OntoError::BranchesNotRelated {
            source_path: source_path.to_string(),
            target_path: target_path.to_string(),
        });
    }
    let store = manager.store().as_ref();
    let child = store
        .load_branch(source_path)
        .await?
        .ok_or_else(|| OntoError::BranchNotFound {
            path: source_path.to_string(),
        })?;
    let parent = store
        .load_branch(target_path)
        .await?
        .ok_or_else(|| OntoError::BranchNotFound {
            path: target_path.to_string(),
        })?;

    if parent.head_timestamp > child.base_timestamp {
        return Err(OntoError::PromotionRequiresRebase {
            path: source_path.to_string(),
        });
    }
    if child.has_integrity_issue() {
        return Err(OntoError::IntegrityIssuesBlockPromotion {
            path: source_path.to_string(),
        });
    }
    if !child.contains_content {
        return Err(OntoError::NothingToPromote {
            path: source_path.to_string(),
        });
    }

    let mut tx = manager
        .open_merge(
            target_path,
            CommitKind::Promotion,
            Some(source_path),
            child.head_timestamp,
        )
        .await?;

    let child_criteria = branch_criteria(store, source_path, None).await?;
    let child_changes = side_changes(store, &child, &child_criteria, None).await?;

    // Copy the child's open component versions onto the parent; the commit
    // flush supersedes parent versions and records replacements upward
    let mut open_by_kind: BTreeMap<ComponentKind, BTreeSet<Id>> = BTreeMap::new();
    let concepts: Vec<Concept> = store
        .find_on_branch(source_path, VersionSelection::Open)
        .await?;
    open_by_kind.insert(
        ComponentKind::Concept,
        concepts.iter().map(|d| d.id.clone()).collect(),
    );
    for doc in concepts {
        tx.upsert_concept(doc);
    }
    let descriptions: Vec<Description> = store
        .find_on_branch(source_path, VersionSelection::Open)
        .await?;
    open_by_kind.insert(
        ComponentKind::Description,
        descriptions.iter().map(|d| d.id.clone()).collect(),
    );
    for doc in descriptions {
        tx.upsert_description(doc);
    }
    let relationships: Vec<Relationship> = store
        .find_on_branch(source_path, VersionSelection::Open)
        .await?;
    open_by_kind.insert(
        ComponentKind::Relationship,
        relationships.iter().map(|d| d.id.clone()).collect(),
    );
    for doc in relationships {
        tx.upsert_relationship(doc);
    }
    let members: Vec<ReferenceSetMember> = store
        .find_on_branch(source_path, VersionSelection::Open)
        .await?;
    open_by_kind.insert(
        ComponentKind::ReferenceSetMember,
        members.iter().map(|d| d.member_id.clone()).collect(),
    );
    for doc in members {
        tx.upsert_member(doc);
    }
    let axioms: Vec<ClassAxiom> = store
        .find_on_branch(source_path, VersionSelection::Open)
        .await?;
    open_by_kind.insert(
        ComponentKind::ClassAxiom,
        axioms.iter().map(|d| d.id.clone()).collect(),
    );
    for doc in axioms {
        tx.upsert_axiom(doc);
    }

    // Deletions the child recorded against ancestor content propagate up:
    // a replaced id with no open local replacement is a deletion
    for kind in ComponentKind::AUTHORED {
        if let Some(replaced) = child.replaced_ids(kind) {
            let open_ids = open_by_kind.get(&kind);
            for id in replaced {
                if open_ids.map_or(true, |ids| !ids.contains(id)) {
                    tx.delete(kind, id.clone());
                }
            }
        }
    }

    tx.set_promotion_source(source_path);
    tx.add_changed(&child_changes.components);
    log::info!(
        "promoting {} -> {}: {} entities",
        source_path,
        target_path,
        child_changes.concepts.len()
    );
    manager.commit(tx).await
}
