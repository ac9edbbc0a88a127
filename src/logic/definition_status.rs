use std::collections::BTreeSet;

use crate::logic::commit::{CommitContext, CommitListener};
use crate::logic::visibility::branch_criteria;
use crate::model::{
    ClassAxiom, ComponentKind, Concept, Id, OntoError, Publishable, Versioned,
};
use crate::store::traits::{Store, VersionSelection};

/// First pipeline stage: a concept is fully defined while it carries an
/// active defining axiom, primitive otherwise. Runs before the semantic
/// index so later stages see settled concept documents.
pub struct DefinitionStatusUpdater;

#[async_trait::async_trait]
impl<S: Store> CommitListener<S> for DefinitionStatusUpdater {
    fn name(&self) -> &'static str {
        "definition-status"
    }

    async fn on_commit(&self, store: &S, ctx: &mut CommitContext) -> Result<(), OntoError> {
        let path = ctx.commit.branch_path.clone();
        let ts = ctx.commit.timestamp;

        // Concepts whose axioms were touched this commit, including axioms
        // that were deleted (their old versions were ended at the commit
        // timestamp)
        let mut concept_ids: BTreeSet<Id> = BTreeSet::new();
        let changed_axiom_ids = ctx.changed.id_vec(ComponentKind::ClassAxiom);
        if changed_axiom_ids.is_empty() {
            return Ok(());
        }

        let criteria = branch_criteria(store, &path, None).await?;
        let visible_axioms: Vec<ClassAxiom> = store
            .find_visible(&criteria, Some(&changed_axiom_ids))
            .await?;
        for axiom in &visible_axioms {
            concept_ids.insert(axiom.concept_id.clone());
        }
        let ended_axioms: Vec<ClassAxiom> = store
            .find_on_branch(&path, VersionSelection::EndedAt(ts))
            .await?;
        for axiom in &ended_axioms {
            concept_ids.insert(axiom.concept_id.clone());
        }
        if concept_ids.is_empty() {
            return Ok(());
        }

        let concept_id_vec: Vec<Id> = concept_ids.iter().cloned().collect();
        let concepts: Vec<Concept> = store.find_visible(&criteria, Some(&concept_id_vec)).await?;
        let axioms = store.find_axioms_by_concept(&criteria, &concept_id_vec).await?;

        let mut updates = Vec::new();
        for concept in concepts {
            let defined = axioms
                .iter()
                .any(|a| a.concept_id == concept.id && a.active && a.defined);
            if concept.defined == defined {
                continue;
            }
            let mut updated = concept.clone();
            updated.defined = defined;
            if concept.released {
                updated.enforce_released(&concept);
            }
            if concept.start != ts {
                let ended = store
                    .end_versions(&path, ComponentKind::Concept, &[concept.id.clone()], ts)
                    .await?;
                if ended.is_empty() {
                    ctx.branch
                        .record_replaced(ComponentKind::Concept, concept.id.clone());
                }
            }
            updated.set_start(ts);
            updated.set_end(None);
            ctx.changed.add(ComponentKind::Concept, updated.id.clone());
            log::debug!(
                "definition status of {} recomputed to defined={}",
                updated.id,
                defined
            );
            updates.push(updated);
        }
        if !updates.is_empty() {
            store.bulk_upsert(&path, updates).await?;
        }
        Ok(())
    }
}
