use std::collections::{BTreeMap, BTreeSet};

use crate::logic::commit::{CommitContext, CommitListener};
use crate::logic::visibility::branch_criteria;
use crate::model::{
    BranchCriteria, ClassAxiom, Concept, Id, IntegrityReport, IssueKind, OntoError,
    Relationship, Timestamp, INTEGRITY_ISSUE_KEY,
};
use crate::store::traits::{Store, VersionSelection};

/// Validate a set of relationships and axioms against the visible concept
/// graph: every source, type, destination and axiom-referenced concept must
/// resolve to an active concept.
async fn validate<S: Store>(
    store: &S,
    criteria: &BranchCriteria,
    relationships: &[Relationship],
    axioms: &[ClassAxiom],
    report: &mut IntegrityReport,
) -> Result<(), OntoError> {
    let mut referenced: BTreeSet<Id> = BTreeSet::new();
    for rel in relationships {
        referenced.insert(rel.source_id.clone());
        referenced.insert(rel.type_id.clone());
        if let Some(dest) = &rel.destination_id {
            referenced.insert(dest.clone());
        }
    }
    for axiom in axioms {
        referenced.insert(axiom.concept_id.clone());
        referenced.extend(axiom.referenced_concept_ids.iter().cloned());
    }
    if referenced.is_empty() {
        return Ok(());
    }

    let ids: Vec<Id> = referenced.into_iter().collect();
    let concepts: Vec<Concept> = store.find_visible(criteria, Some(&ids)).await?;
    let active: BTreeSet<&Id> = concepts
        .iter()
        .filter(|c| c.active)
        .map(|c| &c.id)
        .collect();
    let resolves = |id: &Id| active.contains(id);

    for rel in relationships {
        if !rel.active {
            continue;
        }
        if !resolves(&rel.source_id) {
            report.add(
                IssueKind::MissingOrInactiveSource,
                rel.id.clone(),
                rel.source_id.clone(),
            );
        }
        if !resolves(&rel.type_id) {
            report.add(
                IssueKind::MissingOrInactiveType,
                rel.id.clone(),
                rel.type_id.clone(),
            );
        }
        if let Some(dest) = &rel.destination_id {
            if !resolves(dest) {
                report.add(
                    IssueKind::MissingOrInactiveDestination,
                    rel.id.clone(),
                    dest.clone(),
                );
            }
        }
    }
    for axiom in axioms {
        if !axiom.active {
            continue;
        }
        for referenced_id in &axiom.referenced_concept_ids {
            if !resolves(referenced_id) {
                report.add(
                    IssueKind::MissingOrInactiveAxiomReference,
                    axiom.id.clone(),
                    referenced_id.clone(),
                );
            }
        }
    }
    Ok(())
}

/// Validate every relationship and axiom currently visible on the branch.
/// Usable on any branch, including the root.
pub async fn full_scan<S: Store>(
    store: &S,
    path: &str,
    timepoint: Option<Timestamp>,
) -> Result<IntegrityReport, OntoError> {
    let criteria = branch_criteria(store, path, timepoint).await?;
    let relationships: Vec<Relationship> = store.find_visible(&criteria, None).await?;
    let axioms: Vec<ClassAxiom> = store.find_visible(&criteria, None).await?;

    let mut report = IntegrityReport::new(path, criteria.timepoint());
    validate(store, &criteria, &relationships, &axioms, &mut report).await?;
    log::info!(
        "integrity full scan on {}: {} issues",
        path,
        report.issue_count()
    );
    Ok(report)
}

/// Validate only the components changed on this branch since its base.
/// Refuses the root branch, where "changed since base" is unbounded.
pub async fn incremental_scan<S: Store>(
    store: &S,
    path: &str,
) -> Result<IntegrityReport, OntoError> {
    let branch = store
        .load_branch(path)
        .await?
        .ok_or_else(|| OntoError::BranchNotFound {
            path: path.to_string(),
        })?;
    if branch.is_root() {
        return Err(OntoError::RootScanNotSupported {
            path: path.to_string(),
        });
    }
    // Every open branch-local version is an unpromoted change since the
    // base: promotion time-bounds them all, so no timestamp math is needed
    let criteria = branch_criteria(store, path, None).await?;
    let relationships: Vec<Relationship> =
        store.find_on_branch(path, VersionSelection::Open).await?;
    let axioms: Vec<ClassAxiom> = store.find_on_branch(path, VersionSelection::Open).await?;

    let mut report = IntegrityReport::new(path, branch.head_timestamp);
    validate(store, &criteria, &relationships, &axioms, &mut report).await?;
    Ok(report)
}

/// Final pipeline stage: runs the incremental scan on every non-root commit
/// and persists the outcome as a promotion-blocking flag in the hidden
/// metadata namespace. The flag clears automatically the next time the scan
/// comes back clean; all other metadata keys pass through untouched.
pub struct IntegrityCheckListener;

#[async_trait::async_trait]
impl<S: Store> CommitListener<S> for IntegrityCheckListener {
    fn name(&self) -> &'static str {
        "integrity"
    }

    async fn on_commit(&self, store: &S, ctx: &mut CommitContext) -> Result<(), OntoError> {
        if ctx.branch.is_root() {
            log::debug!("skipping incremental integrity scan on the root branch");
            return Ok(());
        }
        let path = ctx.commit.branch_path.clone();
        let criteria = branch_criteria(store, &path, None).await?;
        let relationships: Vec<Relationship> =
            store.find_on_branch(&path, VersionSelection::Open).await?;
        let axioms: Vec<ClassAxiom> =
            store.find_on_branch(&path, VersionSelection::Open).await?;

        let mut report = IntegrityReport::new(&path, ctx.commit.timestamp);
        validate(store, &criteria, &relationships, &axioms, &mut report).await?;

        if report.is_empty() {
            if ctx.branch.metadata.remove(INTEGRITY_ISSUE_KEY).is_some() {
                log::info!("integrity issues on {} cleared", path);
            }
        } else {
            log::warn!(
                "integrity issues on {}: {} components affected",
                path,
                report.issue_count()
            );
            ctx.branch.metadata.insert(
                INTEGRITY_ISSUE_KEY.to_string(),
                serde_json::to_value(&report).map_err(anyhow::Error::from)?,
            );
        }
        Ok(())
    }
}

/// The persisted integrity report of a branch, if any
pub fn persisted_report(
    metadata: &BTreeMap<String, serde_json::Value>,
) -> Option<IntegrityReport> {
    metadata
        .get(INTEGRITY_ISSUE_KEY)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}
