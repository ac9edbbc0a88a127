use anyhow::Result;

use crate::model::{
    Branch, BranchCriteria, ClassAxiom, ClosureEntry, ComponentKind, Description, Id,
    ReferenceSetMember, RefsetLookup, Relationship, Timestamp, Versioned,
};

/// Selection over the raw version history of a single branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelection {
    /// Versions with no end timestamp
    Open,
    /// Open versions whose window started after the given timepoint
    OpenStartedAfter(Timestamp),
    /// Versions started within `(from, to]`
    StartedBetween(Timestamp, Timestamp),
    /// Versions ended exactly at the given timestamp
    EndedAt(Timestamp),
    /// Versions ended within `(from, to]`
    EndedBetween(Timestamp, Timestamp),
}

impl VersionSelection {
    pub fn matches(&self, start: Timestamp, end: Option<Timestamp>) -> bool {
        match *self {
            VersionSelection::Open => end.is_none(),
            VersionSelection::OpenStartedAfter(after) => end.is_none() && start > after,
            VersionSelection::StartedBetween(from, to) => start > from && start <= to,
            VersionSelection::EndedAt(at) => end == Some(at),
            VersionSelection::EndedBetween(from, to) => {
                end.map_or(false, |e| e > from && e <= to)
            }
        }
    }
}

/// CRUD over versioned branch documents
#[async_trait::async_trait]
pub trait BranchStore: Send + Sync {
    /// The open (current) branch document, if the branch exists
    async fn load_branch(&self, path: &str) -> Result<Option<Branch>>;
    /// The branch document visible at a historical timepoint
    async fn load_branch_at(&self, path: &str, timepoint: Timestamp) -> Result<Option<Branch>>;
    /// Append the first document of a new branch
    async fn create_branch_doc(&self, branch: Branch) -> Result<()>;
    /// End the open document at `branch.start` and append the new one
    async fn supersede_branch(&self, branch: Branch) -> Result<()>;
    /// Replace the open document in place (metadata updates, no new version)
    async fn put_branch(&self, branch: Branch) -> Result<()>;
    /// Drop the document started at `start` and reopen its predecessor
    async fn rollback_branch_version(&self, path: &str, start: Timestamp) -> Result<()>;
    /// Open documents of the direct children of `path`
    async fn list_child_branches(&self, path: &str) -> Result<Vec<Branch>>;
}

/// Bulk writes and criteria/range queries over versioned component snapshots,
/// keyed by (branch, component id, start timestamp)
#[async_trait::async_trait]
pub trait ComponentStore: Send + Sync {
    /// Insert new versions; an existing (id, start) pair on the branch is
    /// overwritten (same-commit recompute)
    async fn bulk_upsert<C: Versioned>(&self, path: &str, docs: Vec<C>) -> Result<()>;
    /// End the open versions of the given ids on the branch; returns the ids
    /// actually ended
    async fn end_versions(
        &self,
        path: &str,
        kind: ComponentKind,
        ids: &[Id],
        end: Timestamp,
    ) -> Result<Vec<Id>>;
    /// Raw branch-local version history matching a selection
    async fn find_on_branch<C: Versioned>(
        &self,
        path: &str,
        selection: VersionSelection,
    ) -> Result<Vec<C>>;
    /// The currently-visible snapshot per id for a visibility criteria,
    /// optionally restricted to a set of ids
    async fn find_visible<C: Versioned>(
        &self,
        criteria: &BranchCriteria,
        ids: Option<&[Id]>,
    ) -> Result<Vec<C>>;
    /// Undo support: drop versions started at the given commit timestamp
    async fn remove_versions_started_at(
        &self,
        path: &str,
        kind: ComponentKind,
        start: Timestamp,
    ) -> Result<()>;
    /// Undo support: reopen versions ended at the given commit timestamp
    async fn reopen_versions_ended_at(
        &self,
        path: &str,
        kind: ComponentKind,
        end: Timestamp,
    ) -> Result<()>;
}

/// Lookup docs of one lineage level, leaf-to-root order follows the criteria
#[derive(Debug, Clone, PartialEq)]
pub struct LookupLevel {
    pub path: String,
    pub include: Option<RefsetLookup>,
    pub exclude: Option<RefsetLookup>,
}

/// Targeted queries the engine needs beyond per-id resolution
#[async_trait::async_trait]
pub trait QueryStore: Send + Sync {
    async fn find_relationships_by_source(
        &self,
        criteria: &BranchCriteria,
        source_ids: &[Id],
    ) -> Result<Vec<Relationship>>;
    async fn find_descriptions_by_concept(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &[Id],
    ) -> Result<Vec<Description>>;
    async fn find_axioms_by_concept(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &[Id],
    ) -> Result<Vec<ClassAxiom>>;
    async fn find_members_by_refset(
        &self,
        criteria: &BranchCriteria,
        refset_id: &str,
    ) -> Result<Vec<ReferenceSetMember>>;
    async fn find_members_by_referenced(
        &self,
        criteria: &BranchCriteria,
        referenced_ids: &[Id],
    ) -> Result<Vec<ReferenceSetMember>>;
    /// Closure entries whose ancestor set contains the given concept
    async fn find_descendant_entries(
        &self,
        criteria: &BranchCriteria,
        ancestor_id: &str,
    ) -> Result<Vec<ClosureEntry>>;
    /// Visible lookup documents per lineage level for one reference set
    async fn find_lookups(
        &self,
        criteria: &BranchCriteria,
        refset_id: &str,
    ) -> Result<Vec<LookupLevel>>;
}

/// The full document-store capability the engine is generic over
pub trait Store: BranchStore + ComponentStore + QueryStore + Send + Sync + 'static {}
