use std::sync::Arc;

use crate::config::IndexConfig;
use crate::logic::branch_ops::{allocate_timestamp, BranchLock, BranchLockManager};
use crate::logic::definition_status::DefinitionStatusUpdater;
use crate::logic::integrity::IntegrityCheckListener;
use crate::logic::lookup::RefsetLookupUpdater;
use crate::logic::semantic_index::SemanticIndexUpdater;
use crate::logic::visibility::branch_criteria;
use crate::model::{
    Branch, BranchCriteria, ChangedComponents, ClassAxiom, Commit, CommitKind, ComponentKind,
    Concept, ConceptView, Description, Id, OntoError, Publishable, ReferenceSetMember,
    Relationship, Timestamp, Versioned,
};
use crate::store::traits::{Store, VersionSelection};

/// Context handed to every pipeline stage after a successful flush. Stages
/// may stage further index writes at the commit timestamp and mutate the
/// branch metadata; the manager persists the final branch document once the
/// whole pipeline has run.
pub struct CommitContext {
    pub commit: Commit,
    /// All touched component ids per kind, including deletions
    pub changed: ChangedComponents,
    /// The subset of `changed` that was deleted
    pub deleted: ChangedComponents,
    /// Open branch document after the commit; metadata mutations stick
    pub branch: Branch,
}

/// One stage of the ordered listener pipeline invoked after every successful
/// commit. The stage order is a correctness invariant, not a convenience: a
/// failing stage fails the whole commit.
#[async_trait::async_trait]
pub trait CommitListener<S: Store>: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_commit(&self, store: &S, ctx: &mut CommitContext) -> Result<(), OntoError>;
}

/// Writes staged by an open transaction, invisible to every reader until the
/// commit completes.
#[derive(Debug, Default)]
struct StagedWrites {
    concepts: Vec<Concept>,
    descriptions: Vec<Description>,
    relationships: Vec<Relationship>,
    members: Vec<ReferenceSetMember>,
    axioms: Vec<ClassAxiom>,
    deletes: Vec<(ComponentKind, Id)>,
}

impl StagedWrites {
    fn is_empty(&self) -> bool {
        self.concepts.is_empty()
            && self.descriptions.is_empty()
            && self.relationships.is_empty()
            && self.members.is_empty()
            && self.axioms.is_empty()
            && self.deletes.is_empty()
    }
}

/// An open commit: a timestamp, an exclusive lock on the target path, and
/// staged writes. Dropping the transaction without committing discards all
/// writes and releases the lock.
pub struct CommitTransaction {
    commit: Commit,
    branch_before: Branch,
    staged: StagedWrites,
    /// Rebase: the child's new base timestamp (the parent head)
    new_base: Option<Timestamp>,
    /// Promotion: the child branch to fold into the target
    promotion_source: Option<String>,
    /// Extra changed ids supplied by the merge engine so listeners recompute
    /// source-side content
    extra_changed: ChangedComponents,
    _lock: BranchLock,
}

impl CommitTransaction {
    pub fn timestamp(&self) -> Timestamp {
        self.commit.timestamp
    }

    pub fn branch_path(&self) -> &str {
        &self.commit.branch_path
    }

    pub fn upsert_concept(&mut self, concept: Concept) {
        self.staged.concepts.push(concept);
    }

    pub fn upsert_description(&mut self, description: Description) {
        self.staged.descriptions.push(description);
    }

    pub fn upsert_relationship(&mut self, relationship: Relationship) {
        self.staged.relationships.push(relationship);
    }

    pub fn upsert_member(&mut self, member: ReferenceSetMember) {
        self.staged.members.push(member);
    }

    pub fn upsert_axiom(&mut self, axiom: ClassAxiom) {
        self.staged.axioms.push(axiom);
    }

    /// Stage a whole concept aggregate (merge results, manual merges)
    pub fn stage_view(&mut self, view: &ConceptView) {
        self.upsert_concept(view.concept.clone());
        for description in &view.descriptions {
            self.upsert_description(description.description.clone());
            for member in &description.language_members {
                self.upsert_member(member.clone());
            }
        }
        for relationship in &view.relationships {
            self.upsert_relationship(relationship.clone());
        }
        for axiom in &view.axioms {
            self.upsert_axiom(axiom.clone());
        }
    }

    pub fn delete(&mut self, kind: ComponentKind, id: Id) {
        self.staged.deletes.push((kind, id));
    }

    pub fn set_new_base(&mut self, base: Timestamp) {
        self.new_base = Some(base);
    }

    pub fn set_promotion_source(&mut self, path: impl Into<String>) {
        self.promotion_source = Some(path.into());
    }

    pub fn add_changed(&mut self, changed: &ChangedComponents) {
        self.extra_changed.merge(changed);
    }
}

/// Opens commits, flushes staged writes, and runs the fixed listener
/// pipeline: definition-status -> semantic-index -> refset-lookup ->
/// integrity. External stages (audit logging) register after the built-ins.
pub struct CommitManager<S: Store> {
    store: Arc<S>,
    locks: BranchLockManager,
    listeners: Vec<Box<dyn CommitListener<S>>>,
    config: IndexConfig,
}

impl<S: Store> CommitManager<S> {
    pub fn new(store: Arc<S>, config: IndexConfig) -> Self {
        let listeners: Vec<Box<dyn CommitListener<S>>> = vec![
            Box::new(DefinitionStatusUpdater),
            Box::new(SemanticIndexUpdater::new(config.clone())),
            Box::new(RefsetLookupUpdater::new(config.clone())),
            Box::new(IntegrityCheckListener),
        ];
        Self {
            store,
            locks: BranchLockManager::new(),
            listeners,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn locks(&self) -> &BranchLockManager {
        &self.locks
    }

    /// Register an external pipeline stage after the built-in ones
    pub fn register_listener(&mut self, listener: Box<dyn CommitListener<S>>) {
        self.listeners.push(listener);
    }

    /// The fixed stage order; asserted by tests since it is part of the
    /// contract
    pub fn listener_names(&self) -> Vec<&'static str> {
        self.listeners.iter().map(|l| l.name()).collect()
    }

    /// Open a content commit on `path`, acquiring the branch lock fail-fast
    pub async fn open(&self, path: &str, kind: CommitKind) -> Result<CommitTransaction, OntoError> {
        self.open_merge(path, kind, None, 0).await
    }

    /// Open a merge commit: the timestamp is allocated past both heads
    pub async fn open_merge(
        &self,
        path: &str,
        kind: CommitKind,
        source_path: Option<&str>,
        source_head: Timestamp,
    ) -> Result<CommitTransaction, OntoError> {
        let branch = self
            .store
            .load_branch(path)
            .await?
            .ok_or_else(|| OntoError::BranchNotFound {
                path: path.to_string(),
            })?;
        let lock = self.locks.lock_or_fail(path)?;
        let timestamp = allocate_timestamp(branch.head_timestamp, source_head);
        let mut commit = Commit::new(path, timestamp, kind);
        if let Some(source) = source_path {
            commit = commit.with_source(source);
        }
        log::debug!("opened {:?} commit on {} at {}", kind, path, timestamp);
        Ok(CommitTransaction {
            commit,
            branch_before: branch,
            staged: StagedWrites::default(),
            new_base: None,
            promotion_source: None,
            extra_changed: ChangedComponents::new(),
            _lock: lock,
        })
    }

    /// Flush the staged writes, update the branch document and run the
    /// listener pipeline. Any failure rolls every write back; a failed
    /// commit's writes are invisible to all readers.
    pub async fn commit(&self, tx: CommitTransaction) -> Result<Commit, OntoError> {
        let CommitTransaction {
            commit,
            branch_before,
            staged,
            new_base,
            promotion_source,
            extra_changed,
            _lock,
        } = tx;
        let store = self.store.as_ref();
        let ts = commit.timestamp;
        let path = commit.branch_path.clone();
        let criteria_before = branch_criteria(store, &path, None).await?;

        let mut branch = branch_before;
        let mut changed = extra_changed;
        let mut deleted = ChangedComponents::new();

        if let Err(err) = self
            .flush(
                &path,
                ts,
                &criteria_before,
                staged,
                new_base,
                promotion_source.as_deref(),
                &mut branch,
                &mut changed,
                &mut deleted,
            )
            .await
        {
            log::warn!("commit on {} at {} failed, rolling back: {}", path, ts, err);
            self.rollback(&path, promotion_source.as_deref(), ts).await;
            return Err(err);
        }

        // Listener pipeline, in fixed order
        let mut ctx = CommitContext {
            commit,
            changed,
            deleted,
            branch,
        };
        for listener in &self.listeners {
            if let Err(err) = listener.on_commit(store, &mut ctx).await {
                log::warn!(
                    "listener `{}` rejected commit on {}, rolling back: {}",
                    listener.name(),
                    path,
                    err
                );
                self.rollback(&path, promotion_source.as_deref(), ts).await;
                return Err(err);
            }
        }

        // Persist listener metadata mutations into the open branch document
        store.put_branch(ctx.branch.clone()).await?;
        log::info!("committed {:?} on {} at {}", ctx.commit.kind, path, ts);
        Ok(ctx.commit)
    }

    #[allow(clippy::too_many_arguments)]
    async fn flush(
        &self,
        path: &str,
        ts: Timestamp,
        criteria_before: &BranchCriteria,
        staged: StagedWrites,
        new_base: Option<Timestamp>,
        promotion_source: Option<&str>,
        branch: &mut Branch,
        changed: &mut ChangedComponents,
        deleted: &mut ChangedComponents,
    ) -> Result<(), OntoError> {
        let store = self.store.as_ref();
        let wrote_content = !staged.is_empty();
        let StagedWrites {
            concepts,
            descriptions,
            relationships,
            members,
            axioms,
            deletes,
        } = staged;

        flush_kind(store, path, ts, criteria_before, concepts, branch, changed).await?;
        flush_kind(store, path, ts, criteria_before, descriptions, branch, changed).await?;
        flush_kind(store, path, ts, criteria_before, relationships, branch, changed).await?;
        flush_kind(store, path, ts, criteria_before, members, branch, changed).await?;
        flush_kind(store, path, ts, criteria_before, axioms, branch, changed).await?;

        for (kind, id) in deletes {
            let existed =
                delete_component(store, path, ts, criteria_before, kind, &id, branch).await?;
            if existed {
                changed.add(kind, id.clone());
                deleted.add(kind, id);
            }
        }

        // Branch document: head moves, rebase updates the base
        branch.head_timestamp = ts;
        if let Some(base) = new_base {
            branch.base_timestamp = base;
        }
        if wrote_content {
            branch.contains_content = true;
        }
        branch.start = ts;
        branch.end = None;
        store.supersede_branch(branch.clone()).await?;

        // Promotion folds the source branch: its open versions are
        // time-bounded (still valid for historical reads) and the branch
        // resets to an empty, up-to-date state.
        if let Some(source) = promotion_source {
            end_all_open_versions(store, source, ts).await?;
            let mut child =
                store
                    .load_branch(source)
                    .await?
                    .ok_or_else(|| OntoError::BranchNotFound {
                        path: source.to_string(),
                    })?;
            child.base_timestamp = ts;
            child.head_timestamp = ts;
            child.contains_content = false;
            child.versions_replaced.clear();
            child.start = ts;
            child.end = None;
            store.supersede_branch(child).await?;
        }

        Ok(())
    }

    /// Undo every write of a failed commit: new versions vanish, superseded
    /// versions reopen, branch documents restore. Never corrupts state.
    async fn rollback(&self, path: &str, promotion_source: Option<&str>, ts: Timestamp) {
        let store = self.store.as_ref();
        let mut paths = vec![path];
        if let Some(source) = promotion_source {
            paths.push(source);
        }
        for p in paths {
            for kind in ComponentKind::ALL {
                if let Err(e) = store.remove_versions_started_at(p, kind, ts).await {
                    log::error!("rollback failed removing {:?} on {}: {}", kind, p, e);
                }
                if let Err(e) = store.reopen_versions_ended_at(p, kind, ts).await {
                    log::error!("rollback failed reopening {:?} on {}: {}", kind, p, e);
                }
            }
            if let Err(e) = store.rollback_branch_version(p, ts).await {
                log::error!("rollback failed restoring branch {}: {}", p, e);
            }
        }
    }
}

/// Flush one kind of staged component: supersede the visible version, keep
/// the released-identity rules, record replacements of ancestor content.
async fn flush_kind<S: Store, C: Publishable>(
    store: &S,
    path: &str,
    ts: Timestamp,
    criteria_before: &BranchCriteria,
    docs: Vec<C>,
    branch: &mut Branch,
    changed: &mut ChangedComponents,
) -> Result<(), OntoError> {
    if docs.is_empty() {
        return Ok(());
    }
    let ids: Vec<Id> = docs.iter().map(|d| d.doc_id().clone()).collect();
    let existing: Vec<C> = store.find_visible(criteria_before, Some(&ids)).await?;

    let mut prepared = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let prior = existing.iter().find(|e| e.doc_id() == doc.doc_id());
        if let Some(prior) = prior {
            if prior.released() {
                doc.enforce_released(prior);
            }
        }
        let ended = store
            .end_versions(path, C::KIND, &[doc.doc_id().clone()], ts)
            .await?;
        if ended.is_empty() && prior.is_some() {
            // The visible version lives on an ancestor branch: mask it
            branch.record_replaced(C::KIND, doc.doc_id().clone());
        }
        doc.set_start(ts);
        doc.set_end(None);
        changed.add(C::KIND, doc.doc_id().clone());
        prepared.push(doc);
    }
    store.bulk_upsert(path, prepared).await?;
    Ok(())
}

/// Delete one component: end the branch-local version or mask the ancestor
/// one. Returns whether anything was visible to delete.
async fn delete_component<S: Store>(
    store: &S,
    path: &str,
    ts: Timestamp,
    criteria_before: &BranchCriteria,
    kind: ComponentKind,
    id: &Id,
    branch: &mut Branch,
) -> Result<bool, OntoError> {
    let ended = store
        .end_versions(path, kind, std::slice::from_ref(id), ts)
        .await?;
    let ancestor_visible = ancestor_has_version(store, criteria_before, kind, id).await?;
    if ancestor_visible {
        branch.record_replaced(kind, id.clone());
    }
    Ok(!ended.is_empty() || ancestor_visible)
}

async fn ancestor_has_version<S: Store>(
    store: &S,
    criteria: &BranchCriteria,
    kind: ComponentKind,
    id: &Id,
) -> Result<bool, OntoError> {
    // Only the ancestor segments matter here; the branch's own versions are
    // handled by end_versions
    if criteria.segments.len() < 2 {
        return Ok(false);
    }
    let criteria = BranchCriteria {
        segments: criteria.segments[1..].to_vec(),
    };
    let criteria = &criteria;
    let ids = std::slice::from_ref(id);
    let found = match kind {
        ComponentKind::Concept => store
            .find_visible::<Concept>(criteria, Some(ids))
            .await?
            .len(),
        ComponentKind::Description => store
            .find_visible::<Description>(criteria, Some(ids))
            .await?
            .len(),
        ComponentKind::Relationship => store
            .find_visible::<Relationship>(criteria, Some(ids))
            .await?
            .len(),
        ComponentKind::ReferenceSetMember => store
            .find_visible::<ReferenceSetMember>(criteria, Some(ids))
            .await?
            .len(),
        ComponentKind::ClassAxiom => store
            .find_visible::<ClassAxiom>(criteria, Some(ids))
            .await?
            .len(),
        ComponentKind::ClosureEntry => store
            .find_visible::<crate::model::ClosureEntry>(criteria, Some(ids))
            .await?
            .len(),
        ComponentKind::RefsetLookup => store
            .find_visible::<crate::model::RefsetLookup>(criteria, Some(ids))
            .await?
            .len(),
    };
    Ok(found > 0)
}

/// Time-bound every open version on a branch (promotion source fold)
async fn end_all_open_versions<S: Store>(
    store: &S,
    path: &str,
    ts: Timestamp,
) -> Result<(), OntoError> {
    macro_rules! end_kind {
        ($ty:ty) => {{
            let open: Vec<$ty> = store.find_on_branch(path, VersionSelection::Open).await?;
            let ids: Vec<Id> = open.iter().map(|d| d.doc_id().clone()).collect();
            if !ids.is_empty() {
                store
                    .end_versions(path, <$ty as Versioned>::KIND, &ids, ts)
                    .await?;
            }
        }};
    }
    end_kind!(Concept);
    end_kind!(Description);
    end_kind!(Relationship);
    end_kind!(ReferenceSetMember);
    end_kind!(ClassAxiom);
    end_kind!(crate::model::ClosureEntry);
    end_kind!(crate::model::RefsetLookup);
    Ok(())
}
