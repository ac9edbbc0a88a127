//! Branch-versioned content store for a clinical terminology graph.
//!
//! Authoring teams edit overlapping subsets of the concept graph on named,
//! hierarchical branches; changes rebase from parent to child and promote
//! from child to parent with git-like semantics. Every commit, rebase and
//! promotion passes through one ordered pipeline of listeners that keeps the
//! derived structures consistent: definition status, the transitive-closure
//! semantic index, cached reference-set lookups and the referential-
//! integrity report all ride the same branch-visibility rules.

pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use config::{AppConfig, IndexConfig, StoreConfig};
pub use logic::{
    ancestors_of, auto_merge, branch_criteria, branch_state, change_report, create_branch,
    descendants_of, full_scan, incremental_scan, load_concept_view, promote, rebase,
    rebuild_branch, refset_members, refset_members_by_scan, relative_state,
    update_branch_metadata, BaseSnapshotProvider, BranchLockManager, ChangeReport,
    CommitContext, CommitListener, CommitManager, CommitTransaction, LockAttempt, MergeJobQueue,
};
pub use model::*;
pub use store::{MemoryStore, PostgresStore, Store};

/// Initialize logging with INFO level unless overridden by the environment
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
