pub mod auto_merge;
pub mod branch_ops;
pub mod change_report;
pub mod commit;
pub mod definition_status;
pub mod integrity;
pub mod jobs;
pub mod lookup;
pub mod merge;
pub mod semantic_index;
pub mod visibility;

pub use auto_merge::{auto_merge, BaseSnapshotProvider};
pub use branch_ops::{
    branch_state, create_branch, relative_state, update_branch_metadata, BranchLock,
    BranchLockManager, LockAttempt,
};
pub use change_report::{change_report, ChangeReport};
pub use commit::{CommitContext, CommitListener, CommitManager, CommitTransaction};
pub use definition_status::DefinitionStatusUpdater;
pub use integrity::{full_scan, incremental_scan, persisted_report, IntegrityCheckListener};
pub use jobs::MergeJobQueue;
pub use lookup::{refset_members, refset_members_by_scan, RefsetLookupUpdater};
pub use merge::{load_concept_view, promote, rebase, StoreSnapshotProvider};
pub use semantic_index::{ancestors_of, descendants_of, rebuild_branch, SemanticIndexUpdater};
pub use visibility::branch_criteria;
