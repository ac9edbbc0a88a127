use thiserror::Error;

use crate::model::Id;

/// Stable error conditions of the store. Operator-visible failures always
/// name the branch path and the specific condition in the message text, since
/// these surface directly in operator tooling.
#[derive(Debug, Error)]
pub enum OntoError {
    /// Fail-fast lock contention; the caller may retry later
    #[error("branch already locked: {path}")]
    BranchLocked { path: String },

    #[error("branch not found: {path}")]
    BranchNotFound { path: String },

    #[error("branch already exists: {path}")]
    BranchExists { path: String },

    /// Hierarchy cycle found during a normal commit; fatal, non-retryable
    #[error("cyclic hierarchy on branch {path}: concept {concept_id} is its own ancestor via [{}]", .loop_members.join(" -> "))]
    CycleDetected {
        path: String,
        concept_id: Id,
        loop_members: Vec<Id>,
    },

    /// Incremental scans are meaningless where "changed since base" is
    /// unbounded
    #[error("incremental integrity scan is not supported on the root branch {path}; run a full scan instead")]
    RootScanNotSupported { path: String },

    #[error("branch {path} must be rebased before promotion")]
    PromotionRequiresRebase { path: String },

    #[error("branch {path} has integrity issues recorded; promotion is blocked until a clean scan")]
    IntegrityIssuesBlockPromotion { path: String },

    #[error("branch {path} has no unpromoted changes")]
    NothingToPromote { path: String },

    #[error("branches {source_path} and {target_path} are not directly related; merges run between a parent and its child")]
    BranchesNotRelated {
        source_path: String,
        target_path: String,
    },

    #[error("commit listener `{listener}` failed on {path}: {message}")]
    ListenerFailed {
        listener: &'static str,
        path: String,
        message: String,
    },

    /// Document-store failures (infrastructure, not domain conditions)
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl OntoError {
    /// Whether the condition clears on its own or with a simple retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, OntoError::BranchLocked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_message_is_stable_and_names_the_path() {
        let err = OntoError::BranchLocked {
            path: "MAIN/A".to_string(),
        };
        assert_eq!(err.to_string(), "branch already locked: MAIN/A");
        assert!(err.is_retryable());
    }

    #[test]
    fn cycle_message_names_the_loop_members() {
        let err = OntoError::CycleDetected {
            path: "MAIN".to_string(),
            concept_id: "a".to_string(),
            loop_members: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("MAIN"));
        assert!(text.contains("a -> b -> c"));
    }
}
