use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{ConceptView, Id, Timestamp};

/// Merge request as consumed from an API layer (out of scope): rebase when
/// the source is the target's parent, promotion when the source is the
/// target's child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub source_path: String,
    pub target_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_review_id: Option<Id>,
    /// Manually-merged entities keyed by concept id; used verbatim for
    /// conflicting entities instead of the auto-merger
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub manually_merged_concepts: BTreeMap<Id, ConceptView>,
}

impl MergeRequest {
    pub fn new(source_path: impl Into<String>, target_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            merge_review_id: None,
            manually_merged_concepts: BTreeMap::new(),
        }
    }

    pub fn with_manual_merge(mut self, view: ConceptView) -> Self {
        self.manually_merged_concepts
            .insert(view.concept.id.clone(), view);
        self
    }
}

/// Lifecycle of an asynchronous merge job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Status record of an asynchronous merge. A failed job carries the blocking
/// condition verbatim in its message for operator tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeJob {
    pub id: Id,
    pub source_path: String,
    pub target_path: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MergeJob {
    pub fn new(request: &MergeRequest, now: Timestamp) -> Self {
        Self {
            id: crate::model::generate_id(),
            source_path: request.source_path.clone(),
            target_path: request.target_path.clone(),
            status: JobStatus::Pending,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}
