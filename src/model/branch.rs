use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{parent_path, ComponentKind, Id, Timestamp, ROOT_BRANCH};

/// Metadata key listing branch paths this branch additionally depends on,
/// beyond its direct parent lineage
pub const DEPENDENT_BRANCHES_KEY: &str = "dependentBranches";

/// Prefix of the hidden metadata namespace used by internal pipeline stages
pub const INTERNAL_METADATA_PREFIX: &str = "internal.";

/// Metadata key carrying the persisted incremental integrity report
pub const INTEGRITY_ISSUE_KEY: &str = "internal.integrityIssue";

/// A named, hierarchical line of content history. Branch documents are
/// themselves versioned: every commit supersedes the open document with a new
/// one, so historical reads resolve the branch as it was at any timepoint.
/// Branches are never deleted, only superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Slash-delimited path; ancestors are path prefixes (e.g. `MAIN/A/A1`)
    pub path: String,
    /// Timepoint at which this branch sees its parent (creation or last rebase)
    pub base_timestamp: Timestamp,
    /// Timestamp of the last commit on this branch
    pub head_timestamp: Timestamp,
    pub creation_timestamp: Timestamp,
    /// Whether the branch owns unpromoted component versions
    pub contains_content: bool,
    /// Arbitrary key/value metadata, including the internal namespace and
    /// dependent-branch links
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Per-kind ids whose ancestor-visible versions are superseded on this
    /// branch since its base. Distinguishes "never existed" from "replaced
    /// here", and masks deleted ancestor content.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub versions_replaced: BTreeMap<ComponentKind, BTreeSet<Id>>,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl Branch {
    pub fn new(path: impl Into<String>, base: Timestamp, now: Timestamp) -> Self {
        Self {
            path: path.into(),
            base_timestamp: base,
            head_timestamp: base,
            creation_timestamp: now,
            contains_content: false,
            metadata: BTreeMap::new(),
            versions_replaced: BTreeMap::new(),
            // The first document opens at the base so a grandchild created
            // off an uncommitted branch can still resolve it at that
            // timepoint
            start: base,
            end: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.path == ROOT_BRANCH
    }

    pub fn parent_path(&self) -> Option<&str> {
        parent_path(&self.path)
    }

    pub fn replaced_ids(&self, kind: ComponentKind) -> Option<&BTreeSet<Id>> {
        self.versions_replaced.get(&kind)
    }

    pub fn record_replaced(&mut self, kind: ComponentKind, id: Id) {
        self.versions_replaced.entry(kind).or_default().insert(id);
    }

    /// Whether the persisted incremental integrity report is blocking
    pub fn has_integrity_issue(&self) -> bool {
        self.metadata.contains_key(INTEGRITY_ISSUE_KEY)
    }

    /// Branch paths this branch additionally depends on
    pub fn dependent_branches(&self) -> Vec<String> {
        self.metadata
            .get(DEPENDENT_BRANCHES_KEY)
            .and_then(|v| v.as_array())
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn visible_at(&self, timepoint: Timestamp) -> bool {
        self.start <= timepoint && self.end.map_or(true, |e| e > timepoint)
    }
}

/// Derived branch state, computed by comparing head/base timestamps against
/// the parent; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    UpToDate,
    /// Local unpromoted changes only
    Forward,
    /// Parent has unpromoted changes only
    Behind,
    /// Both sides have unpromoted changes
    Diverged,
}

impl BranchState {
    pub fn derive(forward: bool, behind: bool) -> Self {
        match (forward, behind) {
            (true, true) => BranchState::Diverged,
            (true, false) => BranchState::Forward,
            (false, true) => BranchState::Behind,
            (false, false) => BranchState::UpToDate,
        }
    }
}

/// One lineage segment of a visibility criteria: component versions on
/// `path` whose window covers `max_timestamp` and whose id is not masked by a
/// descendant branch's `versions_replaced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaSegment {
    pub path: String,
    pub max_timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub masked: BTreeMap<ComponentKind, BTreeSet<Id>>,
}

impl CriteriaSegment {
    pub fn is_masked(&self, kind: ComponentKind, id: &str) -> bool {
        self.masked.get(&kind).map_or(false, |ids| ids.contains(id))
    }
}

/// Reusable visibility criteria for one branch at one timepoint: the lineage
/// segments in nearest-first order. A version is visible when the first
/// segment matching its branch admits it; versions from nearer segments
/// shadow ancestor versions of the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCriteria {
    pub segments: Vec<CriteriaSegment>,
}

impl BranchCriteria {
    /// The branch this criteria was built for
    pub fn path(&self) -> &str {
        &self.segments[0].path
    }

    /// The timepoint of the branch's own segment
    pub fn timepoint(&self) -> Timestamp {
        self.segments[0].max_timestamp
    }

    /// Restrict the criteria to the branch's own segment, hiding all
    /// ancestor content (branch-local reads)
    pub fn local_only(&self) -> BranchCriteria {
        BranchCriteria {
            segments: vec![self.segments[0].clone()],
        }
    }
}
