use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Id, Timestamp};

/// Kind of referential-integrity failure: which leg of a relationship or
/// axiom points at a missing or inactive concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    MissingOrInactiveSource,
    MissingOrInactiveType,
    MissingOrInactiveDestination,
    MissingOrInactiveAxiomReference,
}

/// Report of referential-integrity issues on one branch, partitioned by
/// issue kind. Each entry maps the offending component id to the concept id
/// it failed to resolve. Empty when the branch is clean.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub branch_path: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub issues: BTreeMap<IssueKind, BTreeMap<Id, Id>>,
}

impl IntegrityReport {
    pub fn new(branch_path: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            branch_path: branch_path.into(),
            timestamp,
            issues: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, kind: IssueKind, component_id: Id, referenced_concept_id: Id) {
        self.issues
            .entry(kind)
            .or_default()
            .insert(component_id, referenced_concept_id);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.values().all(|m| m.is_empty())
    }

    pub fn issue_count(&self) -> usize {
        self.issues.values().map(|m| m.len()).sum()
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = (&Id, &Id)> {
        self.issues.get(&kind).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_counts_zero() {
        let report = IntegrityReport::new("MAIN/A", 1);
        assert!(report.is_empty());
        assert_eq!(report.issue_count(), 0);
    }

    #[test]
    fn issues_group_by_kind() {
        let mut report = IntegrityReport::new("MAIN/A", 1);
        report.add(
            IssueKind::MissingOrInactiveDestination,
            "r1".to_string(),
            "gone".to_string(),
        );
        report.add(
            IssueKind::MissingOrInactiveDestination,
            "r2".to_string(),
            "gone".to_string(),
        );
        assert_eq!(report.issue_count(), 2);
        assert_eq!(
            report
                .issues_of(IssueKind::MissingOrInactiveDestination)
                .count(),
            2
        );
    }
}
