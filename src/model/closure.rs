use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ComponentKind, ConcreteValue, Id, Timestamp, Versioned};

/// Attribute value recorded in a closure entry: a destination concept or a
/// concrete literal. Numbers compare by numeric value, not lexical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Concept(Id),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn from_edge(destination_id: Option<&Id>, value: Option<&ConcreteValue>) -> Option<Self> {
        match (destination_id, value) {
            (Some(dest), _) => Some(AttributeValue::Concept(dest.clone())),
            (None, Some(ConcreteValue::Number(n))) => Some(AttributeValue::Number(*n)),
            (None, Some(ConcreteValue::Text(t))) => Some(AttributeValue::Text(t.clone())),
            (None, None) => None,
        }
    }

    /// Range comparison for attribute queries; only values of the same shape
    /// are ordered.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::Number(a), AttributeValue::Number(b)) => a.partial_cmp(b),
            (AttributeValue::Text(a), AttributeValue::Text(b)) => Some(a.cmp(b)),
            (AttributeValue::Concept(a), AttributeValue::Concept(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// One attribute edge as recorded per closure entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFragment {
    pub type_id: Id,
    pub value: AttributeValue,
}

/// Per-branch, per-concept transitive-closure record: the full ancestor-id
/// set plus, per attribute group, the attribute pairs needed to answer
/// attribute-based queries without graph traversal at read time. Stored as a
/// versioned document under the same branch-visibility rules as components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureEntry {
    pub concept_id: Id,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ancestors: BTreeSet<Id>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<i32, Vec<AttributeFragment>>,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl ClosureEntry {
    pub fn new(concept_id: impl Into<Id>) -> Self {
        Self {
            concept_id: concept_id.into(),
            ancestors: BTreeSet::new(),
            attributes: BTreeMap::new(),
            start: 0,
            end: None,
        }
    }

    pub fn has_ancestor(&self, concept_id: &str) -> bool {
        self.ancestors.contains(concept_id)
    }
}

impl Versioned for ClosureEntry {
    const KIND: ComponentKind = ComponentKind::ClosureEntry;

    fn doc_id(&self) -> &Id {
        &self.concept_id
    }
    fn start(&self) -> Timestamp {
        self.start
    }
    fn set_start(&mut self, start: Timestamp) {
        self.start = start;
    }
    fn end(&self) -> Option<Timestamp> {
        self.end
    }
    fn set_end(&mut self, end: Option<Timestamp>) {
        self.end = end;
    }
}

/// Direction of a branch-level lookup delta: INCLUDE adds members visible on
/// this branch not yet reflected by an ancestor branch's lookup; EXCLUDE
/// removes members an ancestor lookup would otherwise expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupDirection {
    Include,
    Exclude,
}

/// Cached membership of one reference set at one branch level. The effective
/// membership of a branch folds its lineage root-to-leaf:
/// `members = (members ∪ include) \ exclude` per level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefsetLookup {
    /// Document id, derived from refset and direction
    pub id: Id,
    pub refset_id: Id,
    pub direction: LookupDirection,
    /// Referenced-component ids, not member uuids
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub member_ids: BTreeSet<Id>,
    pub total: u64,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl RefsetLookup {
    pub fn lookup_id(refset_id: &str, direction: LookupDirection) -> Id {
        let suffix = match direction {
            LookupDirection::Include => "include",
            LookupDirection::Exclude => "exclude",
        };
        format!("{}|{}", refset_id, suffix)
    }

    pub fn new(refset_id: impl Into<Id>, direction: LookupDirection) -> Self {
        let refset_id = refset_id.into();
        Self {
            id: Self::lookup_id(&refset_id, direction),
            refset_id,
            direction,
            member_ids: BTreeSet::new(),
            total: 0,
            start: 0,
            end: None,
        }
    }

    pub fn with_members(mut self, member_ids: BTreeSet<Id>) -> Self {
        self.total = member_ids.len() as u64;
        self.member_ids = member_ids;
        self
    }

    /// Keep the stored total in step with the member set
    pub fn refresh_total(&mut self) {
        self.total = self.member_ids.len() as u64;
    }
}

impl Versioned for RefsetLookup {
    const KIND: ComponentKind = ComponentKind::RefsetLookup;

    fn doc_id(&self) -> &Id {
        &self.id
    }
    fn start(&self) -> Timestamp {
        self.start
    }
    fn set_start(&mut self, start: Timestamp) {
        self.start = start;
    }
    fn end(&self) -> Option<Timestamp> {
        self.end
    }
    fn set_end(&mut self, end: Option<Timestamp>) {
        self.end = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_numerically_not_lexically() {
        let ten = AttributeValue::Number(10.0);
        let nine = AttributeValue::Number(9.0);
        // Lexical order would put "10" before "9"
        assert_eq!(ten.compare(&nine), Some(Ordering::Greater));
    }

    #[test]
    fn mismatched_shapes_do_not_order() {
        let num = AttributeValue::Number(1.0);
        let text = AttributeValue::Text("1".to_string());
        assert_eq!(num.compare(&text), None);
    }

    #[test]
    fn lookup_id_is_stable_per_direction() {
        assert_eq!(
            RefsetLookup::lookup_id("900000000000509007", LookupDirection::Include),
            "900000000000509007|include"
        );
    }
}
