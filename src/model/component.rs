use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{EffectiveTime, Id, Timestamp};

/// Relationship type id of the hierarchy ("IS A") edge
pub const IS_A: &str = "116680003";

/// The kinds of versioned document this store manages. Component kinds are
/// authored content; `ClosureEntry` and `RefsetLookup` are derived index
/// documents that ride the same branch-visibility rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Concept,
    Description,
    Relationship,
    ReferenceSetMember,
    ClassAxiom,
    ClosureEntry,
    RefsetLookup,
}

impl ComponentKind {
    /// Kinds carrying authored content, in the order merges process them
    pub const AUTHORED: [ComponentKind; 5] = [
        ComponentKind::Concept,
        ComponentKind::Description,
        ComponentKind::Relationship,
        ComponentKind::ReferenceSetMember,
        ComponentKind::ClassAxiom,
    ];

    /// Stable string form used as a document-store key
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Concept => "concept",
            ComponentKind::Description => "description",
            ComponentKind::Relationship => "relationship",
            ComponentKind::ReferenceSetMember => "reference_set_member",
            ComponentKind::ClassAxiom => "class_axiom",
            ComponentKind::ClosureEntry => "closure_entry",
            ComponentKind::RefsetLookup => "refset_lookup",
        }
    }

    /// All kinds, including derived index documents
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::Concept,
        ComponentKind::Description,
        ComponentKind::Relationship,
        ComponentKind::ReferenceSetMember,
        ComponentKind::ClassAxiom,
        ComponentKind::ClosureEntry,
        ComponentKind::RefsetLookup,
    ];
}

/// A versioned document: every entity the store manages carries a start/end
/// window on its owning branch.
pub trait Versioned: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: ComponentKind;

    fn doc_id(&self) -> &Id;
    fn start(&self) -> Timestamp;
    fn set_start(&mut self, start: Timestamp);
    fn end(&self) -> Option<Timestamp>;
    fn set_end(&mut self, end: Option<Timestamp>);

    /// Whether this version is visible at `timepoint` on its own branch
    fn visible_at(&self, timepoint: Timestamp) -> bool {
        self.start() <= timepoint && self.end().map_or(true, |e| e > timepoint)
    }
}

/// Release bookkeeping shared by all authored component kinds. Once released,
/// a kind-specific set of identity fields becomes immutable and the component
/// keeps a fingerprint of its released content so a round-tripped edit can
/// restore a stale effective time.
pub trait Publishable: Versioned {
    fn released(&self) -> bool;
    fn effective_time(&self) -> Option<EffectiveTime>;
    fn set_effective_time(&mut self, et: Option<EffectiveTime>);
    fn released_effective_time(&self) -> Option<EffectiveTime>;

    /// Fingerprint over the released field set (identity + mutable content)
    fn release_fingerprint(&self) -> String;

    /// Copy release bookkeeping and restore identity fields from a released
    /// prior version. Identity mutation is silently ignored, never an error:
    /// merges must still complete.
    fn enforce_released(&mut self, prior: &Self);
}

fn sha256_hex(parts: &[&str]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// After an edit, the effective time is cleared unless the content round-trips
/// back to the released state, in which case the released effective time is
/// restored.
fn refresh_effective_time<C: Publishable>(
    component: &mut C,
    release_hash: Option<&str>,
    released_effective_time: Option<EffectiveTime>,
) {
    match release_hash {
        Some(hash) if component.release_fingerprint() == hash => {
            component.set_effective_time(released_effective_time)
        }
        _ => component.set_effective_time(None),
    }
}

// ---------------------------------------------------------------------------
// Concept
// ---------------------------------------------------------------------------

/// A terminology concept. Hierarchy and attributes hang off relationships;
/// the concept itself carries only module, activity and definition status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: Id,
    pub module_id: Id,
    pub active: bool,
    /// Fully defined (from an active defining axiom) vs primitive
    pub defined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<EffectiveTime>,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_effective_time: Option<EffectiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl Concept {
    pub fn new(id: impl Into<Id>, module_id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            module_id: module_id.into(),
            active: true,
            defined: false,
            effective_time: None,
            released: false,
            released_effective_time: None,
            release_hash: None,
            start: 0,
            end: None,
        }
    }

    /// Mark this version as published at `effective_time`, fixing its
    /// identity fields and recording the content fingerprint.
    pub fn release(&mut self, effective_time: EffectiveTime) {
        self.released = true;
        self.effective_time = Some(effective_time);
        self.released_effective_time = Some(effective_time);
        self.release_hash = Some(self.release_fingerprint());
    }
}

impl Versioned for Concept {
    const KIND: ComponentKind = ComponentKind::Concept;

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

impl Publishable for Concept {
    fn released(&self) -> bool {
        self.released
    }
    fn effective_time(&self) -> Option<EffectiveTime> {
        self.effective_time
    }
    fn set_effective_time(&mut self, et: Option<EffectiveTime>) {
        self.effective_time = et;
    }
    fn released_effective_time(&self) -> Option<EffectiveTime> {
        self.released_effective_time
    }

    fn release_fingerprint(&self) -> String {
        sha256_hex(&[
            &self.id,
            &self.module_id,
            &self.active.to_string(),
            &self.defined.to_string(),
        ])
    }

    fn enforce_released(&mut self, prior: &Self) {
        // A concept has no separately-identifying fields beyond its id
        self.released = true;
        self.released_effective_time = prior.released_effective_time;
        self.release_hash = prior.release_hash.clone();
        refresh_effective_time(
            self,
            prior.release_hash.as_deref(),
            prior.released_effective_time,
        );
    }
}

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub id: Id,
    pub concept_id: Id,
    pub module_id: Id,
    pub active: bool,
    pub term: String,
    pub language_code: String,
    pub type_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<EffectiveTime>,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_effective_time: Option<EffectiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl Description {
    pub fn new(
        id: impl Into<Id>,
        concept_id: impl Into<Id>,
        module_id: impl Into<Id>,
        term: impl Into<String>,
        type_id: impl Into<Id>,
    ) -> Self {
        Self {
            id: id.into(),
            concept_id: concept_id.into(),
            module_id: module_id.into(),
            active: true,
            term: term.into(),
            language_code: "en".to_string(),
            type_id: type_id.into(),
            effective_time: None,
            released: false,
            released_effective_time: None,
            release_hash: None,
            start: 0,
            end: None,
        }
    }

    pub fn release(&mut self, effective_time: EffectiveTime) {
        self.released = true;
        self.effective_time = Some(effective_time);
        self.released_effective_time = Some(effective_time);
        self.release_hash = Some(self.release_fingerprint());
    }
}

impl Versioned for Description {
    const KIND: ComponentKind = ComponentKind::Description;

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

impl Publishable for Description {
    fn released(&self) -> bool {
        self.released
    }
    fn effective_time(&self) -> Option<EffectiveTime> {
        self.effective_time
    }
    fn set_effective_time(&mut self, et: Option<EffectiveTime>) {
        self.effective_time = et;
    }
    fn released_effective_time(&self) -> Option<EffectiveTime> {
        self.released_effective_time
    }

    fn release_fingerprint(&self) -> String {
        sha256_hex(&[
            &self.id,
            &self.concept_id,
            &self.module_id,
            &self.active.to_string(),
            &self.term,
            &self.language_code,
            &self.type_id,
        ])
    }

    fn enforce_released(&mut self, prior: &Self) {
        // Identity: owning concept, description type and language
        self.concept_id = prior.concept_id.clone();
        self.type_id = prior.type_id.clone();
        self.language_code = prior.language_code.clone();
        self.released = true;
        self.released_effective_time = prior.released_effective_time;
        self.release_hash = prior.release_hash.clone();
        refresh_effective_time(
            self,
            prior.release_hash.as_deref(),
            prior.released_effective_time,
        );
    }
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicType {
    Stated,
    Inferred,
    Additional,
}

/// Concrete literal carried by an attribute edge instead of a destination
/// concept. Numbers compare by numeric value, not lexical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConcreteValue {
    Number(f64),
    Text(String),
}

impl ConcreteValue {
    pub fn as_fingerprint_part(&self) -> String {
        match self {
            ConcreteValue::Number(n) => format!("#{}", n),
            ConcreteValue::Text(t) => format!("\"{}\"", t),
        }
    }
}

/// A directed edge in the concept graph: IS-A edges define the hierarchy,
/// other types are attributes, optionally carrying a concrete value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Id,
    pub source_id: Id,
    pub type_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ConcreteValue>,
    pub group: i32,
    pub characteristic_type: CharacteristicType,
    pub module_id: Id,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<EffectiveTime>,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_effective_time: Option<EffectiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl Relationship {
    pub fn new(
        id: impl Into<Id>,
        source_id: impl Into<Id>,
        type_id: impl Into<Id>,
        destination_id: impl Into<Id>,
        module_id: impl Into<Id>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            type_id: type_id.into(),
            destination_id: Some(destination_id.into()),
            value: None,
            group: 0,
            characteristic_type: CharacteristicType::Inferred,
            module_id: module_id.into(),
            active: true,
            effective_time: None,
            released: false,
            released_effective_time: None,
            release_hash: None,
            start: 0,
            end: None,
        }
    }

    /// Hierarchy edge `source IS-A destination`
    pub fn is_a(
        id: impl Into<Id>,
        source_id: impl Into<Id>,
        destination_id: impl Into<Id>,
        module_id: impl Into<Id>,
    ) -> Self {
        Self::new(id, source_id, IS_A, destination_id, module_id)
    }

    /// Attribute edge carrying a concrete literal value
    pub fn concrete(
        id: impl Into<Id>,
        source_id: impl Into<Id>,
        type_id: impl Into<Id>,
        value: ConcreteValue,
        module_id: impl Into<Id>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            type_id: type_id.into(),
            destination_id: None,
            value: Some(value),
            group: 0,
            characteristic_type: CharacteristicType::Inferred,
            module_id: module_id.into(),
            active: true,
            effective_time: None,
            released: false,
            released_effective_time: None,
            release_hash: None,
            start: 0,
            end: None,
        }
    }

    pub fn grouped(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    pub fn is_hierarchy_edge(&self) -> bool {
        self.type_id == IS_A
    }

    pub fn release(&mut self, effective_time: EffectiveTime) {
        self.released = true;
        self.effective_time = Some(effective_time);
        self.released_effective_time = Some(effective_time);
        self.release_hash = Some(self.release_fingerprint());
    }
}

impl Versioned for Relationship {
    const KIND: ComponentKind = ComponentKind::Relationship;

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

impl Publishable for Relationship {
    fn released(&self) -> bool {
        self.released
    }
    fn effective_time(&self) -> Option<EffectiveTime> {
        self.effective_time
    }
    fn set_effective_time(&mut self, et: Option<EffectiveTime>) {
        self.effective_time = et;
    }
    fn released_effective_time(&self) -> Option<EffectiveTime> {
        self.released_effective_time
    }

    fn release_fingerprint(&self) -> String {
        sha256_hex(&[
            &self.id,
            &self.source_id,
            &self.type_id,
            self.destination_id.as_deref().unwrap_or(""),
            &self
                .value
                .as_ref()
                .map(|v| v.as_fingerprint_part())
                .unwrap_or_default(),
            &self.group.to_string(),
            &format!("{:?}", self.characteristic_type),
            &self.module_id,
            &self.active.to_string(),
        ])
    }

    fn enforce_released(&mut self, prior: &Self) {
        // Identity: the edge itself (source, type, destination/value)
        self.source_id = prior.source_id.clone();
        self.type_id = prior.type_id.clone();
        self.destination_id = prior.destination_id.clone();
        self.value = prior.value.clone();
        self.released = true;
        self.released_effective_time = prior.released_effective_time;
        self.release_hash = prior.release_hash.clone();
        refresh_effective_time(
            self,
            prior.release_hash.as_deref(),
            prior.released_effective_time,
        );
    }
}

// ---------------------------------------------------------------------------
// Reference-set member
// ---------------------------------------------------------------------------

/// Membership of a referenced component in a named reference set. Additional
/// fields carry refset-specific columns (e.g. acceptability for language
/// reference sets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSetMember {
    pub member_id: Id,
    pub refset_id: Id,
    pub referenced_component_id: Id,
    pub module_id: Id,
    pub active: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<EffectiveTime>,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_effective_time: Option<EffectiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl ReferenceSetMember {
    pub fn new(
        refset_id: impl Into<Id>,
        referenced_component_id: impl Into<Id>,
        module_id: impl Into<Id>,
    ) -> Self {
        Self {
            member_id: crate::model::generate_id(),
            refset_id: refset_id.into(),
            referenced_component_id: referenced_component_id.into(),
            module_id: module_id.into(),
            active: true,
            additional_fields: BTreeMap::new(),
            effective_time: None,
            released: false,
            released_effective_time: None,
            release_hash: None,
            start: 0,
            end: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_fields.insert(key.into(), value.into());
        self
    }

    pub fn release(&mut self, effective_time: EffectiveTime) {
        self.released = true;
        self.effective_time = Some(effective_time);
        self.released_effective_time = Some(effective_time);
        self.release_hash = Some(self.release_fingerprint());
    }
}

impl Versioned for ReferenceSetMember {
    const KIND: ComponentKind = ComponentKind::ReferenceSetMember;

    fn doc_id(&self) -> &Id {
        &self.member_id
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

impl Publishable for ReferenceSetMember {
    fn released(&self) -> bool {
        self.released
    }
    fn effective_time(&self) -> Option<EffectiveTime> {
        self.effective_time
    }
    fn set_effective_time(&mut self, et: Option<EffectiveTime>) {
        self.effective_time = et;
    }
    fn released_effective_time(&self) -> Option<EffectiveTime> {
        self.released_effective_time
    }

    fn release_fingerprint(&self) -> String {
        let fields = self
            .additional_fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";");
        sha256_hex(&[
            &self.member_id,
            &self.refset_id,
            &self.referenced_component_id,
            &self.module_id,
            &self.active.to_string(),
            &fields,
        ])
    }

    fn enforce_released(&mut self, prior: &Self) {
        // Identity: the reference set and the referenced component
        self.refset_id = prior.refset_id.clone();
        self.referenced_component_id = prior.referenced_component_id.clone();
        self.released = true;
        self.released_effective_time = prior.released_effective_time;
        self.release_hash = prior.release_hash.clone();
        refresh_effective_time(
            self,
            prior.release_hash.as_deref(),
            prior.released_effective_time,
        );
    }
}

// ---------------------------------------------------------------------------
// Class axiom
// ---------------------------------------------------------------------------

/// An axiom attached to a concept. OWL translation is out of scope; the store
/// keeps the definition status and the set of referenced concepts so the
/// definition-status stage and the integrity checker can do their jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAxiom {
    pub id: Id,
    pub concept_id: Id,
    pub module_id: Id,
    pub active: bool,
    /// Whether this axiom fully defines the concept
    pub defined: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_concept_ids: Vec<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<EffectiveTime>,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_effective_time: Option<EffectiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl ClassAxiom {
    pub fn new(id: impl Into<Id>, concept_id: impl Into<Id>, module_id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            concept_id: concept_id.into(),
            module_id: module_id.into(),
            active: true,
            defined: false,
            referenced_concept_ids: Vec::new(),
            effective_time: None,
            released: false,
            released_effective_time: None,
            release_hash: None,
            start: 0,
            end: None,
        }
    }

    pub fn defining(mut self) -> Self {
        self.defined = true;
        self
    }

    pub fn referencing(mut self, concept_ids: Vec<Id>) -> Self {
        self.referenced_concept_ids = concept_ids;
        self
    }

    pub fn release(&mut self, effective_time: EffectiveTime) {
        self.released = true;
        self.effective_time = Some(effective_time);
        self.released_effective_time = Some(effective_time);
        self.release_hash = Some(self.release_fingerprint());
    }
}

impl Versioned for ClassAxiom {
    const KIND: ComponentKind = ComponentKind::ClassAxiom;

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

impl Publishable for ClassAxiom {
    fn released(&self) -> bool {
        self.released
    }
    fn effective_time(&self) -> Option<EffectiveTime> {
        self.effective_time
    }
    fn set_effective_time(&mut self, et: Option<EffectiveTime>) {
        self.effective_time = et;
    }
    fn released_effective_time(&self) -> Option<EffectiveTime> {
        self.released_effective_time
    }

    fn release_fingerprint(&self) -> String {
        sha256_hex(&[
            &self.id,
            &self.concept_id,
            &self.module_id,
            &self.active.to_string(),
            &self.defined.to_string(),
            &self.referenced_concept_ids.join(","),
        ])
    }

    fn enforce_released(&mut self, prior: &Self) {
        // Identity: the owning concept
        self.concept_id = prior.concept_id.clone();
        self.released = true;
        self.released_effective_time = prior.released_effective_time;
        self.release_hash = prior.release_hash.clone();
        refresh_effective_time(
            self,
            prior.release_hash.as_deref(),
            prior.released_effective_time,
        );
    }
}

// ---------------------------------------------------------------------------
// Concept aggregate
// ---------------------------------------------------------------------------

/// A description together with its owned language reference-set members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionView {
    pub description: Description,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub language_members: Vec<ReferenceSetMember>,
}

impl DescriptionView {
    pub fn of(description: Description) -> Self {
        Self {
            description,
            language_members: Vec::new(),
        }
    }
}

/// One logical entity as the merge engine sees it: a concept with its owned
/// sub-components. The auto-merger operates on this aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptView {
    pub concept: Concept,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descriptions: Vec<DescriptionView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub axioms: Vec<ClassAxiom>,
}

impl ConceptView {
    pub fn of(concept: Concept) -> Self {
        Self {
            concept,
            descriptions: Vec::new(),
            relationships: Vec::new(),
            axioms: Vec::new(),
        }
    }

    pub fn concept_id(&self) -> &Id {
        &self.concept.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_fixes_fingerprint_and_effective_time() {
        let mut rel = Relationship::is_a("r1", "c1", "c2", "core");
        rel.release(20250101);
        assert!(rel.released);
        assert_eq!(rel.effective_time, Some(20250101));
        assert_eq!(rel.release_hash, Some(rel.release_fingerprint()));
    }

    #[test]
    fn enforce_released_restores_identity_fields() {
        let mut released = Relationship::is_a("r1", "c1", "c2", "core");
        released.release(20250101);

        // Attempt to retarget a released edge; the mutation must be ignored
        let mut edited = released.clone();
        edited.destination_id = Some("c3".to_string());
        edited.enforce_released(&released);

        assert_eq!(edited.destination_id, Some("c2".to_string()));
        // Content round-tripped back to the released state, so the stale
        // effective time is restored
        assert_eq!(edited.effective_time, Some(20250101));
    }

    #[test]
    fn effective_time_cleared_for_genuine_change() {
        let mut released = Relationship::is_a("r1", "c1", "c2", "core");
        released.release(20250101);

        let mut edited = released.clone();
        edited.active = false;
        edited.enforce_released(&released);

        assert_eq!(edited.effective_time, None);
        assert!(edited.released);
    }

    #[test]
    fn kind_serializes_as_snake_case_string() {
        let json = serde_json::to_string(&ComponentKind::ReferenceSetMember).unwrap();
        assert_eq!(json, "\"reference_set_member\"");
    }
}
