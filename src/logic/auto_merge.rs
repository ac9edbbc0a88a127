use crate::model::{
    ClassAxiom, Concept, ConceptView, Description, DescriptionView, Id, OntoError, Publishable,
    ReferenceSetMember, Relationship,
};

/// Supplies the pre-authoring snapshot of an entity, fetched at the merge's
/// base timepoint. An explicit capability injected into the merge engine so
/// the auto-merge algorithm itself stays pure and testable in isolation.
#[async_trait::async_trait]
pub trait BaseSnapshotProvider: Send + Sync {
    async fn concept_at_base(&self, concept_id: &str) -> Result<Option<ConceptView>, OntoError>;
}

/// Per scalar field: if the target changed it relative to the base, keep the
/// target's value (local edits are never silently discarded); otherwise take
/// the source's. Without a base snapshot the target keeps authority.
fn pick<T: Clone + PartialEq>(source: &T, target: &T, base: Option<&T>) -> T {
    match base {
        Some(base) if target != base => target.clone(),
        Some(_) => source.clone(),
        None => target.clone(),
    }
}

/// The released snapshot that governs identity fields and release
/// bookkeeping: the candidate with the latest released effective time. The
/// stored base snapshot wins ties over either side, since a side's copy may
/// carry an attempted identity mutation that must not win.
fn release_reference<'a, C: Publishable>(
    source: &'a C,
    target: &'a C,
    base: Option<&'a C>,
) -> Option<&'a C> {
    let mut best: Option<&C> = None;
    for candidate in [base, Some(target), Some(source)].into_iter().flatten() {
        if !candidate.released() {
            continue;
        }
        match best {
            Some(current)
                if current.released_effective_time() >= candidate.released_effective_time() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Whether the source carries a later release than the target knows about
/// (an ancestor published while local edits were pending).
fn source_release_ahead<C: Publishable>(source: &C, target: &C) -> bool {
    source.released() && source.released_effective_time() > target.released_effective_time()
}

macro_rules! merge_field {
    ($merged:ident, $source:ident, $target:ident, $base:ident, $($field:ident),+) => {
        $(
            $merged.$field = pick(
                &$source.$field,
                &$target.$field,
                $base.map(|b| &b.$field),
            );
        )+
    };
}

macro_rules! keep_target_edit {
    ($merged:ident, $target:ident, $base:ident, $($field:ident),+) => {
        $(
            if let Some(base) = $base {
                if $target.$field != base.$field {
                    $merged.$field = $target.$field.clone();
                }
            }
        )+
    };
}

pub fn merge_concept(source: &Concept, target: &Concept, base: Option<&Concept>) -> Concept {
    let mut merged = if source_release_ahead(source, target) {
        // The source's released snapshot becomes the new authoritative base;
        // the target's still-unreleased edits are reapplied on top of it.
        let mut merged = source.clone();
        if target.effective_time.is_none() {
            keep_target_edit!(merged, target, base, module_id, active, defined);
        }
        merged
    } else {
        let mut merged = target.clone();
        merge_field!(merged, source, target, base, module_id, active, defined);
        merged
    };
    if let Some(reference) = release_reference(source, target, base) {
        merged.enforce_released(reference);
    } else {
        merged.effective_time = None;
    }
    merged
}

pub fn merge_description(
    source: &Description,
    target: &Description,
    base: Option<&Description>,
) -> Description {
    let mut merged = if source_release_ahead(source, target) {
        let mut merged = source.clone();
        if target.effective_time.is_none() {
            keep_target_edit!(merged, target, base, module_id, active, term);
        }
        merged
    } else {
        let mut merged = target.clone();
        merge_field!(
            merged,
            source,
            target,
            base,
            module_id,
            active,
            term,
            language_code,
            type_id,
            concept_id
        );
        merged
    };
    if let Some(reference) = release_reference(source, target, base) {
        merged.enforce_released(reference);
    } else {
        merged.effective_time = None;
    }
    merged
}

pub fn merge_relationship(
    source: &Relationship,
    target: &Relationship,
    base: Option<&Relationship>,
) -> Relationship {
    let mut merged = if source_release_ahead(source, target) {
        let mut merged = source.clone();
        if target.effective_time.is_none() {
            keep_target_edit!(merged, target, base, module_id, active, group, characteristic_type);
        }
        merged
    } else {
        let mut merged = target.clone();
        merge_field!(
            merged,
            source,
            target,
            base,
            module_id,
            active,
            group,
            characteristic_type,
            source_id,
            type_id,
            destination_id,
            value
        );
        merged
    };
    if let Some(reference) = release_reference(source, target, base) {
        merged.enforce_released(reference);
    } else {
        merged.effective_time = None;
    }
    merged
}

pub fn merge_member(
    source: &ReferenceSetMember,
    target: &ReferenceSetMember,
    base: Option<&ReferenceSetMember>,
) -> ReferenceSetMember {
    let mut merged = if source_release_ahead(source, target) {
        let mut merged = source.clone();
        if target.effective_time.is_none() {
            keep_target_edit!(merged, target, base, module_id, active, additional_fields);
        }
        merged
    } else {
        let mut merged = target.clone();
        merge_field!(
            merged,
            source,
            target,
            base,
            module_id,
            active,
            refset_id,
            referenced_component_id,
            additional_fields
        );
        merged
    };
    if let Some(reference) = release_reference(source, target, base) {
        merged.enforce_released(reference);
    } else {
        merged.effective_time = None;
    }
    merged
}

pub fn merge_axiom(source: &ClassAxiom, target: &ClassAxiom, base: Option<&ClassAxiom>) -> ClassAxiom {
    let mut merged = if source_release_ahead(source, target) {
        let mut merged = source.clone();
        if target.effective_time.is_none() {
            keep_target_edit!(
                merged,
                target,
                base,
                module_id,
                active,
                defined,
                referenced_concept_ids
            );
        }
        merged
    } else {
        let mut merged = target.clone();
        merge_field!(
            merged,
            source,
            target,
            base,
            module_id,
            active,
            defined,
            concept_id,
            referenced_concept_ids
        );
        merged
    };
    if let Some(reference) = release_reference(source, target, base) {
        merged.enforce_released(reference);
    } else {
        merged.effective_time = None;
    }
    merged
}

/// Merge owned sub-component collections as sets keyed by stable id.
///
/// Ids present on both sides recurse into the per-field algorithm. Ids
/// present on one side only pass through when genuinely new; an id that the
/// base knew and one side dropped is a deletion, accepted unless the other
/// side changed the component (local edits win over a remote deletion, a
/// target deletion wins over remote edits).
fn merge_by_id<C: Clone + PartialEq>(
    source: &[C],
    target: &[C],
    base: &[C],
    id_of: fn(&C) -> &Id,
    merge_fn: fn(&C, &C, Option<&C>) -> C,
) -> Vec<C> {
    let mut ids: Vec<&Id> = Vec::new();
    for item in source.iter().chain(target.iter()) {
        let id = id_of(item);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let mut merged = Vec::new();
    for id in ids {
        let in_source = source.iter().find(|c| id_of(c) == id);
        let in_target = target.iter().find(|c| id_of(c) == id);
        let in_base = base.iter().find(|c| id_of(c) == id);
        match (in_source, in_target) {
            (Some(s), Some(t)) => merged.push(merge_fn(s, t, in_base)),
            (Some(s), None) => match in_base {
                // Deleted on the target; a target deletion holds unless the
                // source never touched it, in which case it holds too
                Some(_) => {}
                None => merged.push(s.clone()),
            },
            (None, Some(t)) => match in_base {
                Some(b) => {
                    // Deleted on the source: local target edits survive,
                    // an untouched component follows the deletion
                    if t != b {
                        merged.push(t.clone());
                    }
                }
                None => merged.push(t.clone()),
            },
            (None, None) => {}
        }
    }
    merged
}

fn merge_description_views(
    source: &[DescriptionView],
    target: &[DescriptionView],
    base: &[DescriptionView],
) -> Vec<DescriptionView> {
    fn id_of(view: &DescriptionView) -> &Id {
        &view.description.id
    }
    fn merge_view(
        source: &DescriptionView,
        target: &DescriptionView,
        base: Option<&DescriptionView>,
    ) -> DescriptionView {
        DescriptionView {
            description: merge_description(
                &source.description,
                &target.description,
                base.map(|b| &b.description),
            ),
            language_members: merge_by_id(
                &source.language_members,
                &target.language_members,
                base.map(|b| b.language_members.as_slice()).unwrap_or(&[]),
                |m| &m.member_id,
                merge_member,
            ),
        }
    }
    merge_by_id(source, target, base, id_of, merge_view)
}

/// Stateless three-way merge of one logical entity with its owned
/// sub-components. `base` is the stored pre-authoring snapshot of the target
/// entity, used to distinguish "target changed this field" from "target left
/// it alone".
pub fn auto_merge(
    source: &ConceptView,
    target: &ConceptView,
    base: Option<&ConceptView>,
) -> ConceptView {
    ConceptView {
        concept: merge_concept(&source.concept, &target.concept, base.map(|b| &b.concept)),
        descriptions: merge_description_views(
            &source.descriptions,
            &target.descriptions,
            base.map(|b| b.descriptions.as_slice()).unwrap_or(&[]),
        ),
        relationships: merge_by_id(
            &source.relationships,
            &target.relationships,
            base.map(|b| b.relationships.as_slice()).unwrap_or(&[]),
            |r| &r.id,
            merge_relationship,
        ),
        axioms: merge_by_id(
            &source.axioms,
            &target.axioms,
            base.map(|b| b.axioms.as_slice()).unwrap_or(&[]),
            |a| &a.id,
            merge_axiom,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConcreteValue;

    fn concept(id: &str) -> Concept {
        Concept::new(id, "core")
    }

    fn view(id: &str) -> ConceptView {
        ConceptView::of(concept(id))
    }

    #[test]
    fn no_op_merge_is_identity_on_the_unchanged_side() {
        let mut base = view("c1");
        base.relationships
            .push(Relationship::is_a("r1", "c1", "root", "core"));

        // Source edited, target untouched
        let mut source = base.clone();
        source.concept.active = false;
        source.relationships[0].group = 2;

        let merged = auto_merge(&source, &base, Some(&base));
        assert_eq!(merged, source);
    }

    #[test]
    fn target_wins_a_two_sided_scalar_conflict() {
        let base = concept("c1");
        let mut source = base.clone();
        source.module_id = "module-source".to_string();
        let mut target = base.clone();
        target.module_id = "module-target".to_string();

        let merged = merge_concept(&source, &target, Some(&base));
        assert_eq!(merged.module_id, "module-target");
    }

    #[test]
    fn untouched_fields_follow_the_source() {
        let base = concept("c1");
        let mut source = base.clone();
        source.active = false;
        let mut target = base.clone();
        target.module_id = "module-target".to_string();

        let merged = merge_concept(&source, &target, Some(&base));
        assert!(!merged.active);
        assert_eq!(merged.module_id, "module-target");
    }

    #[test]
    fn released_identity_fields_survive_any_merge_input() {
        let mut base = Relationship::is_a("r1", "c1", "root", "core");
        base.release(20240101);

        let mut source = base.clone();
        source.destination_id = Some("hijacked".to_string());
        let mut target = base.clone();
        target.group = 3;

        let merged = merge_relationship(&source, &target, Some(&base));
        assert_eq!(merged.destination_id, Some("root".to_string()));
        assert_eq!(merged.group, 3);
        assert!(merged.released);
    }

    #[test]
    fn newer_source_release_becomes_the_base_and_local_edits_reapply() {
        // Target branched before the new release: its base knows the 2024
        // release, the source has since published 2025 with a new module
        let mut base = concept("c1");
        base.release(20240101);

        let mut source = base.clone();
        source.module_id = "module-2025".to_string();
        source.release(20250101);

        // Unreleased local edit on the target
        let mut target = base.clone();
        target.defined = true;
        target.effective_time = None;

        let merged = merge_concept(&source, &target, Some(&base));
        assert_eq!(merged.module_id, "module-2025");
        assert!(merged.defined, "unreleased target edit must survive");
        assert_eq!(merged.released_effective_time, Some(20250101));
        // The merged content differs from the 2025 release, so the stale
        // effective time must not stick
        assert_eq!(merged.effective_time, None);
    }

    #[test]
    fn clean_catch_up_restores_the_new_effective_time() {
        let mut base = concept("c1");
        base.release(20240101);
        let mut source = base.clone();
        source.release(20250101);
        let target = base.clone();

        let merged = merge_concept(&source, &target, Some(&base));
        assert_eq!(merged.effective_time, Some(20250101));
    }

    #[test]
    fn deletion_on_one_side_is_accepted_when_the_other_left_it_alone() {
        let mut base = view("c1");
        base.relationships
            .push(Relationship::is_a("r1", "c1", "root", "core"));
        let mut source = base.clone();
        source.relationships.clear(); // deleted on the source
        let target = base.clone();

        let merged = auto_merge(&source, &target, Some(&base));
        assert!(merged.relationships.is_empty());
    }

    #[test]
    fn target_edits_survive_a_source_side_deletion() {
        let mut base = view("c1");
        base.relationships
            .push(Relationship::is_a("r1", "c1", "root", "core"));
        let mut source = base.clone();
        source.relationships.clear();
        let mut target = base.clone();
        target.relationships[0].group = 5;

        let merged = auto_merge(&source, &target, Some(&base));
        assert_eq!(merged.relationships.len(), 1);
        assert_eq!(merged.relationships[0].group, 5);
    }

    #[test]
    fn new_components_from_either_side_pass_through() {
        let base = view("c1");
        let mut source = base.clone();
        source
            .relationships
            .push(Relationship::is_a("r-source", "c1", "root", "core"));
        let mut target = base.clone();
        target.relationships.push(Relationship::concrete(
            "r-target",
            "c1",
            "strength",
            ConcreteValue::Number(250.0),
            "core",
        ));

        let merged = auto_merge(&source, &target, Some(&base));
        assert_eq!(merged.relationships.len(), 2);
        assert!(merged.relationships.iter().all(|r| !r.released));
    }
}
