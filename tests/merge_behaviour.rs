mod common;

use std::collections::BTreeMap;

use common::{commit_concept, seeded};
use ontodb::seed::CORE_MODULE;
use ontodb::store::traits::{BranchStore, ComponentStore};
use ontodb::{
    branch_criteria, create_branch, full_scan, incremental_scan, load_concept_view,
    update_branch_metadata, CommitKind, ComponentKind, Concept, ConceptView, Description,
    OntoError, Relationship, INTEGRITY_ISSUE_KEY,
};

async fn visible_concept(store: &ontodb::MemoryStore, path: &str, id: &str) -> Option<Concept> {
    let criteria = branch_criteria(store, path, None).await.unwrap();
    let ids = vec![id.to_string()];
    store
        .find_visible::<Concept>(&criteria, Some(&ids))
        .await
        .unwrap()
        .into_iter()
        .next()
}

#[tokio::test]
async fn conflicting_scalar_edits_resolve_in_favour_of_the_target() {
    let (store, manager, ontology) = seeded().await;
    create_branch(store.as_ref(), "MAIN/A").await.unwrap();

    // Both sides change the same concept's module differently
    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    let mut on_main = visible_concept(store.as_ref(), "MAIN", &ontology.fracture)
        .await
        .unwrap();
    on_main.module_id = "module-parent".to_string();
    tx.upsert_concept(on_main);
    manager.commit(tx).await.unwrap();

    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    let mut on_child = visible_concept(store.as_ref(), "MAIN/A", &ontology.fracture)
        .await
        .unwrap();
    on_child.module_id = "module-child".to_string();
    tx.upsert_concept(on_child);
    manager.commit(tx).await.unwrap();

    ontodb::rebase(&manager, "MAIN", "MAIN/A", &BTreeMap::new())
        .await
        .unwrap();

    let merged = visible_concept(store.as_ref(), "MAIN/A", &ontology.fracture)
        .await
        .unwrap();
    assert_eq!(
        merged.module_id, "module-child",
        "the branch being rebased onto keeps authority over its own edits"
    );
    // The parent's copy is untouched by the child's rebase
    let parent = visible_concept(store.as_ref(), "MAIN", &ontology.fracture)
        .await
        .unwrap();
    assert_eq!(parent.module_id, "module-parent");
}

#[tokio::test]
async fn one_sided_parent_changes_flow_through_without_conflict() {
    let (store, manager, ontology) = seeded().await;
    create_branch(store.as_ref(), "MAIN/A").await.unwrap();

    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    let mut on_main = visible_concept(store.as_ref(), "MAIN", &ontology.disease)
        .await
        .unwrap();
    on_main.active = false;
    tx.upsert_concept(on_main);
    manager.commit(tx).await.unwrap();

    commit_concept(&manager, "MAIN/A", "local-only", &ontology.bone)
        .await
        .unwrap();

    ontodb::rebase(&manager, "MAIN", "MAIN/A", &BTreeMap::new())
        .await
        .unwrap();

    let disease = visible_concept(store.as_ref(), "MAIN/A", &ontology.disease)
        .await
        .unwrap();
    assert!(!disease.active, "parent-side change must arrive unchanged");
    assert!(visible_concept(store.as_ref(), "MAIN/A", "local-only")
        .await
        .is_some());
}

#[tokio::test]
async fn manually_merged_entities_are_taken_verbatim() {
    let (store, manager, ontology) = seeded().await;
    create_branch(store.as_ref(), "MAIN/A").await.unwrap();

    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    let mut on_main = visible_concept(store.as_ref(), "MAIN", &ontology.fracture)
        .await
        .unwrap();
    on_main.module_id = "module-parent".to_string();
    tx.upsert_concept(on_main);
    manager.commit(tx).await.unwrap();

    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    let mut on_child = visible_concept(store.as_ref(), "MAIN/A", &ontology.fracture)
        .await
        .unwrap();
    on_child.module_id = "module-child".to_string();
    tx.upsert_concept(on_child);
    manager.commit(tx).await.unwrap();

    // An operator supplies the resolution by hand
    let mut manual = visible_concept(store.as_ref(), "MAIN/A", &ontology.fracture)
        .await
        .unwrap();
    manual.module_id = "module-manual".to_string();
    let manual_view = ConceptView::of(manual);
    let merges = BTreeMap::from([(ontology.fracture.clone(), manual_view)]);

    ontodb::rebase(&manager, "MAIN", "MAIN/A", &merges)
        .await
        .unwrap();

    let merged = visible_concept(store.as_ref(), "MAIN/A", &ontology.fracture)
        .await
        .unwrap();
    assert_eq!(merged.module_id, "module-manual");
}

#[tokio::test]
async fn a_parent_side_deletion_wins_without_a_manual_replacement() {
    let (store, manager, ontology) = seeded().await;

    // A branch-local concept promoted up, then edited on one side and
    // deleted on the other
    create_branch(store.as_ref(), "MAIN/A").await.unwrap();
    commit_concept(&manager, "MAIN/A", "doomed", &ontology.disease)
        .await
        .unwrap();
    ontodb::promote(&manager, "MAIN/A", "MAIN").await.unwrap();

    create_branch(store.as_ref(), "MAIN/B").await.unwrap();
    let mut tx = manager.open("MAIN/B", CommitKind::Content).await.unwrap();
    let mut edited = visible_concept(store.as_ref(), "MAIN/B", "doomed")
        .await
        .unwrap();
    edited.module_id = "module-edited".to_string();
    tx.upsert_concept(edited);
    manager.commit(tx).await.unwrap();

    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    tx.delete(ComponentKind::Concept, "doomed".to_string());
    tx.delete(ComponentKind::Relationship, "r-doomed".to_string());
    manager.commit(tx).await.unwrap();

    ontodb::rebase(&manager, "MAIN", "MAIN/B", &BTreeMap::new())
        .await
        .unwrap();

    assert!(
        visible_concept(store.as_ref(), "MAIN/B", "doomed")
            .await
            .is_none(),
        "absence of a manual replacement accepts the deletion"
    );
}

#[tokio::test]
async fn merged_aggregates_union_sub_components_from_both_sides() {
    let (store, manager, ontology) = seeded().await;
    create_branch(store.as_ref(), "MAIN/A").await.unwrap();

    // The parent adds a description, the child adds a relationship
    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    tx.upsert_description(Description::new(
        "d-parent-syn",
        ontology.fracture.clone(),
        CORE_MODULE,
        "Broken bone",
        ontodb::seed::FSN_TYPE,
    ));
    manager.commit(tx).await.unwrap();

    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    tx.upsert_relationship(
        Relationship::new(
            "r-child-site",
            ontology.fracture.clone(),
            ontology.finding_site.clone(),
            ontology.body_structure.clone(),
            CORE_MODULE,
        )
        .grouped(2),
    );
    manager.commit(tx).await.unwrap();

    ontodb::rebase(&manager, "MAIN", "MAIN/A", &BTreeMap::new())
        .await
        .unwrap();

    let criteria = branch_criteria(store.as_ref(), "MAIN/A", None).await.unwrap();
    let view = load_concept_view(store.as_ref(), &criteria, &ontology.fracture)
        .await
        .unwrap()
        .unwrap();
    assert!(view
        .descriptions
        .iter()
        .any(|d| d.description.id == "d-parent-syn"));
    assert!(view.relationships.iter().any(|r| r.id == "r-child-site"));
}

#[tokio::test]
async fn integrity_flag_blocks_promotion_until_a_clean_scan() {
    let (store, manager, ontology) = seeded().await;
    create_branch(store.as_ref(), "MAIN/A").await.unwrap();
    update_branch_metadata(
        store.as_ref(),
        "MAIN/A",
        BTreeMap::from([("reviewer".to_string(), serde_json::json!("dr-lin"))]),
        &[],
    )
    .await
    .unwrap();

    // A dangling edge: its destination does not exist anywhere
    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    tx.upsert_concept(Concept::new("orphan", CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a(
        "r-orphan",
        "orphan",
        "no-such-concept",
        CORE_MODULE,
    ));
    manager.commit(tx).await.unwrap();

    let branch = store.load_branch("MAIN/A").await.unwrap().unwrap();
    assert!(branch.has_integrity_issue());
    // The hidden flag coexists with operator metadata
    assert_eq!(
        branch.metadata.get("reviewer"),
        Some(&serde_json::json!("dr-lin"))
    );

    let err = ontodb::promote(&manager, "MAIN/A", "MAIN").await.unwrap_err();
    assert!(matches!(
        err,
        OntoError::IntegrityIssuesBlockPromotion { .. }
    ));

    // Repair the edge; the next commit clears the flag automatically
    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    let criteria = branch_criteria(store.as_ref(), "MAIN/A", None).await.unwrap();
    let ids = vec!["r-orphan".to_string()];
    let mut edge = store
        .find_visible::<Relationship>(&criteria, Some(&ids))
        .await
        .unwrap()
        .remove(0);
    edge.destination_id = Some(ontology.disease.clone());
    tx.upsert_relationship(edge);
    manager.commit(tx).await.unwrap();

    let branch = store.load_branch("MAIN/A").await.unwrap().unwrap();
    assert!(!branch.metadata.contains_key(INTEGRITY_ISSUE_KEY));
    assert_eq!(
        branch.metadata.get("reviewer"),
        Some(&serde_json::json!("dr-lin"))
    );

    ontodb::promote(&manager, "MAIN/A", "MAIN").await.unwrap();
}

#[tokio::test]
async fn incremental_scan_refuses_the_root_branch() {
    let (store, _, _) = seeded().await;
    let err = incremental_scan(store.as_ref(), "MAIN").await.unwrap_err();
    assert!(matches!(err, OntoError::RootScanNotSupported { .. }));
    assert!(err.to_string().contains("MAIN"));
    assert!(err.to_string().contains("full scan"));
}

#[tokio::test]
async fn full_scan_reports_dangling_references_by_kind() {
    let (store, manager, _) = seeded().await;
    assert!(full_scan(store.as_ref(), "MAIN", None).await.unwrap().is_empty());

    create_branch(store.as_ref(), "MAIN/A").await.unwrap();
    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    tx.upsert_concept(Concept::new("orphan", CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a(
        "r-orphan",
        "orphan",
        "no-such-concept",
        CORE_MODULE,
    ));
    manager.commit(tx).await.unwrap();

    let report = full_scan(store.as_ref(), "MAIN/A", None).await.unwrap();
    assert!(!report.is_empty());
    let dangling: Vec<_> = report
        .issues_of(ontodb::IssueKind::MissingOrInactiveDestination)
        .collect();
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[0].0, "r-orphan");
    assert_eq!(dangling[0].1, "no-such-concept");

    // The incremental scan agrees on the branch's own changes
    let incremental = incremental_scan(store.as_ref(), "MAIN/A").await.unwrap();
    assert_eq!(incremental.issue_count(), report.issue_count());
}
