mod common;

use std::collections::BTreeMap;

use common::{commit_concept, seeded};
use ontodb::seed::CORE_MODULE;
use ontodb::store::traits::{BranchStore, ComponentStore};
use ontodb::{
    ancestors_of, branch_criteria, create_branch, descendants_of, rebuild_branch,
    AttributeValue, ClosureEntry, CommitKind, Concept, ConcreteValue, OntoError, Relationship,
};

#[tokio::test]
async fn closure_matches_the_hierarchy_after_seeding() {
    let (store, _, ontology) = seeded().await;

    let ancestors = ancestors_of(store.as_ref(), "MAIN", &ontology.fracture)
        .await
        .unwrap();
    assert!(ancestors.contains(&ontology.disease));
    assert!(ancestors.contains(&ontology.clinical_finding));
    assert!(ancestors.contains(&ontology.root));
    assert!(!ancestors.contains(&ontology.bone));

    let descendants = descendants_of(store.as_ref(), "MAIN", &ontology.clinical_finding)
        .await
        .unwrap();
    assert!(descendants.contains(&ontology.disease));
    assert!(descendants.contains(&ontology.fracture));
}

#[tokio::test]
async fn adding_an_edge_propagates_to_descendants() {
    let (store, manager, ontology) = seeded().await;

    // New mid-level concept under disease, then a child below it
    commit_concept(&manager, "MAIN", "mid", &ontology.disease)
        .await
        .unwrap();
    commit_concept(&manager, "MAIN", "leaf", "mid").await.unwrap();

    // Give `mid` a second parent; the leaf must inherit the new ancestry
    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    tx.upsert_relationship(Relationship::is_a(
        "r-mid-2",
        "mid",
        ontology.body_structure.clone(),
        CORE_MODULE,
    ));
    manager.commit(tx).await.unwrap();

    let leaf = ancestors_of(store.as_ref(), "MAIN", "leaf").await.unwrap();
    assert!(leaf.contains(&ontology.body_structure));
    assert!(leaf.contains(&ontology.disease));
}

#[tokio::test]
async fn removing_one_parent_retains_ancestry_via_the_other() {
    let (store, manager, ontology) = seeded().await;

    // Two parents, both ultimately under the root
    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    tx.upsert_concept(Concept::new("dual", CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a(
        "r-dual-1",
        "dual",
        ontology.disease.clone(),
        CORE_MODULE,
    ));
    tx.upsert_relationship(Relationship::is_a(
        "r-dual-2",
        "dual",
        ontology.bone.clone(),
        CORE_MODULE,
    ));
    manager.commit(tx).await.unwrap();

    let ancestors = ancestors_of(store.as_ref(), "MAIN", "dual").await.unwrap();
    assert!(ancestors.contains(&ontology.disease));
    assert!(ancestors.contains(&ontology.bone));
    assert!(ancestors.contains(&ontology.root));

    // Deactivate the disease edge: the root stays reachable via bone
    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    let criteria = branch_criteria(store.as_ref(), "MAIN", None).await.unwrap();
    let ids = vec!["r-dual-1".to_string()];
    let mut edge = store
        .find_visible::<Relationship>(&criteria, Some(&ids))
        .await
        .unwrap()
        .remove(0);
    edge.active = false;
    tx.upsert_relationship(edge);
    manager.commit(tx).await.unwrap();

    let ancestors = ancestors_of(store.as_ref(), "MAIN", "dual").await.unwrap();
    assert!(!ancestors.contains(&ontology.disease));
    assert!(ancestors.contains(&ontology.bone));
    assert!(
        ancestors.contains(&ontology.root),
        "an ancestor reachable via another path must be retained"
    );
}

#[tokio::test]
async fn cycle_in_a_content_commit_fails_and_rolls_back() {
    let (store, manager, _) = seeded().await;
    let head_before = store
        .load_branch("MAIN")
        .await
        .unwrap()
        .unwrap()
        .head_timestamp;

    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    for id in ["cyc-a", "cyc-b", "cyc-c"] {
        tx.upsert_concept(Concept::new(id, CORE_MODULE));
    }
    tx.upsert_relationship(Relationship::is_a("r-ab", "cyc-a", "cyc-b", CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a("r-bc", "cyc-b", "cyc-c", CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a("r-ca", "cyc-c", "cyc-a", CORE_MODULE));

    let err = manager.commit(tx).await.unwrap_err();
    match &err {
        OntoError::CycleDetected { loop_members, .. } => {
            for id in ["cyc-a", "cyc-b", "cyc-c"] {
                assert!(
                    loop_members.contains(&id.to_string()),
                    "cycle must name {}, got {:?}",
                    id,
                    loop_members
                );
            }
        }
        other => panic!("expected a cycle error, got {}", other),
    }
    assert!(err.to_string().contains("MAIN"));

    // The failed commit is invisible: writes rolled back, head unchanged
    let criteria = branch_criteria(store.as_ref(), "MAIN", None).await.unwrap();
    let ids = vec!["cyc-a".to_string()];
    let ghosts = store
        .find_visible::<Concept>(&criteria, Some(&ids))
        .await
        .unwrap();
    assert!(ghosts.is_empty(), "a failed commit must leave no writes behind");
    let head_after = store
        .load_branch("MAIN")
        .await
        .unwrap()
        .unwrap()
        .head_timestamp;
    assert_eq!(head_before, head_after);
}

#[tokio::test]
async fn merge_driven_cycle_is_tolerated_and_self_heals() {
    let (store, manager, ontology) = seeded().await;

    // Two concepts with no edges between them yet
    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    tx.upsert_concept(Concept::new("left", CORE_MODULE));
    tx.upsert_concept(Concept::new("right", CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a(
        "r-left-root",
        "left",
        ontology.root.clone(),
        CORE_MODULE,
    ));
    tx.upsert_relationship(Relationship::is_a(
        "r-right-root",
        "right",
        ontology.root.clone(),
        CORE_MODULE,
    ));
    manager.commit(tx).await.unwrap();

    create_branch(store.as_ref(), "MAIN/A").await.unwrap();

    // Individually valid on each side, cyclic in union
    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    tx.upsert_relationship(Relationship::is_a("r-lr", "left", "right", CORE_MODULE));
    manager.commit(tx).await.unwrap();

    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    tx.upsert_relationship(Relationship::is_a("r-rl", "right", "left", CORE_MODULE));
    manager.commit(tx).await.unwrap();

    // The rebase unions both edges; it must not raise
    ontodb::rebase(&manager, "MAIN", "MAIN/A", &BTreeMap::new())
        .await
        .expect("a transient merge cycle must not fail the rebase");

    // A subsequent edit removes the local edge and the index converges
    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    let criteria = branch_criteria(store.as_ref(), "MAIN/A", None).await.unwrap();
    let ids = vec!["r-rl".to_string()];
    let mut edge = store
        .find_visible::<Relationship>(&criteria, Some(&ids))
        .await
        .unwrap()
        .remove(0);
    edge.active = false;
    tx.upsert_relationship(edge);
    manager.commit(tx).await.unwrap();

    let left = ancestors_of(store.as_ref(), "MAIN/A", "left").await.unwrap();
    assert!(left.contains("right"));
    let right = ancestors_of(store.as_ref(), "MAIN/A", "right").await.unwrap();
    assert!(!right.contains("left"));
}

#[tokio::test]
async fn attribute_edges_are_recorded_with_numeric_values() {
    let (store, manager, ontology) = seeded().await;

    let mut tx = manager.open("MAIN", CommitKind::Content).await.unwrap();
    tx.upsert_concept(Concept::new("tablet", CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a(
        "r-tablet",
        "tablet",
        ontology.root.clone(),
        CORE_MODULE,
    ));
    tx.upsert_relationship(
        Relationship::concrete(
            "r-strength",
            "tablet",
            "strength",
            ConcreteValue::Number(10.0),
            CORE_MODULE,
        )
        .grouped(1),
    );
    manager.commit(tx).await.unwrap();

    let criteria = branch_criteria(store.as_ref(), "MAIN", None).await.unwrap();
    let ids = vec!["tablet".to_string()];
    let entry = store
        .find_visible::<ClosureEntry>(&criteria, Some(&ids))
        .await
        .unwrap()
        .remove(0);
    let fragments = entry.attributes.get(&1).expect("group 1 recorded");
    let value = &fragments[0].value;
    assert_eq!(value, &AttributeValue::Number(10.0));
    // Numeric, not lexical: 10 orders above 9
    assert_eq!(
        value.compare(&AttributeValue::Number(9.0)),
        Some(std::cmp::Ordering::Greater)
    );
}

#[tokio::test]
async fn rebuild_converges_to_the_incremental_result() {
    let (store, manager, ontology) = seeded().await;
    commit_concept(&manager, "MAIN", "extra", &ontology.fracture)
        .await
        .unwrap();

    let incremental = ancestors_of(store.as_ref(), "MAIN", "extra").await.unwrap();
    let written = rebuild_branch(store.as_ref(), manager.config(), "MAIN")
        .await
        .unwrap();
    assert!(written > 0);
    let rebuilt = ancestors_of(store.as_ref(), "MAIN", "extra").await.unwrap();
    assert_eq!(incremental, rebuilt);
}
