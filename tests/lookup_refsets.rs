mod common;

use std::collections::BTreeMap;

use common::{manager_with, seeded};
use ontodb::seed::{seed_demo_ontology, CORE_MODULE};
use ontodb::store::traits::{BranchStore, QueryStore};
use ontodb::{
    branch_criteria, create_branch, refset_members, refset_members_by_scan, CommitKind,
    IndexConfig, MemoryStore, ReferenceSetMember,
};

const REFSET: &str = "rs-problem-list";

async fn add_members(
    manager: &ontodb::CommitManager<MemoryStore>,
    path: &str,
    referenced: &[&str],
) {
    let mut tx = manager.open(path, CommitKind::Content).await.unwrap();
    for id in referenced {
        tx.upsert_member(ReferenceSetMember::new(REFSET, *id, CORE_MODULE));
    }
    manager.commit(tx).await.unwrap();
}

async fn member_doc(
    store: &MemoryStore,
    path: &str,
    referenced: &str,
) -> Option<ReferenceSetMember> {
    let criteria = branch_criteria(store, path, None).await.unwrap();
    store
        .find_members_by_refset(&criteria, REFSET)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.referenced_component_id == referenced)
}

/// Lookup and scan must agree everywhere; asserts and returns the set
async fn assert_paths_agree(
    store: &MemoryStore,
    path: &str,
) -> std::collections::BTreeSet<String> {
    let looked_up = refset_members(store, path, REFSET, None).await.unwrap();
    let scanned = refset_members_by_scan(store, path, REFSET, None).await.unwrap();
    assert_eq!(
        looked_up, scanned,
        "materialized lookup and direct scan disagree on {}",
        path
    );
    looked_up
}

#[tokio::test]
async fn below_threshold_queries_fall_back_to_scanning() {
    let (store, manager, ontology) = seeded().await;
    add_members(&manager, "MAIN", &[&ontology.fracture, &ontology.disease]).await;

    // Default threshold (50) far above two members: no lookup document
    let criteria = branch_criteria(store.as_ref(), "MAIN", None).await.unwrap();
    assert!(store
        .find_lookups(&criteria, REFSET)
        .await
        .unwrap()
        .is_empty());

    let members = assert_paths_agree(store.as_ref(), "MAIN").await;
    assert_eq!(members.len(), 2);
}

#[tokio::test]
async fn crossing_the_threshold_materializes_the_lookup() {
    let config = IndexConfig {
        lookup_member_threshold: 3,
        ..IndexConfig::default()
    };
    let (store, manager) = manager_with(config);
    let ontology = seed_demo_ontology(&manager).await.unwrap();

    add_members(
        &manager,
        "MAIN",
        &[&ontology.fracture, &ontology.disease, &ontology.bone],
    )
    .await;

    let criteria = branch_criteria(store.as_ref(), "MAIN", None).await.unwrap();
    let levels = store.find_lookups(&criteria, REFSET).await.unwrap();
    assert_eq!(levels.len(), 1, "lookup must materialize at the threshold");
    assert_eq!(
        levels[0].include.as_ref().unwrap().member_ids.len(),
        3
    );

    let members = assert_paths_agree(store.as_ref(), "MAIN").await;
    assert_eq!(members.len(), 3);
}

#[tokio::test]
async fn branch_deltas_layer_over_the_ancestor_lookup() {
    let config = IndexConfig {
        lookup_member_threshold: 2,
        ..IndexConfig::default()
    };
    let (store, manager) = manager_with(config);
    let ontology = seed_demo_ontology(&manager).await.unwrap();
    add_members(&manager, "MAIN", &[&ontology.fracture, &ontology.disease]).await;

    create_branch(store.as_ref(), "MAIN/A").await.unwrap();

    // Child removes one member and adds another
    let mut doc = member_doc(store.as_ref(), "MAIN/A", &ontology.fracture)
        .await
        .unwrap();
    doc.active = false;
    let mut tx = manager.open("MAIN/A", CommitKind::Content).await.unwrap();
    tx.upsert_member(doc);
    tx.upsert_member(ReferenceSetMember::new(REFSET, ontology.bone.clone(), CORE_MODULE));
    manager.commit(tx).await.unwrap();

    let child = assert_paths_agree(store.as_ref(), "MAIN/A").await;
    assert!(!child.contains(&ontology.fracture));
    assert!(child.contains(&ontology.disease));
    assert!(child.contains(&ontology.bone));

    // The parent stays untouched
    let parent = assert_paths_agree(store.as_ref(), "MAIN").await;
    assert!(parent.contains(&ontology.fracture));
    assert!(!parent.contains(&ontology.bone));
}

#[tokio::test]
async fn promotion_folds_the_child_lookup_into_the_parent() {
    let config = IndexConfig {
        lookup_member_threshold: 2,
        ..IndexConfig::default()
    };
    let (store, manager) = manager_with(config);
    let ontology = seed_demo_ontology(&manager).await.unwrap();
    add_members(&manager, "MAIN", &[&ontology.fracture, &ontology.disease]).await;

    create_branch(store.as_ref(), "MAIN/A").await.unwrap();
    add_members(&manager, "MAIN/A", &[&ontology.bone]).await;

    let before_promotion = store
        .load_branch("MAIN/A")
        .await
        .unwrap()
        .unwrap()
        .head_timestamp;

    ontodb::promote(&manager, "MAIN/A", "MAIN").await.unwrap();

    let parent = assert_paths_agree(store.as_ref(), "MAIN").await;
    assert!(parent.contains(&ontology.bone));
    let child = assert_paths_agree(store.as_ref(), "MAIN/A").await;
    assert_eq!(parent, child);

    // The child's own lookup was time-bounded, not erased: historical reads
    // at the pre-promotion timepoint still resolve it
    let historical = refset_members(
        store.as_ref(),
        "MAIN/A",
        REFSET,
        Some(before_promotion),
    )
    .await
    .unwrap();
    let historical_scan = refset_members_by_scan(
        store.as_ref(),
        "MAIN/A",
        REFSET,
        Some(before_promotion),
    )
    .await
    .unwrap();
    assert_eq!(historical, historical_scan);
    assert!(historical.contains(&ontology.bone));
}

#[tokio::test]
async fn rebase_reconciles_inherited_lookups_with_local_changes() {
    let config = IndexConfig {
        lookup_member_threshold: 10,
        ..IndexConfig::default()
    };
    let (store, manager) = manager_with(config);
    let ontology = seed_demo_ontology(&manager).await.unwrap();

    // The child records changes while nothing is materialized anywhere
    create_branch(store.as_ref(), "MAIN/A").await.unwrap();
    add_members(&manager, "MAIN/A", &[&ontology.bone]).await;

    // The parent crosses the threshold afterwards
    add_members(
        &manager,
        "MAIN",
        &[
            &ontology.fracture,
            &ontology.disease,
            &ontology.root,
            &ontology.clinical_finding,
            &ontology.body_structure,
            &ontology.finding_site,
            "c-7",
            "c-8",
            "c-9",
            "c-10",
        ],
    )
    .await;
    let main_members = assert_paths_agree(store.as_ref(), "MAIN").await;
    assert_eq!(main_members.len(), 10);

    // Rebase surfaces the parent's lookup; the child's earlier local member
    // must not get lost in the fold
    ontodb::rebase(&manager, "MAIN", "MAIN/A", &BTreeMap::new())
        .await
        .unwrap();
    let child = assert_paths_agree(store.as_ref(), "MAIN/A").await;
    assert!(child.contains(&ontology.bone));
    assert_eq!(child.len(), 11);
}
