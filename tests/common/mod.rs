#![allow(dead_code)]

use std::sync::Arc;

use ontodb::seed::{seed_demo_ontology, DemoOntology, CORE_MODULE};
use ontodb::{
    CommitKind, CommitManager, Concept, IndexConfig, MemoryStore, OntoError, Relationship,
};

/// Fresh in-memory engine with a permissive lookup threshold for tests that
/// want materialized lookups early.
pub fn manager_with(config: IndexConfig) -> (Arc<MemoryStore>, Arc<CommitManager<MemoryStore>>) {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(CommitManager::new(Arc::clone(&store), config));
    (store, manager)
}

pub fn manager() -> (Arc<MemoryStore>, Arc<CommitManager<MemoryStore>>) {
    manager_with(IndexConfig::default())
}

/// Engine pre-seeded with the demo hierarchy on MAIN
pub async fn seeded() -> (
    Arc<MemoryStore>,
    Arc<CommitManager<MemoryStore>>,
    DemoOntology,
) {
    let (store, manager) = manager();
    let ontology = seed_demo_ontology(&manager).await.unwrap();
    (store, manager, ontology)
}

/// Commit one new concept with a single IS-A edge onto a branch
pub async fn commit_concept(
    manager: &CommitManager<MemoryStore>,
    path: &str,
    concept_id: &str,
    parent_concept_id: &str,
) -> Result<(), OntoError> {
    let mut tx = manager.open(path, CommitKind::Content).await?;
    tx.upsert_concept(Concept::new(concept_id, CORE_MODULE));
    tx.upsert_relationship(Relationship::is_a(
        format!("r-{}", concept_id),
        concept_id,
        parent_concept_id,
        CORE_MODULE,
    ));
    manager.commit(tx).await?;
    Ok(())
}
