use crate::logic::branch_ops::create_branch;
use crate::logic::commit::CommitManager;
use crate::model::{
    ClassAxiom, CommitKind, Concept, Description, Id, OntoError, Relationship, IS_A, ROOT_BRANCH,
};
use crate::store::traits::Store;

/// Core module id used for all seeded content
pub const CORE_MODULE: &str = "900000000000207008";

/// Description type id for fully-specified names
pub const FSN_TYPE: &str = "900000000000003001";

/// Handles to the small demo hierarchy the seed creates:
///
/// ```text
/// root
/// └── clinical_finding
///     ├── disease
///     │   └── fracture
///     └── finding_site (attribute type)
/// body_structure
/// └── bone
/// ```
#[derive(Debug, Clone)]
pub struct DemoOntology {
    pub root: Id,
    pub is_a: Id,
    pub clinical_finding: Id,
    pub disease: Id,
    pub fracture: Id,
    pub finding_site: Id,
    pub body_structure: Id,
    pub bone: Id,
}

impl DemoOntology {
    fn ids() -> Self {
        Self {
            root: "138875005".to_string(),
            is_a: IS_A.to_string(),
            clinical_finding: "404684003".to_string(),
            disease: "64572001".to_string(),
            fracture: "125605004".to_string(),
            finding_site: "363698007".to_string(),
            body_structure: "123037004".to_string(),
            bone: "272673000".to_string(),
        }
    }
}

/// Create the root branch and commit a small clinical hierarchy onto it.
/// Used by tests and demos as a known starting state.
pub async fn seed_demo_ontology<S: Store>(
    manager: &CommitManager<S>,
) -> Result<DemoOntology, OntoError> {
    let ids = DemoOntology::ids();
    create_branch(manager.store().as_ref(), ROOT_BRANCH).await?;

    let mut tx = manager.open(ROOT_BRANCH, CommitKind::Content).await?;
    for (concept_id, term) in [
        (&ids.root, "SNOMED CT Concept"),
        (&ids.is_a, "Is a"),
        (&ids.clinical_finding, "Clinical finding"),
        (&ids.disease, "Disease"),
        (&ids.fracture, "Fracture of bone"),
        (&ids.finding_site, "Finding site"),
        (&ids.body_structure, "Body structure"),
        (&ids.bone, "Bone structure"),
    ] {
        tx.upsert_concept(Concept::new(concept_id.clone(), CORE_MODULE));
        tx.upsert_description(Description::new(
            format!("d-{}", concept_id),
            concept_id.clone(),
            CORE_MODULE,
            term,
            FSN_TYPE,
        ));
    }

    for (rel_id, source, destination) in [
        ("r-is-a", &ids.is_a, &ids.root),
        ("r-finding", &ids.clinical_finding, &ids.root),
        ("r-disease", &ids.disease, &ids.clinical_finding),
        ("r-fracture", &ids.fracture, &ids.disease),
        ("r-site-type", &ids.finding_site, &ids.root),
        ("r-body", &ids.body_structure, &ids.root),
        ("r-bone", &ids.bone, &ids.body_structure),
    ] {
        tx.upsert_relationship(Relationship::is_a(
            rel_id,
            source.clone(),
            destination.clone(),
            CORE_MODULE,
        ));
    }

    // The fracture is fully defined: finding site bone
    tx.upsert_relationship(
        Relationship::new(
            "r-fracture-site",
            ids.fracture.clone(),
            ids.finding_site.clone(),
            ids.bone.clone(),
            CORE_MODULE,
        )
        .grouped(1),
    );
    tx.upsert_axiom(
        ClassAxiom::new("a-fracture", ids.fracture.clone(), CORE_MODULE)
            .defining()
            .referencing(vec![
                ids.disease.clone(),
                ids.finding_site.clone(),
                ids.bone.clone(),
            ]),
    );

    manager.commit(tx).await?;
    log::info!("seeded demo ontology on {}", ROOT_BRANCH);
    Ok(ids)
}
