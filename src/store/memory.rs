use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::model::{
    Branch, BranchCriteria, ClassAxiom, ClosureEntry, ComponentKind, Description, Id,
    ReferenceSetMember, RefsetLookup, Relationship, Timestamp, Versioned,
};
use crate::store::traits::{
    BranchStore, ComponentStore, LookupLevel, QueryStore, Store, VersionSelection,
};
use crate::model::LookupDirection;

/// One stored component version, kept as raw JSON so the store stays agnostic
/// of component shapes (it is a document store, not a domain model).
#[derive(Debug, Clone)]
struct RawDoc {
    id: Id,
    start: Timestamp,
    end: Option<Timestamp>,
    doc: serde_json::Value,
}

impl RawDoc {
    fn visible_at(&self, timepoint: Timestamp) -> bool {
        self.start <= timepoint && self.end.map_or(true, |e| e > timepoint)
    }
}

/// In-memory reference implementation of the document-store interface.
/// Single-process; interior mutability via `parking_lot` locks, never held
/// across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    branches: RwLock<HashMap<String, Vec<Branch>>>,
    components: RwLock<HashMap<(ComponentKind, String), Vec<RawDoc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode<C: Versioned>(doc: &C) -> Result<RawDoc> {
        Ok(RawDoc {
            id: doc.doc_id().clone(),
            start: doc.start(),
            end: doc.end(),
            doc: serde_json::to_value(doc)?,
        })
    }

    fn decode<C: Versioned>(raw: &RawDoc) -> Result<C> {
        serde_json::from_value(raw.doc.clone())
            .map_err(|e| anyhow!("corrupt {:?} document {}: {}", C::KIND, raw.id, e))
    }

    /// Resolve the visible snapshot per id for a criteria: nearest segment
    /// wins, masked ids are skipped.
    fn resolve_visible(
        &self,
        kind: ComponentKind,
        criteria: &BranchCriteria,
        ids: Option<&[Id]>,
    ) -> Vec<RawDoc> {
        let components = self.components.read();
        let mut taken: HashMap<&str, &RawDoc> = HashMap::new();
        for segment in &criteria.segments {
            let Some(docs) = components.get(&(kind, segment.path.clone())) else {
                continue;
            };
            for raw in docs {
                if !raw.visible_at(segment.max_timestamp) {
                    continue;
                }
                if segment.is_masked(kind, &raw.id) {
                    continue;
                }
                if let Some(filter) = ids {
                    if !filter.iter().any(|id| id == &raw.id) {
                        continue;
                    }
                }
                taken.entry(raw.id.as_str()).or_insert(raw);
            }
        }
        let mut resolved: Vec<RawDoc> = taken.into_values().cloned().collect();
        resolved.sort_by(|a, b| a.id.cmp(&b.id));
        resolved
    }

    fn decode_visible<C: Versioned>(
        &self,
        criteria: &BranchCriteria,
        ids: Option<&[Id]>,
    ) -> Result<Vec<C>> {
        self.resolve_visible(C::KIND, criteria, ids)
            .iter()
            .map(Self::decode)
            .collect()
    }
}

#[async_trait::async_trait]
impl BranchStore for MemoryStore {
    async fn load_branch(&self, path: &str) -> Result<Option<Branch>> {
        let branches = self.branches.read();
        Ok(branches
            .get(path)
            .and_then(|versions| versions.iter().find(|b| b.end.is_none()))
            .cloned())
    }

    async fn load_branch_at(&self, path: &str, timepoint: Timestamp) -> Result<Option<Branch>> {
        let branches = self.branches.read();
        Ok(branches
            .get(path)
            .and_then(|versions| versions.iter().find(|b| b.visible_at(timepoint)))
            .cloned())
    }

    async fn create_branch_doc(&self, branch: Branch) -> Result<()> {
        let mut branches = self.branches.write();
        let versions = branches.entry(branch.path.clone()).or_default();
        if versions.iter().any(|b| b.end.is_none()) {
            return Err(anyhow!("branch {} already has an open document", branch.path));
        }
        versions.push(branch);
        Ok(())
    }

    async fn supersede_branch(&self, branch: Branch) -> Result<()> {
        let mut branches = self.branches.write();
        let versions = branches
            .get_mut(&branch.path)
            .ok_or_else(|| anyhow!("branch {} does not exist", branch.path))?;
        for open in versions.iter_mut().filter(|b| b.end.is_none()) {
            open.end = Some(branch.start);
        }
        versions.push(branch);
        Ok(())
    }

    async fn put_branch(&self, branch: Branch) -> Result<()> {
        let mut branches = self.branches.write();
        let versions = branches
            .get_mut(&branch.path)
            .ok_or_else(|| anyhow!("branch {} does not exist", branch.path))?;
        let open = versions
            .iter_mut()
            .find(|b| b.end.is_none())
            .ok_or_else(|| anyhow!("branch {} has no open document", branch.path))?;
        *open = branch;
        open.end = None;
        Ok(())
    }

    async fn rollback_branch_version(&self, path: &str, start: Timestamp) -> Result<()> {
        let mut branches = self.branches.write();
        if let Some(versions) = branches.get_mut(path) {
            versions.retain(|b| b.start != start);
            if let Some(previous) = versions.iter_mut().find(|b| b.end == Some(start)) {
                previous.end = None;
            }
        }
        Ok(())
    }

    async fn list_child_branches(&self, path: &str) -> Result<Vec<Branch>> {
        let prefix = format!("{}/", path);
        let branches = self.branches.read();
        let mut children: Vec<Branch> = branches
            .iter()
            .filter(|(child_path, _)| {
                child_path.starts_with(&prefix) && !child_path[prefix.len()..].contains('/')
            })
            .filter_map(|(_, versions)| versions.iter().find(|b| b.end.is_none()).cloned())
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }
}

#[async_trait::async_trait]
impl ComponentStore for MemoryStore {
    async fn bulk_upsert<C: Versioned>(&self, path: &str, docs: Vec<C>) -> Result<()> {
        let mut components = self.components.write();
        let versions = components
            .entry((C::KIND, path.to_string()))
            .or_default();
        for doc in &docs {
            let raw = Self::encode(doc)?;
            match versions
                .iter_mut()
                .find(|v| v.id == raw.id && v.start == raw.start)
            {
                Some(existing) => *existing = raw,
                None => versions.push(raw),
            }
        }
        Ok(())
    }

    async fn end_versions(
        &self,
        path: &str,
        kind: ComponentKind,
        ids: &[Id],
        end: Timestamp,
    ) -> Result<Vec<Id>> {
        let mut components = self.components.write();
        let mut ended = Vec::new();
        if let Some(versions) = components.get_mut(&(kind, path.to_string())) {
            for raw in versions
                .iter_mut()
                .filter(|v| v.end.is_none() && ids.contains(&v.id))
            {
                raw.end = Some(end);
                raw.doc["end"] = serde_json::json!(end);
                ended.push(raw.id.clone());
            }
        }
        Ok(ended)
    }

    async fn find_on_branch<C: Versioned>(
        &self,
        path: &str,
        selection: VersionSelection,
    ) -> Result<Vec<C>> {
        let components = self.components.read();
        let Some(versions) = components.get(&(C::KIND, path.to_string())) else {
            return Ok(Vec::new());
        };
        versions
            .iter()
            .filter(|raw| selection.matches(raw.start, raw.end))
            .map(Self::decode)
            .collect()
    }

    async fn find_visible<C: Versioned>(
        &self,
        criteria: &BranchCriteria,
        ids: Option<&[Id]>,
    ) -> Result<Vec<C>> {
        self.decode_visible(criteria, ids)
    }

    async fn remove_versions_started_at(
        &self,
        path: &str,
        kind: ComponentKind,
        start: Timestamp,
    ) -> Result<()> {
        let mut components = self.components.write();
        if let Some(versions) = components.get_mut(&(kind, path.to_string())) {
            versions.retain(|raw| raw.start != start);
        }
        Ok(())
    }

    async fn reopen_versions_ended_at(
        &self,
        path: &str,
        kind: ComponentKind,
        end: Timestamp,
    ) -> Result<()> {
        let mut components = self.components.write();
        if let Some(versions) = components.get_mut(&(kind, path.to_string())) {
            for raw in versions.iter_mut().filter(|v| v.end == Some(end)) {
                raw.end = None;
                if let Some(obj) = raw.doc.as_object_mut() {
                    obj.remove("end");
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl QueryStore for MemoryStore {
    async fn find_relationships_by_source(
        &self,
        criteria: &BranchCriteria,
        source_ids: &[Id],
    ) -> Result<Vec<Relationship>> {
        let all: Vec<Relationship> = self.decode_visible(criteria, None)?;
        Ok(all
            .into_iter()
            .filter(|r| source_ids.contains(&r.source_id))
            .collect())
    }

    async fn find_descriptions_by_concept(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &[Id],
    ) -> Result<Vec<Description>> {
        let all: Vec<Description> = self.decode_visible(criteria, None)?;
        Ok(all
            .into_iter()
            .filter(|d| concept_ids.contains(&d.concept_id))
            .collect())
    }

    async fn find_axioms_by_concept(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &[Id],
    ) -> Result<Vec<ClassAxiom>> {
        let all: Vec<ClassAxiom> = self.decode_visible(criteria, None)?;
        Ok(all
            .into_iter()
            .filter(|a| concept_ids.contains(&a.concept_id))
            .collect())
    }

    async fn find_members_by_refset(
        &self,
        criteria: &BranchCriteria,
        refset_id: &str,
    ) -> Result<Vec<ReferenceSetMember>> {
        let all: Vec<ReferenceSetMember> = self.decode_visible(criteria, None)?;
        Ok(all
            .into_iter()
            .filter(|m| m.refset_id == refset_id)
            .collect())
    }

    async fn find_members_by_referenced(
        &self,
        criteria: &BranchCriteria,
        referenced_ids: &[Id],
    ) -> Result<Vec<ReferenceSetMember>> {
        let all: Vec<ReferenceSetMember> = self.decode_visible(criteria, None)?;
        Ok(all
            .into_iter()
            .filter(|m| referenced_ids.contains(&m.referenced_component_id))
            .collect())
    }

    async fn find_descendant_entries(
        &self,
        criteria: &BranchCriteria,
        ancestor_id: &str,
    ) -> Result<Vec<ClosureEntry>> {
        let all: Vec<ClosureEntry> = self.decode_visible(criteria, None)?;
        Ok(all
            .into_iter()
            .filter(|entry| entry.has_ancestor(ancestor_id))
            .collect())
    }

    async fn find_lookups(
        &self,
        criteria: &BranchCriteria,
        refset_id: &str,
    ) -> Result<Vec<LookupLevel>> {
        let components = self.components.read();
        let mut levels = Vec::new();
        for segment in &criteria.segments {
            let Some(docs) =
                components.get(&(ComponentKind::RefsetLookup, segment.path.clone()))
            else {
                continue;
            };
            let mut include = None;
            let mut exclude = None;
            for raw in docs {
                if !raw.visible_at(segment.max_timestamp) {
                    continue;
                }
                let lookup: RefsetLookup = Self::decode(raw)?;
                if lookup.refset_id != refset_id {
                    continue;
                }
                match lookup.direction {
                    LookupDirection::Include => include = Some(lookup),
                    LookupDirection::Exclude => exclude = Some(lookup),
                }
            }
            if include.is_some() || exclude.is_some() {
                levels.push(LookupLevel {
                    path: segment.path.clone(),
                    include,
                    exclude,
                });
            }
        }
        Ok(levels)
    }
}

impl Store for MemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Concept, CriteriaSegment};
    use std::collections::BTreeMap;

    fn criteria(segments: Vec<(&str, Timestamp)>) -> BranchCriteria {
        BranchCriteria {
            segments: segments
                .into_iter()
                .map(|(path, max)| CriteriaSegment {
                    path: path.to_string(),
                    max_timestamp: max,
                    masked: BTreeMap::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn nearest_segment_shadows_ancestor_versions() {
        let store = MemoryStore::new();
        let mut parent_version = Concept::new("c1", "core");
        parent_version.start = 10;
        let mut child_version = Concept::new("c1", "core");
        child_version.active = false;
        child_version.start = 20;

        store
            .bulk_upsert("MAIN", vec![parent_version])
            .await
            .unwrap();
        store
            .bulk_upsert("MAIN/A", vec![child_version])
            .await
            .unwrap();

        let visible: Vec<Concept> = store
            .find_visible(&criteria(vec![("MAIN/A", 30), ("MAIN", 15)]), None)
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert!(!visible[0].active, "child version should win");
    }

    #[tokio::test]
    async fn versions_outside_the_window_are_invisible() {
        let store = MemoryStore::new();
        let mut version = Concept::new("c1", "core");
        version.start = 50;
        store.bulk_upsert("MAIN", vec![version]).await.unwrap();

        let visible: Vec<Concept> = store
            .find_visible(&criteria(vec![("MAIN", 40)]), None)
            .await
            .unwrap();
        assert!(visible.is_empty());
    }

    #[tokio::test]
    async fn end_and_reopen_round_trip() {
        let store = MemoryStore::new();
        let mut version = Concept::new("c1", "core");
        version.start = 10;
        store.bulk_upsert("MAIN", vec![version]).await.unwrap();

        let ended = store
            .end_versions(
                "MAIN",
                ComponentKind::Concept,
                &["c1".to_string()],
                20,
            )
            .await
            .unwrap();
        assert_eq!(ended, vec!["c1".to_string()]);

        let visible: Vec<Concept> = store
            .find_visible(&criteria(vec![("MAIN", 25)]), None)
            .await
            .unwrap();
        assert!(visible.is_empty());

        store
            .reopen_versions_ended_at("MAIN", ComponentKind::Concept, 20)
            .await
            .unwrap();
        let visible: Vec<Concept> = store
            .find_visible(&criteria(vec![("MAIN", 25)]), None)
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
    }
}
