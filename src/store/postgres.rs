use anyhow::{anyhow, Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{
    Branch, BranchCriteria, ClassAxiom, ClosureEntry, ComponentKind, Description, Id,
    LookupDirection, ReferenceSetMember, RefsetLookup, Relationship, Timestamp, Versioned,
};
use crate::store::traits::{
    BranchStore, ComponentStore, LookupLevel, QueryStore, Store, VersionSelection,
};

/// PostgreSQL adapter for the document-store interface. Branch and component
/// versions are JSONB rows keyed by (branch, id, start timestamp); criteria
/// resolution follows the same nearest-segment-wins rules as the in-memory
/// reference store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the backing tables if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS branch_versions (
                path TEXT NOT NULL,
                start_ts BIGINT NOT NULL,
                end_ts BIGINT,
                doc JSONB NOT NULL,
                PRIMARY KEY (path, start_ts)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create branch_versions table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS component_versions (
                kind TEXT NOT NULL,
                path TEXT NOT NULL,
                id TEXT NOT NULL,
                start_ts BIGINT NOT NULL,
                end_ts BIGINT,
                doc JSONB NOT NULL,
                PRIMARY KEY (kind, path, id, start_ts)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create component_versions table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_component_versions_open
             ON component_versions (kind, path) WHERE end_ts IS NULL",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create component_versions index")?;

        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn decode_branch(row: &sqlx::postgres::PgRow) -> Result<Branch> {
        let doc: serde_json::Value = row.get("doc");
        serde_json::from_value(doc).context("corrupt branch document")
    }

    fn decode_doc<C: Versioned>(doc: serde_json::Value) -> Result<C> {
        serde_json::from_value(doc)
            .map_err(|e| anyhow!("corrupt {:?} document: {}", C::KIND, e))
    }

    /// Visible rows of one criteria segment, in id order
    async fn segment_rows(
        &self,
        kind: ComponentKind,
        path: &str,
        max_timestamp: Timestamp,
        ids: Option<&[Id]>,
    ) -> Result<Vec<(Id, serde_json::Value)>> {
        let rows = match ids {
            Some(ids) => {
                sqlx::query(
                    "SELECT id, doc FROM component_versions
                     WHERE kind = $1 AND path = $2 AND start_ts <= $3
                       AND (end_ts IS NULL OR end_ts > $3)
                       AND id = ANY($4)",
                )
                .bind(kind.as_str())
                .bind(path)
                .bind(max_timestamp)
                .bind(ids)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, doc FROM component_versions
                     WHERE kind = $1 AND path = $2 AND start_ts <= $3
                       AND (end_ts IS NULL OR end_ts > $3)",
                )
                .bind(kind.as_str())
                .bind(path)
                .bind(max_timestamp)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to query component versions")?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("id"), row.get("doc")))
            .collect())
    }

    async fn resolve_visible<C: Versioned>(
        &self,
        criteria: &BranchCriteria,
        ids: Option<&[Id]>,
    ) -> Result<Vec<C>> {
        let mut taken: std::collections::HashMap<Id, serde_json::Value> =
            std::collections::HashMap::new();
        for segment in &criteria.segments {
            for (id, doc) in self
                .segment_rows(C::KIND, &segment.path, segment.max_timestamp, ids)
                .await?
            {
                if segment.is_masked(C::KIND, &id) {
                    continue;
                }
                taken.entry(id).or_insert(doc);
            }
        }
        let mut resolved: Vec<(Id, serde_json::Value)> = taken.into_iter().collect();
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        resolved
            .into_iter()
            .map(|(_, doc)| Self::decode_doc(doc))
            .collect()
    }
}

#[async_trait::async_trait]
impl BranchStore for PostgresStore {
    async fn load_branch(&self, path: &str) -> Result<Option<Branch>> {
        let row = sqlx::query("SELECT doc FROM branch_versions WHERE path = $1 AND end_ts IS NULL")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load branch")?;
        row.as_ref().map(Self::decode_branch).transpose()
    }

    async fn load_branch_at(&self, path: &str, timepoint: Timestamp) -> Result<Option<Branch>> {
        let row = sqlx::query(
            "SELECT doc FROM branch_versions
             WHERE path = $1 AND start_ts <= $2 AND (end_ts IS NULL OR end_ts > $2)",
        )
        .bind(path)
        .bind(timepoint)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load branch at timepoint")?;
        row.as_ref().map(Self::decode_branch).transpose()
    }

    async fn create_branch_doc(&self, branch: Branch) -> Result<()> {
        sqlx::query(
            "INSERT INTO branch_versions (path, start_ts, end_ts, doc) VALUES ($1, $2, NULL, $3)",
        )
        .bind(&branch.path)
        .bind(branch.start)
        .bind(serde_json::to_value(&branch)?)
        .execute(&self.pool)
        .await
        .context("Failed to create branch document")?;
        Ok(())
    }

    async fn supersede_branch(&self, branch: Branch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE branch_versions
             SET end_ts = $2, doc = jsonb_set(doc, '{end}', to_jsonb($2::bigint))
             WHERE path = $1 AND end_ts IS NULL",
        )
        .bind(&branch.path)
        .bind(branch.start)
        .execute(&mut *tx)
        .await
        .context("Failed to end open branch document")?;
        sqlx::query(
            "INSERT INTO branch_versions (path, start_ts, end_ts, doc) VALUES ($1, $2, NULL, $3)",
        )
        .bind(&branch.path)
        .bind(branch.start)
        .bind(serde_json::to_value(&branch)?)
        .execute(&mut *tx)
        .await
        .context("Failed to insert branch document")?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_branch(&self, branch: Branch) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE branch_versions SET doc = $2 WHERE path = $1 AND end_ts IS NULL",
        )
        .bind(&branch.path)
        .bind(serde_json::to_value(&branch)?)
        .execute(&self.pool)
        .await
        .context("Failed to update branch document")?;
        if updated.rows_affected() == 0 {
            return Err(anyhow!("branch {} has no open document", branch.path));
        }
        Ok(())
    }

    async fn rollback_branch_version(&self, path: &str, start: Timestamp) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM branch_versions WHERE path = $1 AND start_ts = $2")
            .bind(path)
            .bind(start)
            .execute(&mut *tx)
            .await
            .context("Failed to remove branch document")?;
        sqlx::query(
            "UPDATE branch_versions SET end_ts = NULL, doc = doc - 'end'
             WHERE path = $1 AND end_ts = $2",
        )
        .bind(path)
        .bind(start)
        .execute(&mut *tx)
        .await
        .context("Failed to reopen previous branch document")?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_child_branches(&self, path: &str) -> Result<Vec<Branch>> {
        let rows = sqlx::query(
            "SELECT doc FROM branch_versions
             WHERE path LIKE $1 || '/%' AND path NOT LIKE $1 || '/%/%' AND end_ts IS NULL
             ORDER BY path",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list child branches")?;
        rows.iter().map(Self::decode_branch).collect()
    }
}

#[async_trait::async_trait]
impl ComponentStore for PostgresStore {
    async fn bulk_upsert<C: Versioned>(&self, path: &str, docs: Vec<C>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for doc in &docs {
            sqlx::query(
                "INSERT INTO component_versions (kind, path, id, start_ts, end_ts, doc)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (kind, path, id, start_ts) DO UPDATE SET end_ts = $5, doc = $6",
            )
            .bind(C::KIND.as_str())
            .bind(path)
            .bind(doc.doc_id())
            .bind(doc.start())
            .bind(doc.end())
            .bind(serde_json::to_value(doc)?)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert component version")?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn end_versions(
        &self,
        path: &str,
        kind: ComponentKind,
        ids: &[Id],
        end: Timestamp,
    ) -> Result<Vec<Id>> {
        let rows = sqlx::query(
            "UPDATE component_versions
             SET end_ts = $4, doc = jsonb_set(doc, '{end}', to_jsonb($4::bigint))
             WHERE kind = $1 AND path = $2 AND end_ts IS NULL AND id = ANY($3)
             RETURNING id",
        )
        .bind(kind.as_str())
        .bind(path)
        .bind(ids)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to end component versions")?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn find_on_branch<C: Versioned>(
        &self,
        path: &str,
        selection: VersionSelection,
    ) -> Result<Vec<C>> {
        let base = "SELECT doc FROM component_versions WHERE kind = $1 AND path = $2";
        let rows = match selection {
            VersionSelection::Open => {
                sqlx::query(&format!("{} AND end_ts IS NULL", base))
                    .bind(C::KIND.as_str())
                    .bind(path)
                    .fetch_all(&self.pool)
                    .await
            }
            VersionSelection::OpenStartedAfter(after) => {
                sqlx::query(&format!("{} AND end_ts IS NULL AND start_ts > $3", base))
                    .bind(C::KIND.as_str())
                    .bind(path)
                    .bind(after)
                    .fetch_all(&self.pool)
                    .await
            }
            VersionSelection::StartedBetween(from, to) => {
                sqlx::query(&format!("{} AND start_ts > $3 AND start_ts <= $4", base))
                    .bind(C::KIND.as_str())
                    .bind(path)
                    .bind(from)
                    .bind(to)
                    .fetch_all(&self.pool)
                    .await
            }
            VersionSelection::EndedAt(at) => {
                sqlx::query(&format!("{} AND end_ts = $3", base))
                    .bind(C::KIND.as_str())
                    .bind(path)
                    .bind(at)
                    .fetch_all(&self.pool)
                    .await
            }
            VersionSelection::EndedBetween(from, to) => {
                sqlx::query(&format!("{} AND end_ts > $3 AND end_ts <= $4", base))
                    .bind(C::KIND.as_str())
                    .bind(path)
                    .bind(from)
                    .bind(to)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to query branch-local versions")?;

        rows.into_iter()
            .map(|row| Self::decode_doc(row.get("doc")))
            .collect()
    }

    async fn find_visible<C: Versioned>(
        &self,
        criteria: &BranchCriteria,
        ids: Option<&[Id]>,
    ) -> Result<Vec<C>> {
        self.resolve_visible(criteria, ids).await
    }

    async fn remove_versions_started_at(
        &self,
        path: &str,
        kind: ComponentKind,
        start: Timestamp,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM component_versions WHERE kind = $1 AND path = $2 AND start_ts = $3",
        )
        .bind(kind.as_str())
        .bind(path)
        .bind(start)
        .execute(&self.pool)
        .await
        .context("Failed to remove component versions")?;
        Ok(())
    }

    async fn reopen_versions_ended_at(
        &self,
        path: &str,
        kind: ComponentKind,
        end: Timestamp,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE component_versions SET end_ts = NULL, doc = doc - 'end'
             WHERE kind = $1 AND path = $2 AND end_ts = $3",
        )
        .bind(kind.as_str())
        .bind(path)
        .bind(end)
        .execute(&self.pool)
        .await
        .context("Failed to reopen component versions")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl QueryStore for PostgresStore {
    async fn find_relationships_by_source(
        &self,
        criteria: &BranchCriteria,
        source_ids: &[Id],
    ) -> Result<Vec<Relationship>> {
        let all: Vec<Relationship> = self.resolve_visible(criteria, None).await?;
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
        let all: Vec<Description> = self.resolve_visible(criteria, None).await?;
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
        let all: Vec<ClassAxiom> = self.resolve_visible(criteria, None).await?;
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
        let all: Vec<ReferenceSetMember> = self.resolve_visible(criteria, None).await?;
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
        let all: Vec<ReferenceSetMember> = self.resolve_visible(criteria, None).await?;
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
        let all: Vec<ClosureEntry> = self.resolve_visible(criteria, None).await?;
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
        let mut levels = Vec::new();
        for segment in &criteria.segments {
            let lookups: Vec<RefsetLookup> = self
                .segment_rows(
                    ComponentKind::RefsetLookup,
                    &segment.path,
                    segment.max_timestamp,
                    None,
                )
                .await?
                .into_iter()
                .map(|(_, doc)| Self::decode_doc(doc))
                .collect::<Result<_>>()?;
            let mut include = None;
            let mut exclude = None;
            for lookup in lookups {
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

impl Store for PostgresStore {}
