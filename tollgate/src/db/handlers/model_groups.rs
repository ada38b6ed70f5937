//! Database repository for model groups.
//!
//! A model group maps one logical name to an ordered list of candidate
//! upstream models. Resolution returns the active entries by ascending
//! priority; the call proxy walks that list for fallback.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::model_groups::{
        ModelGroupCreateDBRequest, ModelGroupDBResponse, ModelGroupEntryDBResponse, ModelGroupEntrySpec,
        ModelGroupUpdateDBRequest,
    },
};
use crate::types::{ModelGroupId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection, query_builder::QueryBuilder};
use std::collections::HashMap;
use tracing::instrument;

/// Filter options for listing model groups
#[derive(Debug, Clone)]
pub struct ModelGroupFilter {
    pub skip: i64,
    pub limit: i64,
    pub search: Option<String>,
}

impl ModelGroupFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            search: None,
        }
    }

    pub fn with_search(mut self, search: String) -> Self {
        self.search = Some(search);
        self
    }
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct ModelGroupRow {
    pub id: ModelGroupId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Database entity model for entries
#[derive(Debug, Clone, FromRow)]
struct ModelGroupEntryRow {
    pub id: uuid::Uuid,
    pub group_id: ModelGroupId,
    pub model_name: String,
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ModelGroupRow> for ModelGroupDBResponse {
    fn from(row: ModelGroupRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<ModelGroupEntryRow> for ModelGroupEntryDBResponse {
    fn from(row: ModelGroupEntryRow) -> Self {
        Self {
            id: row.id,
            group_id: row.group_id,
            model_name: row.model_name,
            priority: row.priority,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

pub struct ModelGroups<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for ModelGroups<'c> {
    type CreateRequest = ModelGroupCreateDBRequest;
    type UpdateRequest = ModelGroupUpdateDBRequest;
    type Response = ModelGroupDBResponse;
    type Id = ModelGroupId;
    type Filter = ModelGroupFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(DbError::InvalidModelField { field: "name" });
        }

        let row: ModelGroupRow = sqlx::query_as(
            r#"
            INSERT INTO model_groups (name, description)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(request.description.as_deref())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let row: Option<ModelGroupRow> = sqlx::query_as("SELECT * FROM model_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(row.map(ModelGroupDBResponse::from))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<ModelGroupRow> = sqlx::query_as("SELECT * FROM model_groups WHERE id = ANY($1)")
            .bind(ids.as_slice())
            .fetch_all(&mut *self.db)
            .await?;

        let mut result = HashMap::new();
        for row in rows {
            result.insert(row.id, ModelGroupDBResponse::from(row));
        }

        Ok(result)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new("SELECT * FROM model_groups WHERE 1=1");

        if let Some(ref search) = filter.search {
            let search_pattern = format!("%{}%", search.to_lowercase());
            query.push(" AND (LOWER(name) LIKE ");
            query.push_bind(search_pattern.clone());
            query.push(" OR LOWER(COALESCE(description, '')) LIKE ");
            query.push_bind(search_pattern);
            query.push(")");
        }

        query.push(" ORDER BY name LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let rows = query.build_query_as::<ModelGroupRow>().fetch_all(&mut *self.db).await?;

        Ok(rows.into_iter().map(ModelGroupDBResponse::from).collect())
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM model_groups WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(group_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        if let Some(name) = &request.name
            && name.trim().is_empty()
        {
            return Err(DbError::InvalidModelField { field: "name" });
        }

        let row: ModelGroupRow = sqlx::query_as(
            r#"
            UPDATE model_groups SET
                name = COALESCE($2, name),
                description = CASE
                    WHEN $3 THEN $4
                    ELSE description
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.name.as_ref().map(|s| s.trim().to_string()))
        .bind(request.description.is_some())
        .bind(request.description.as_ref().and_then(|inner| inner.as_deref()))
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }
}

impl<'c> ModelGroups<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Get a model group by its unique name
    #[instrument(skip(self), fields(name = %name), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<ModelGroupDBResponse>> {
        let row: Option<ModelGroupRow> = sqlx::query_as("SELECT * FROM model_groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(row.map(ModelGroupDBResponse::from))
    }

    /// All entries for a group, active or not, in resolution order.
    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id)), err)]
    pub async fn entries(&mut self, group_id: ModelGroupId) -> Result<Vec<ModelGroupEntryDBResponse>> {
        let rows: Vec<ModelGroupEntryRow> = sqlx::query_as(
            "SELECT * FROM model_group_entries WHERE group_id = $1 ORDER BY priority, model_name",
        )
        .bind(group_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows.into_iter().map(ModelGroupEntryDBResponse::from).collect())
    }

    /// Replace all entries for a group.
    #[instrument(skip(self, entries), fields(group_id = %abbrev_uuid(&group_id), count = entries.len()), err)]
    pub async fn set_entries(
        &mut self,
        group_id: ModelGroupId,
        entries: Vec<ModelGroupEntrySpec>,
    ) -> Result<Vec<ModelGroupEntryDBResponse>> {
        for entry in &entries {
            if entry.model_name.trim().is_empty() {
                return Err(DbError::InvalidModelField { field: "model_name" });
            }
        }

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM model_group_entries WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        let mut result = Vec::with_capacity(entries.len());
        for entry in entries {
            let row: ModelGroupEntryRow = sqlx::query_as(
                r#"
                INSERT INTO model_group_entries (group_id, model_name, priority, active)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(group_id)
            .bind(entry.model_name.trim())
            .bind(entry.priority)
            .bind(entry.active)
            .fetch_one(&mut *tx)
            .await?;

            result.push(ModelGroupEntryDBResponse::from(row));
        }

        tx.commit().await?;
        Ok(result)
    }

    /// Resolve a group name to its candidate models in fallback order.
    ///
    /// `None` means the group does not exist; `Some(empty)` means it exists
    /// but has no active entries. Candidates are ordered by ascending
    /// priority (values need not be contiguous), ties broken by model name
    /// so resolution is deterministic.
    #[instrument(skip(self), fields(name = %name), err)]
    pub async fn resolve(&mut self, name: &str) -> Result<Option<Vec<ModelGroupEntryDBResponse>>> {
        let group: Option<ModelGroupRow> = sqlx::query_as("SELECT * FROM model_groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.db)
            .await?;

        let Some(group) = group else {
            return Ok(None);
        };

        let rows: Vec<ModelGroupEntryRow> = sqlx::query_as(
            "SELECT * FROM model_group_entries WHERE group_id = $1 AND active ORDER BY priority, model_name",
        )
        .bind(group.id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(Some(rows.into_iter().map(ModelGroupEntryDBResponse::from).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    async fn create_group(pool: &PgPool, name: &str, entries: Vec<(&str, i32, bool)>) -> ModelGroupDBResponse {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = ModelGroups::new(&mut conn);
        let group = repo
            .create(
                &ModelGroupCreateDBRequest::builder()
                    .name(name.to_string())
                    .build(),
            )
            .await
            .unwrap();
        let specs = entries
            .into_iter()
            .map(|(model_name, priority, active)| ModelGroupEntrySpec {
                model_name: model_name.to_string(),
                priority,
                active,
            })
            .collect();
        repo.set_entries(group.id, specs).await.unwrap();
        group
    }

    #[sqlx::test]
    #[test_log::test]
    async fn resolve_orders_by_priority_and_skips_inactive(pool: PgPool) {
        create_group(
            &pool,
            "chat-default",
            vec![
                ("backup-model", 10, true),
                ("primary-model", 0, true),
                ("disabled-model", 5, false),
                ("secondary-model", 5, true),
            ],
        )
        .await;

        let mut conn = pool.acquire().await.unwrap();
        let candidates = ModelGroups::new(&mut conn)
            .resolve("chat-default")
            .await
            .unwrap()
            .unwrap();

        let names: Vec<&str> = candidates.iter().map(|c| c.model_name.as_str()).collect();
        assert_eq!(names, vec!["primary-model", "secondary-model", "backup-model"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn resolve_distinguishes_unknown_from_empty(pool: PgPool) {
        create_group(&pool, "drained", vec![("old-model", 0, false)]).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = ModelGroups::new(&mut conn);

        assert!(repo.resolve("no-such-group").await.unwrap().is_none());
        let drained = repo.resolve("drained").await.unwrap().unwrap();
        assert!(drained.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn group_names_are_unique(pool: PgPool) {
        create_group(&pool, "chat-default", vec![]).await;

        let mut conn = pool.acquire().await.unwrap();
        let err = ModelGroups::new(&mut conn)
            .create(
                &ModelGroupCreateDBRequest::builder()
                    .name("chat-default".to_string())
                    .build(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn set_entries_replaces_existing(pool: PgPool) {
        let group = create_group(&pool, "rotating", vec![("model-a", 0, true), ("model-b", 1, true)]).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = ModelGroups::new(&mut conn);
        repo.set_entries(
            group.id,
            vec![ModelGroupEntrySpec {
                model_name: "model-c".to_string(),
                priority: 0,
                active: true,
            }],
        )
        .await
        .unwrap();

        let entries = repo.entries(group.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].model_name, "model-c");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn update_and_bulk_lookup(pool: PgPool) {
        let first = create_group(&pool, "first", vec![]).await;
        let second = create_group(&pool, "second", vec![]).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = ModelGroups::new(&mut conn);

        let updated = repo
            .update(
                first.id,
                &ModelGroupUpdateDBRequest {
                    name: None,
                    description: Some(Some("primary routing policy".to_string())),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("primary routing policy"));

        let bulk = repo.get_bulk(vec![first.id, second.id]).await.unwrap();
        assert_eq!(bulk.len(), 2);
        assert_eq!(bulk.get(&second.id).unwrap().name, "second");

        assert!(repo.delete(second.id).await.unwrap());
        assert!(repo.get_by_id(second.id).await.unwrap().is_none());
    }
}
