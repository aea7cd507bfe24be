//! Pipeline repository for database operations.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::Pipeline;

/// Repository for stored pipeline definitions.
pub struct PipelineRepository;

impl PipelineRepository {
    /// All pipelines, ordered by id.
    pub async fn list(pool: &DatabasePool) -> Result<Vec<Pipeline>, sqlx::Error> {
        sqlx::query_as::<_, Pipeline>("SELECT * FROM pipelines ORDER BY id ASC")
            .fetch_all(pool)
            .await
    }

    /// Get a pipeline by ID.
    pub async fn get_by_id(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<Pipeline>, sqlx::Error> {
        sqlx::query_as::<_, Pipeline>("SELECT * FROM pipelines WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Insert or update a pipeline definition.
    pub async fn upsert(
        pool: &DatabasePool,
        id: &str,
        name: &str,
        full_graph: Option<String>,
        description: Option<String>,
        metadata: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO pipelines (id, name, full_graph, description, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 full_graph = excluded.full_graph,
                 description = excluded.description,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(name)
        .bind(&full_graph)
        .bind(&description)
        .bind(&metadata)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    }
}
