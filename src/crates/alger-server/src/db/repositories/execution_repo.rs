//! Execution repository for database operations.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::{Execution, ExecutionEvent, ExecutionStatus};

/// Repository for execution rows and their event log.
pub struct ExecutionRepository;

impl ExecutionRepository {
    /// Create an execution row.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &DatabasePool,
        id: String,
        pipeline_id: Option<String>,
        source: &str,
        graph: Option<String>,
        params: Option<String>,
        status: ExecutionStatus,
        requested_by: String,
        output_file: Option<String>,
        output_content: Option<String>,
    ) -> Result<Execution, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, Execution>(
            "INSERT INTO executions
             (id, pipeline_id, source, graph, params, status, requested_by, output_file, output_content, started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(&pipeline_id)
        .bind(source)
        .bind(&graph)
        .bind(&params)
        .bind(status.as_str())
        .bind(&requested_by)
        .bind(&output_file)
        .bind(&output_content)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    /// Get an execution by ID.
    pub async fn get_by_id(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<Execution>, sqlx::Error> {
        sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Update an execution's status and optional output.
    ///
    /// Only rows still in a non-terminal state are touched, which keeps
    /// terminal states sticky; `completed_at` is stamped exactly when a
    /// terminal status is applied. Returns whether a row was updated.
    pub async fn update_status(
        pool: &DatabasePool,
        id: &str,
        status: ExecutionStatus,
        output_file: Option<String>,
        output_content: Option<String>,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE executions
             SET status = ?,
                 output_file = COALESCE(?, output_file),
                 output_content = COALESCE(?, output_content),
                 completed_at = CASE
                     WHEN ? IN ('finished', 'failed', 'stopped') THEN ?
                     ELSE completed_at
                 END
             WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(status.as_str())
        .bind(&output_file)
        .bind(&output_content)
        .bind(status.as_str())
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append a granular event to an execution.
    pub async fn add_event(
        pool: &DatabasePool,
        execution_id: &str,
        event_type: &str,
        description: &str,
        payload: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO execution_events (execution_id, event_type, description, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(execution_id)
        .bind(event_type)
        .bind(description)
        .bind(&payload)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All events of an execution, in insertion order.
    pub async fn list_events(
        pool: &DatabasePool,
        execution_id: &str,
    ) -> Result<Vec<ExecutionEvent>, sqlx::Error> {
        sqlx::query_as::<_, ExecutionEvent>(
            "SELECT * FROM execution_events WHERE execution_id = ? ORDER BY id ASC",
        )
        .bind(execution_id)
        .fetch_all(pool)
        .await
    }

    /// Number of executions still queued or running.
    pub async fn count_active(pool: &DatabasePool) -> Result<i64, sqlx::Error> {
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM executions WHERE status IN ('queued', 'running')",
        )
        .fetch_one(pool)
        .await?;
        Ok(result.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::DatabaseConnection;
    use crate::db::repositories::UserRepository;

    async fn setup_pool() -> DatabasePool {
        let conn = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap();
        conn.run_migrations().await.unwrap();
        let pool = conn.pool().clone();
        UserRepository::create(
            &pool,
            "u-1".to_string(),
            "admin".to_string(),
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap();
        pool
    }

    async fn create_running(pool: &DatabasePool, id: &str) -> Execution {
        ExecutionRepository::create(
            pool,
            id.to_string(),
            None,
            "payload",
            Some("{}".to_string()),
            Some("{}".to_string()),
            ExecutionStatus::Running,
            "u-1".to_string(),
            None,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_count_active() {
        let pool = setup_pool().await;
        let execution = create_running(&pool, "e-1").await;
        assert_eq!(execution.status(), ExecutionStatus::Running);
        assert!(execution.completed_at.is_none());
        assert_eq!(ExecutionRepository::count_active(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_terminal_transition_stamps_completed_at() {
        let pool = setup_pool().await;
        create_running(&pool, "e-1").await;

        let updated = ExecutionRepository::update_status(
            &pool,
            "e-1",
            ExecutionStatus::Finished,
            Some("e-1.json".to_string()),
            Some(r#"{"sinks": {}}"#.to_string()),
        )
        .await
        .unwrap();
        assert!(updated);

        let row = ExecutionRepository::get_by_id(&pool, "e-1").await.unwrap().unwrap();
        assert_eq!(row.status(), ExecutionStatus::Finished);
        assert!(row.completed_at.is_some());
        assert_eq!(row.output_file.as_deref(), Some("e-1.json"));
        assert_eq!(ExecutionRepository::count_active(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminal_states_are_sticky() {
        let pool = setup_pool().await;
        create_running(&pool, "e-1").await;

        ExecutionRepository::update_status(&pool, "e-1", ExecutionStatus::Stopped, None, None)
            .await
            .unwrap();
        let updated =
            ExecutionRepository::update_status(&pool, "e-1", ExecutionStatus::Finished, None, None)
                .await
                .unwrap();
        assert!(!updated);

        let row = ExecutionRepository::get_by_id(&pool, "e-1").await.unwrap().unwrap();
        assert_eq!(row.status(), ExecutionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_queued_to_running_is_allowed() {
        let pool = setup_pool().await;
        ExecutionRepository::create(
            &pool,
            "e-1".to_string(),
            None,
            "db",
            None,
            None,
            ExecutionStatus::Queued,
            "u-1".to_string(),
            None,
            None,
        )
        .await
        .unwrap();

        let updated =
            ExecutionRepository::update_status(&pool, "e-1", ExecutionStatus::Running, None, None)
                .await
                .unwrap();
        assert!(updated);

        let row = ExecutionRepository::get_by_id(&pool, "e-1").await.unwrap().unwrap();
        assert_eq!(row.status(), ExecutionStatus::Running);
        assert!(row.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_event_log() {
        let pool = setup_pool().await;
        create_running(&pool, "e-1").await;

        ExecutionRepository::add_event(&pool, "e-1", "status", "created", Some("{}".to_string()))
            .await
            .unwrap();
        ExecutionRepository::add_event(&pool, "e-1", "summary", "done", None)
            .await
            .unwrap();

        let events = ExecutionRepository::list_events(&pool, "e-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "summary");
    }
}
