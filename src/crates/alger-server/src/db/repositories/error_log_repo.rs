//! Error-log repository for database operations.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::ErrorLog;

/// Repository for structured diagnostic rows.
pub struct ErrorLogRepository;

impl ErrorLogRepository {
    /// Insert a diagnostic row.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        pool: &DatabasePool,
        conversation_id: Option<String>,
        execution_id: Option<String>,
        message_id: Option<i64>,
        type_code: Option<i64>,
        severity: &str,
        message: &str,
        payload: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO error_logs
             (conversation_id, execution_id, message_id, type_code, severity, message, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation_id)
        .bind(&execution_id)
        .bind(message_id)
        .bind(type_code)
        .bind(severity)
        .bind(message)
        .bind(&payload)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All diagnostic rows, newest last.
    pub async fn list(pool: &DatabasePool) -> Result<Vec<ErrorLog>, sqlx::Error> {
        sqlx::query_as::<_, ErrorLog>("SELECT * FROM error_logs ORDER BY id ASC")
            .fetch_all(pool)
            .await
    }
}
