//! Connection repository for database operations.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::Connection;

/// Repository for live-connection rows.
pub struct ConnectionRepository;

impl ConnectionRepository {
    /// Insert a row for a newly accepted connection.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        pool: &DatabasePool,
        id: String,
        user_id: String,
        client_ip: Option<String>,
        client_port: Option<i64>,
        user_agent: Option<String>,
        origin: Option<String>,
        path: Option<String>,
    ) -> Result<Connection, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, Connection>(
            "INSERT INTO connections (id, user_id, client_ip, client_port, user_agent, origin, path, status, connected_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'open', ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(&user_id)
        .bind(&client_ip)
        .bind(client_port)
        .bind(&user_agent)
        .bind(&origin)
        .bind(&path)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    /// Mark a connection as closed.
    pub async fn close(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE connections SET status = 'closed', disconnected_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Get a connection by ID.
    pub async fn get_by_id(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<Connection>, sqlx::Error> {
        sqlx::query_as::<_, Connection>("SELECT * FROM connections WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
