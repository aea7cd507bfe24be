//! Database connection management.

use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Type alias for the database connection pool.
pub type DatabasePool = SqlitePool;

/// Database connection wrapper.
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Arc<DatabasePool>,
}

impl DatabaseConnection {
    /// Create a new database connection from a connection string
    /// (e.g. `sqlite://alger.sqlite3?mode=rwc` or `sqlite::memory:`).
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::with_max_connections(database_url, 5).await
    }

    /// Create a new database connection with a custom pool size.
    pub async fn with_max_connections(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Run migrations on the database.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await
    }

    /// Perform a health check by running a simple query.
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").fetch_one(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_connection() -> DatabaseConnection {
        // One connection so every statement sees the same in-memory database.
        DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_connection() {
        let conn = memory_connection().await;
        assert!(conn.pool().acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_success() {
        let conn = memory_connection().await;
        assert!(conn.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_migrations_apply() {
        let conn = memory_connection().await;
        conn.run_migrations().await.unwrap();

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'executions'")
                .fetch_one(conn.pool())
                .await
                .unwrap();
        assert_eq!(count.0, 1);
    }
}
