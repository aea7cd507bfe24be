//! User repository for database operations.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::User;

/// User repository for managing user rows and the action audit log.
pub struct UserRepository;

impl UserRepository {
    /// Create a new user row.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &DatabasePool,
        id: String,
        username: String,
        display_name: Option<String>,
        email: Option<String>,
        roles: Option<String>,
        metadata: Option<String>,
    ) -> Result<User, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, username, display_name, email, roles, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(&username)
        .bind(&display_name)
        .bind(&email)
        .bind(&roles)
        .bind(&metadata)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    /// Get a user by ID.
    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Get a user by username.
    pub async fn get_by_username(
        pool: &DatabasePool,
        username: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    /// Stamp a successful login on the user row.
    pub async fn touch_last_login(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE users SET last_login = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Append an audit row for a user-triggered action.
    pub async fn record_action(
        pool: &DatabasePool,
        user_id: &str,
        action: &str,
        details: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO user_actions (user_id, action, details, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(action)
        .bind(&details)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count audit rows for a user and action, used by tests.
    pub async fn count_actions(
        pool: &DatabasePool,
        user_id: &str,
        action: &str,
    ) -> Result<i64, sqlx::Error> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_actions WHERE user_id = ? AND action = ?")
                .bind(user_id)
                .bind(action)
                .fetch_one(pool)
                .await?;
        Ok(result.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::DatabaseConnection;

    async fn setup_pool() -> DatabasePool {
        let conn = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap();
        conn.run_migrations().await.unwrap();
        conn.pool().clone()
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let pool = setup_pool().await;

        let user = UserRepository::create(
            &pool,
            "u-1".to_string(),
            "admin".to_string(),
            Some("Administrator".to_string()),
            None,
            Some(r#"["admin"]"#.to_string()),
            None,
        )
        .await
        .unwrap();
        assert_eq!(user.username, "admin");
        assert_eq!(user.roles_list(), vec!["admin"]);

        let by_name = UserRepository::get_by_username(&pool, "admin").await.unwrap();
        assert_eq!(by_name.unwrap().id, "u-1");
        assert!(UserRepository::get_by_username(&pool, "ghost")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_touch_last_login() {
        let pool = setup_pool().await;
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

        UserRepository::touch_last_login(&pool, "u-1").await.unwrap();
        let user = UserRepository::get_by_id(&pool, "u-1").await.unwrap().unwrap();
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn test_record_action() {
        let pool = setup_pool().await;
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

        UserRepository::record_action(&pool, "u-1", "login", Some("{}".to_string()))
            .await
            .unwrap();
        UserRepository::record_action(&pool, "u-1", "login", None)
            .await
            .unwrap();

        let count = UserRepository::count_actions(&pool, "u-1", "login").await.unwrap();
        assert_eq!(count, 2);
    }
}
