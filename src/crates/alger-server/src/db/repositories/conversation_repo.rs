//! Conversation repository: the per-connection frame log.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::{Conversation, ConversationMessage};

/// Repository for conversations and their message log.
pub struct ConversationRepository;

impl ConversationRepository {
    /// Start a conversation bound to a connection.
    pub async fn open(
        pool: &DatabasePool,
        id: String,
        user_id: String,
        connection_id: String,
    ) -> Result<Conversation, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (id, user_id, connection_id, started_at)
             VALUES (?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(&user_id)
        .bind(&connection_id)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    /// Mark a conversation as finished.
    pub async fn close(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE conversations SET ended_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Get a conversation by ID.
    pub async fn get_by_id(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Append one frame to the conversation log.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_message(
        pool: &DatabasePool,
        conversation_id: &str,
        direction: &str,
        message_id: Option<i64>,
        request_id: Option<i64>,
        type_code: Option<i64>,
        status_code: Option<i64>,
        payload: Option<String>,
        error: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO conversation_messages
             (conversation_id, direction, message_id, request_id, type_code, status_code, payload, error, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(direction)
        .bind(message_id)
        .bind(request_id)
        .bind(type_code)
        .bind(status_code)
        .bind(&payload)
        .bind(&error)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All logged frames for a conversation, in insertion order.
    pub async fn list_messages(
        pool: &DatabasePool,
        conversation_id: &str,
    ) -> Result<Vec<ConversationMessage>, sqlx::Error> {
        sqlx::query_as::<_, ConversationMessage>(
            "SELECT * FROM conversation_messages WHERE conversation_id = ? ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await
    }
}
