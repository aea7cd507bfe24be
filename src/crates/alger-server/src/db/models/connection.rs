//! Connection and conversation models.
//!
//! A connection row tracks one live WebSocket client; exactly one
//! conversation row is opened per connection and closed with it. Every frame
//! in both directions is appended to `conversation_messages`.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A live or past WebSocket connection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Connection {
    pub id: String,
    pub user_id: Option<String>,
    pub client_ip: Option<String>,
    pub client_port: Option<i64>,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
    pub path: Option<String>,
    /// `open` or `closed`
    pub status: String,
    pub connected_at: String,
    pub disconnected_at: Option<String>,
}

impl Connection {
    pub fn is_open(&self) -> bool {
        self.status == "open"
    }
}

/// The frame log bound to one connection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: String,
    pub user_id: Option<String>,
    pub connection_id: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
}

/// One logged frame, inbound or outbound.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationMessage {
    pub id: i64,
    pub conversation_id: String,
    /// `incoming` or `outgoing`
    pub direction: String,
    pub message_id: Option<i64>,
    pub request_id: Option<i64>,
    pub type_code: Option<i64>,
    pub status_code: Option<i64>,
    pub payload: Option<String>,
    pub error: Option<String>,
    pub recorded_at: String,
}
