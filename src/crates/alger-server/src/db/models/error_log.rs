//! Error-log model for operator diagnostics.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A structured diagnostic row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ErrorLog {
    pub id: i64,
    pub conversation_id: Option<String>,
    pub execution_id: Option<String>,
    pub message_id: Option<i64>,
    pub type_code: Option<i64>,
    pub severity: String,
    pub message: String,
    pub payload: Option<String>,
    pub created_at: String,
}
