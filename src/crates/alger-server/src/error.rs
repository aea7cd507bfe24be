//! Server-wide error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::ProtocolError;

/// Errors that can occur while serving connections.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame envelope violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Graph normalisation/validation/execution failure
    #[error("pipeline error: {0}")]
    Pipeline(#[from] alger_dag::PipelineError),

    /// Configuration failure
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// JSON encoding failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket-level failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServerError>;
