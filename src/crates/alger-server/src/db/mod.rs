//! Persistence: connection pool, models, repositories and the gateway.

pub mod connection;
pub mod gateway;
pub mod models;
pub mod repositories;

pub use connection::{DatabaseConnection, DatabasePool};
pub use gateway::{
    ClientInfo, Direction, ErrorRecord, ExecutionDraft, ExecutionOutput, ExecutionSource,
    MessageRecord, PersistenceGateway, PipelineDraft, SqliteGateway, UserDefaults,
};
