//! Alger: a stateful WebSocket server for managing and executing DAG
//! pipelines.
//!
//! Clients authenticate at handshake (`?username=&password=` plus the
//! `alger` sub-protocol), then speak a framed JSON protocol with strictly
//! monotonic message ids. Pipeline executions run in the background on the
//! engine from `alger-dag`, streaming per-node status frames back to the
//! originating connection while every interaction is persisted to SQLite.

pub mod config;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use context::RequestContext;
pub use error::{Result, ServerError};
pub use handlers::AppState;
pub use server::AlgerServer;
pub use state::ServerState;
