//! Database models.

mod connection;
mod error_log;
mod execution;
mod pipeline;
mod user;

pub use connection::{Connection, Conversation, ConversationMessage};
pub use error_log::ErrorLog;
pub use execution::{Execution, ExecutionEvent, ExecutionStatus};
pub use pipeline::Pipeline;
pub use user::User;
