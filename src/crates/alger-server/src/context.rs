//! Connection-scoped request context.

use std::sync::Arc;

use crate::dispatch::Dispatcher;

/// Metadata about the connected client and its conversation.
///
/// The dispatcher handle doubles as the status callback: background tasks
/// emit asynchronous frames through it so the monotonic-id invariant holds
/// regardless of which task sends.
#[derive(Clone)]
pub struct RequestContext {
    pub user_id: String,
    pub username: String,
    pub connection_id: String,
    pub conversation_id: String,
    pub client_ip: Option<String>,
    pub dispatcher: Arc<Dispatcher>,
}
