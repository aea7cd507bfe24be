//! Per-connection outbound dispatcher.
//!
//! The dispatcher owns the write half of the socket and the connection's
//! `last_message_id` counter behind one async mutex. Every outbound frame,
//! whether a direct response or a status update emitted from a background
//! task, allocates `last_message_id + 1` under that lock and advances the
//! counter after the send, so the on-wire id sequence stays gapless and
//! monotonic no matter which task emits. Outbound frames are also appended
//! to the conversation log.

use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde_json::{json, Value as Json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::db::{Direction, MessageRecord, PersistenceGateway};
use crate::error::Result;
use crate::protocol::codes::CODE_MESSAGE_ID_ERROR;
use crate::protocol::Frame;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Serialising sender that assigns outbound message ids.
pub struct Dispatcher {
    inner: Mutex<DispatcherInner>,
    gateway: Arc<dyn PersistenceGateway>,
    conversation_id: String,
}

struct DispatcherInner {
    sink: WsSink,
    last_message_id: i64,
}

impl Dispatcher {
    pub fn new(
        sink: WsSink,
        gateway: Arc<dyn PersistenceGateway>,
        conversation_id: String,
    ) -> Self {
        Self {
            inner: Mutex::new(DispatcherInner {
                sink,
                last_message_id: 0,
            }),
            gateway,
            conversation_id,
        }
    }

    /// Send an outbound frame, allocating the next message id under the lock.
    pub async fn send(&self, request_id: i64, type_code: u16, content: Json) -> Result<Frame> {
        self.send_with_error(request_id, type_code, content, None).await
    }

    /// Send an error frame, recording the error text in the conversation log.
    pub async fn send_with_error(
        &self,
        request_id: i64,
        type_code: u16,
        content: Json,
        error: Option<String>,
    ) -> Result<Frame> {
        let mut inner = self.inner.lock().await;
        let frame = Frame::new(inner.last_message_id + 1, request_id, type_code, content);
        inner.sink.send(Message::Text(frame.to_wire())).await?;
        inner.last_message_id = frame.id;
        self.log_outgoing(&frame, error).await;
        Ok(frame)
    }

    /// Enforce the monotonic-id discipline on an inbound frame.
    ///
    /// On a match the counter advances to the received id and `true` is
    /// returned. On a mismatch a 395 frame carrying the expected and
    /// received ids is sent (using the expected id), the counter is forced
    /// to the expected id, and `false` is returned.
    pub async fn accept_inbound(&self, frame: &Frame) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let expected = inner.last_message_id + 1;
        if frame.id == expected {
            inner.last_message_id = expected;
            return Ok(true);
        }

        tracing::warn!(expected, received = frame.id, "incorrect message id");
        let response = Frame::new(
            expected,
            frame.id,
            CODE_MESSAGE_ID_ERROR,
            json!({
                "error": "incorrect message id",
                "expectedId": expected,
                "receivedId": frame.id,
            }),
        );
        inner.sink.send(Message::Text(response.to_wire())).await?;
        inner.last_message_id = expected;
        self.log_outgoing(&response, Some("incorrect message id".to_string()))
            .await;
        Ok(false)
    }

    /// Current value of the connection's message-id counter.
    pub async fn last_message_id(&self) -> i64 {
        self.inner.lock().await.last_message_id
    }

    async fn log_outgoing(&self, frame: &Frame, error: Option<String>) {
        let record = MessageRecord {
            direction: Direction::Outgoing,
            message_id: Some(frame.id),
            request_id: Some(frame.request_id),
            type_code: Some(frame.type_code as i64),
            status_code: Some(frame.type_code as i64),
            payload: Some(json!({"content": frame.content})),
            error,
        };
        if let Err(err) = self.gateway.log_message(&self.conversation_id, record).await {
            tracing::warn!(error = %err, "failed to log outbound frame");
        }
    }
}
