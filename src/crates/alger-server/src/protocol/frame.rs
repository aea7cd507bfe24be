//! Framed message codec.
//!
//! A frame is a JSON object with exactly four fields: integer `id`,
//! integer `requestId`, integer `type`, and a string `content` whose decoded
//! value is the payload object. Parsing is strict; any envelope violation
//! surfaces as a [`ProtocolError`] carrying the error code chosen by the
//! caller.

use serde_json::{json, Value as Json};
use thiserror::Error;

/// A frame violated the envelope rules.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProtocolError {
    pub message: String,
    pub error_code: u16,
}

impl ProtocolError {
    fn new(message: impl Into<String>, error_code: u16) -> Self {
        Self {
            message: message.into(),
            error_code,
        }
    }
}

/// Typed representation of a protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonic message identifier
    pub id: i64,
    /// Id of the frame this one responds to; 0 for client-initiated frames
    pub request_id: i64,
    /// Request type code or response status code
    pub type_code: u16,
    /// Decoded payload object
    pub content: Json,
}

impl Frame {
    pub fn new(id: i64, request_id: i64, type_code: u16, content: Json) -> Self {
        Self {
            id,
            request_id,
            type_code,
            content,
        }
    }

    /// Parse and validate a raw payload.
    pub fn parse(raw: &str, error_code: u16) -> Result<Self, ProtocolError> {
        let decoded: Json = serde_json::from_str(raw)
            .map_err(|_| ProtocolError::new("Payload is not valid JSON", error_code))?;

        let id = integer_field(&decoded, "id", error_code)?;
        let request_id = integer_field(&decoded, "requestId", error_code)?;
        let type_raw = integer_field(&decoded, "type", error_code)?;
        let type_code = u16::try_from(type_raw).map_err(|_| {
            ProtocolError::new("Missing or non-integer protocol fields", error_code)
        })?;

        let content_raw = decoded
            .get("content")
            .ok_or_else(|| ProtocolError::new("Missing or non-integer protocol fields", error_code))?;
        let content_str = content_raw.as_str().ok_or_else(|| {
            ProtocolError::new("Content field must be a JSON-encoded string", error_code)
        })?;
        let content: Json = if content_str.is_empty() {
            json!({})
        } else {
            serde_json::from_str(content_str)
                .map_err(|_| ProtocolError::new("Content must contain valid JSON", error_code))?
        };

        Ok(Self {
            id,
            request_id,
            type_code,
            content,
        })
    }

    /// Serialise to the wire form, re-encoding the payload as a string.
    pub fn to_wire(&self) -> String {
        json!({
            "id": self.id,
            "requestId": self.request_id,
            "type": self.type_code,
            "content": self.content.to_string(),
        })
        .to_string()
    }

    /// The frame as a plain JSON object with the payload decoded, used for
    /// conversation logging.
    pub fn to_log_json(&self) -> Json {
        json!({
            "id": self.id,
            "requestId": self.request_id,
            "type": self.type_code,
            "content": self.content,
        })
    }
}

fn integer_field(decoded: &Json, key: &str, error_code: u16) -> Result<i64, ProtocolError> {
    decoded
        .get(key)
        .and_then(Json::as_i64)
        .ok_or_else(|| ProtocolError::new("Missing or non-integer protocol fields", error_code))
}
