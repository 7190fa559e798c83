//! Shared wire model for the chat sync protocol.
//!
//! This crate owns the wire representation used by both `server` and
//! `client`: the message record, the JSON frame envelope with request/ack
//! correlation, and the validation boundary that turns untrusted socket
//! payloads into typed messages.
//!
//! DESIGN
//! ======
//! - Flexible payloads: frame `data` is always `serde_json::Value`; typed
//!   meaning is applied at the edges, never by the envelope.
//! - Acks correlate to requests via `parent_id` and carry `{ok}` or
//!   `{messages}`; pushes carry a message and expect no response.
//! - Validation is permissive on `createdAt`: RFC 3339 strings and epoch
//!   millisecond numbers both normalize to [`OffsetDateTime`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

// =============================================================================
// EVENTS
// =============================================================================

/// Client request: join a room's broadcast channel.
pub const EVENT_JOIN_ROOM: &str = "join_room";

/// Client request: gap-fill messages newer than a watermark.
pub const EVENT_SYNC: &str = "sync";

/// Server push: a newly persisted message.
pub const EVENT_MESSAGE_CREATED: &str = "message_created";

/// Frame data key for the join acknowledgment flag.
pub const KEY_OK: &str = "ok";

/// Frame data key for the sync acknowledgment message array.
pub const KEY_MESSAGES: &str = "messages";

/// Frame data key for the room scope of a request.
pub const KEY_ROOM_ID: &str = "roomId";

/// Frame data key for the sync watermark.
pub const KEY_LAST_MESSAGE_TIMESTAMP: &str = "lastMessageTimestamp";

// =============================================================================
// MESSAGE
// =============================================================================

/// A chat message. Immutable once created; the store assigns `id` and
/// `created_at` at persistence time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Validate an untrusted socket payload as a chat message.
///
/// Accepts only a non-null object with a non-empty string `id`, string
/// `roomId`, `senderId`, and `content`, and a `createdAt` that is either an
/// RFC 3339 string or epoch milliseconds. Anything else yields `None`; the
/// rest of the system never filters payloads itself.
#[must_use]
pub fn socket_message(data: &Value) -> Option<ChatMessage> {
    let obj = data.as_object()?;

    let id = obj.get("id")?.as_str()?;
    if id.is_empty() {
        return None;
    }
    let room_id = obj.get("roomId")?.as_str()?;
    let sender_id = obj.get("senderId")?.as_str()?;
    let content = obj.get("content")?.as_str()?;
    let created_at = normalize_created_at(obj.get("createdAt")?)?;

    Some(ChatMessage {
        id: id.to_owned(),
        room_id: room_id.to_owned(),
        sender_id: sender_id.to_owned(),
        content: content.to_owned(),
        created_at,
    })
}

fn normalize_created_at(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let ms = n.as_i64()?;
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
        }
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp string.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

/// Format a timestamp as RFC 3339 for the wire.
#[must_use]
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

// =============================================================================
// FRAME
// =============================================================================

/// Lifecycle position of a frame in a request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Client-initiated request expecting an ack.
    Request,
    /// Terminal response correlated to a request via `parent_id`.
    Ack,
    /// Server-initiated fire-and-forget event.
    Push,
}

/// The single message type on the realtime wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    pub event: String,
    pub status: Status,
    pub data: Value,
}

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a request frame.
    pub fn request(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            event: event.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create a push frame. No response is expected.
    pub fn push(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            event: event.into(),
            status: Status::Push,
            data,
        }
    }

    /// Create the ack for this request. Inherits the event name and
    /// records this frame's id as `parent_id`.
    #[must_use]
    pub fn ack(&self, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            event: self.event.clone(),
            status: Status::Ack,
            data,
        }
    }

    /// Ack carrying `{ok: bool}`. Used for `join_room`.
    #[must_use]
    pub fn ack_ok(&self, ok: bool) -> Self {
        self.ack(serde_json::json!({ KEY_OK: ok }))
    }

    /// Ack carrying `{messages: [...]}`. Used for `sync`.
    #[must_use]
    pub fn ack_messages(&self, messages: &[ChatMessage]) -> Self {
        let value = serde_json::to_value(messages).unwrap_or_else(|_| Value::Array(Vec::new()));
        self.ack(serde_json::json!({ KEY_MESSAGES: value }))
    }

    /// Fetch a string field from `data`.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
