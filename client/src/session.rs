//! Room session — the per-room protocol state machine.
//!
//! DESIGN
//! ======
//! A [`RoomSession`] owns a spawned task that drives a [`Transport`]:
//! join the room on connect, hand validated `message_created` pushes to the
//! caller's handler, and on every transport-level reconnect re-join and
//! issue a one-shot `sync` carrying the caller's watermark.
//!
//! The session never retries anything itself; the only retry loop in the
//! client is the transport's own reconnect backoff. A denied or failed join
//! ack is logged and left alone — the reconnect path is the recovery route.
//!
//! LIFECYCLE
//! =========
//! Disconnected → Connecting → Joined → (drop) → Reconnecting → Joined,
//! until [`RoomSession::disconnect`] stops the loop. Disconnect is total:
//! the task finishes (and with it every callback) before the transport is
//! closed and the call returns.

use async_trait::async_trait;
use protocol::{
    ChatMessage, EVENT_JOIN_ROOM, EVENT_MESSAGE_CREATED, EVENT_SYNC, Frame, KEY_MESSAGES,
    KEY_LAST_MESSAGE_TIMESTAMP, KEY_OK, KEY_ROOM_ID, format_timestamp, socket_message,
};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// =============================================================================
// TRANSPORT SEAM
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection dropped before the ack arrived.
    #[error("connection lost")]
    ConnectionLost,
    /// The transport has been closed and accepts no more traffic.
    #[error("transport closed")]
    Closed,
}

/// Transport-level occurrences the session reacts to.
#[derive(Debug)]
pub enum TransportEvent {
    /// A server-initiated frame (`status: push`).
    Push(Frame),
    /// The underlying connection dropped and was re-established.
    Reconnected,
    /// The transport is permanently gone.
    Closed,
}

/// A persistent bidirectional message channel. Implemented for real by
/// [`crate::ws::WsTransport`]; the trait exists so session behavior is
/// testable against a scripted mock.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a request frame and await its correlated ack. There is no
    /// timeout: a stuck ack resolves only when the connection drops.
    async fn request(&mut self, frame: Frame) -> Result<Frame, TransportError>;

    /// Send a frame without waiting for a response.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Next transport event. `None` once the transport is closed.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Tear the connection down.
    async fn close(&mut self);
}

// =============================================================================
// SESSION HANDLER
// =============================================================================

/// Caller-supplied sink for session output. Callbacks run on the session
/// task, never concurrently with each other.
pub trait SessionHandler: Send + 'static {
    /// A validated live message arrived.
    fn on_message(&mut self, msg: ChatMessage);

    /// A reconnect gap-fill produced at least one valid message.
    fn on_sync(&mut self, messages: Vec<ChatMessage>);

    /// The caller's current watermark; `None` means no history yet and
    /// suppresses the sync request entirely.
    fn last_timestamp(&self) -> Option<OffsetDateTime>;
}

// =============================================================================
// SESSION
// =============================================================================

/// Handle to a running room session.
pub struct RoomSession {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RoomSession {
    /// Open a session on `transport` for `room_id`. Emits `join_room`
    /// immediately; live messages and sync batches flow into `handler`.
    pub fn connect<T, H>(transport: T, room_id: impl Into<String>, handler: H) -> Self
    where
        T: Transport,
        H: SessionHandler,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(transport, room_id.into(), handler, shutdown_rx));
        Self { shutdown: Some(shutdown_tx), task: Some(task) }
    }

    /// Stop the session. The event loop is fully stopped before the
    /// transport closes; no handler callback fires after this returns.
    pub async fn disconnect(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn run_session<T: Transport, H: SessionHandler>(
    mut transport: T,
    room_id: String,
    mut handler: H,
    mut shutdown: oneshot::Receiver<()>,
) {
    join_room(&mut transport, &room_id).await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = transport.next_event() => match event {
                Some(TransportEvent::Push(frame)) => handle_push(&frame, &mut handler),
                Some(TransportEvent::Reconnected) => {
                    resync(&mut transport, &room_id, &mut handler).await;
                }
                Some(TransportEvent::Closed) | None => break,
            },
        }
    }

    transport.close().await;
}

/// Initial join with acknowledgment. A denied or failed ack is logged and
/// not retried — there is no re-join loop outside the reconnect path.
async fn join_room<T: Transport>(transport: &mut T, room_id: &str) {
    let req = Frame::request(EVENT_JOIN_ROOM, json!({ KEY_ROOM_ID: room_id }));
    match transport.request(req).await {
        Ok(ack) => {
            let ok = ack.data.get(KEY_OK).and_then(Value::as_bool).unwrap_or(false);
            if !ok {
                warn!(room_id, "join_room denied");
            }
        }
        Err(e) => warn!(room_id, error = %e, "join_room failed"),
    }
}

/// Validate a push frame and deliver it. Invalid payloads are dropped
/// silently; a malformed server frame must never take the session down.
fn handle_push<H: SessionHandler>(frame: &Frame, handler: &mut H) {
    if frame.event != EVENT_MESSAGE_CREATED {
        debug!(event = %frame.event, "ignoring unknown push event");
        return;
    }
    match socket_message(&frame.data) {
        Some(msg) => handler.on_message(msg),
        None => debug!("dropping invalid message_created payload"),
    }
}

/// Reconnect path: re-join (fire-and-forget, no ack handling), then a
/// one-shot sync from the caller's watermark. No watermark, no sync.
async fn resync<T: Transport, H: SessionHandler>(
    transport: &mut T,
    room_id: &str,
    handler: &mut H,
) {
    let rejoin = Frame::request(EVENT_JOIN_ROOM, json!({ KEY_ROOM_ID: room_id }));
    if let Err(e) = transport.send(rejoin).await {
        warn!(room_id, error = %e, "re-join after reconnect failed");
        return;
    }

    let Some(watermark) = handler.last_timestamp() else {
        return;
    };

    let req = Frame::request(
        EVENT_SYNC,
        json!({
            KEY_ROOM_ID: room_id,
            KEY_LAST_MESSAGE_TIMESTAMP: format_timestamp(watermark),
        }),
    );
    match transport.request(req).await {
        Ok(ack) => {
            let valid: Vec<ChatMessage> = ack
                .data
                .get(KEY_MESSAGES)
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(socket_message).collect())
                .unwrap_or_default();
            if !valid.is_empty() {
                handler.on_sync(valid);
            }
        }
        Err(e) => warn!(room_id, error = %e, "sync after reconnect failed"),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
