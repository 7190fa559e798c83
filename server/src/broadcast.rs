//! Broadcast dispatcher — room-scoped fan-out of new messages.
//!
//! DESIGN
//! ======
//! An explicitly constructed instance lives in `AppState` and is passed to
//! every handler that emits. The registry maps a room id to the senders of
//! its currently-joined connections; fan-out is fire-and-forget via
//! `try_send`, so one slow client cannot stall a room.
//!
//! Ordering: for a single sender, sequential sends preserve the
//! store-assigned `created_at` order because each send completes its
//! insert before broadcasting. Nothing is guaranteed across concurrent
//! senders beyond commit order.

use std::collections::HashMap;
use std::sync::Arc;

use protocol::{ChatMessage, EVENT_MESSAGE_CREATED, Frame};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::info;
use uuid::Uuid;

type RoomRegistry = HashMap<String, HashMap<Uuid, mpsc::Sender<Frame>>>;

/// Room-scoped broadcast dispatcher. Cheap to clone; clones share the
/// registry.
#[derive(Clone, Default)]
pub struct Broadcaster {
    rooms: Arc<RwLock<RoomRegistry>>,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's sender in a room channel.
    pub async fn join(&self, room_id: &str, client_id: Uuid, tx: mpsc::Sender<Frame>) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room_id.to_owned()).or_default();
        members.insert(client_id, tx);
        info!(room_id, %client_id, members = members.len(), "client joined room channel");
    }

    /// Remove a connection from a room channel. Empty rooms are evicted.
    pub async fn leave(&self, room_id: &str, client_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return;
        };
        members.remove(&client_id);
        info!(room_id, %client_id, remaining = members.len(), "client left room channel");
        if members.is_empty() {
            rooms.remove(room_id);
        }
    }

    /// Push a newly persisted message to every joined member of the room.
    pub async fn broadcast_message(&self, room_id: &str, msg: &ChatMessage) {
        let data = serde_json::to_value(msg).unwrap_or(Value::Null);
        self.broadcast(room_id, &Frame::push(EVENT_MESSAGE_CREATED, data)).await;
    }

    /// Fan a frame out to every member of a room. Best-effort: a client
    /// whose channel is full is skipped.
    pub async fn broadcast(&self, room_id: &str, frame: &Frame) {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room_id) else {
            return;
        };
        for tx in members.values() {
            let _ = tx.try_send(frame.clone());
        }
    }

    /// Number of connections currently joined to a room.
    pub async fn member_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
