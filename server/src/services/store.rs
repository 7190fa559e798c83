//! Chat persistence.
//!
//! DESIGN
//! ======
//! All database access goes through the `ChatStore` trait so that socket
//! and REST handlers can be tested against an in-memory mock. `PgStore`
//! is the production implementation over the shared SQLx pool.
//!
//! Message timestamps are assigned by Postgres at insert time; the
//! watermark query (`messages_since`) is strictly greater-than, so a
//! client that already holds the message at the watermark never receives
//! it again.

use async_trait::async_trait;
use protocol::ChatMessage;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The user a session token resolves to.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
}

/// One row of the room list: the room plus a preview of its latest
/// message. `name` is the display name of the other participant and is
/// absent for rooms the peer has left.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub name: Option<String>,
    pub last_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
}

/// Unread message count for one of the user's rooms.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub room_id: String,
    pub count: i64,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Persistence operations used by the socket and REST handlers.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Resolve an unexpired session token to its user.
    async fn session_for_token(&self, token: &str) -> Result<Option<SessionUser>, StoreError>;

    /// Whether the user is a member of the room.
    async fn check_membership(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError>;

    /// Messages created strictly after `since`, ascending by `created_at`.
    async fn messages_since(
        &self,
        room_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Up to `limit` of the newest messages before `before` (or the newest
    /// overall), returned ascending so the page appends cleanly.
    async fn recent_messages(
        &self,
        room_id: &str,
        before: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Persist a new message. The id is assigned here, the timestamp by
    /// the database.
    async fn save_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, StoreError>;

    /// The user's rooms, newest activity first.
    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomSummary>, StoreError>;

    /// Per-room counts of messages newer than the user's read marker.
    async fn unread_counts(&self, user_id: &str) -> Result<Vec<UnreadCount>, StoreError>;

    /// Advance the user's read marker for a room to now.
    async fn mark_read(&self, user_id: &str, room_id: &str) -> Result<(), StoreError>;
}

// =============================================================================
// POSTGRES IMPLEMENTATION
// =============================================================================

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type MessageRow = (String, String, String, String, OffsetDateTime);

fn row_to_message(row: MessageRow) -> ChatMessage {
    let (id, room_id, sender_id, content, created_at) = row;
    ChatMessage { id, room_id, sender_id, content, created_at }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn session_for_token(&self, token: &str) -> Result<Option<SessionUser>, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT u.id, u.name
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name)| SessionUser { id, name }))
    }

    async fn check_membership(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM room_users WHERE user_id = $1 AND room_id = $2",
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn messages_since(
        &self,
        room_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, room_id, sender_id, content, created_at
             FROM messages
             WHERE room_id = $1 AND created_at > $2
             ORDER BY created_at ASC",
        )
        .bind(room_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    async fn recent_messages(
        &self,
        room_id: &str,
        before: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, room_id, sender_id, content, created_at
             FROM messages
             WHERE room_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(room_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<ChatMessage> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    async fn save_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let id = Uuid::new_v4().to_string();
        let (created_at,): (OffsetDateTime,) = sqlx::query_as(
            "INSERT INTO messages (id, room_id, sender_id, content)
             VALUES ($1, $2, $3, $4)
             RETURNING created_at",
        )
        .bind(&id)
        .bind(room_id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatMessage {
            id,
            room_id: room_id.to_owned(),
            sender_id: sender_id.to_owned(),
            content: content.to_owned(),
            created_at,
        })
    }

    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomSummary>, StoreError> {
        let rows: Vec<(String, Option<String>, Option<String>, Option<OffsetDateTime>)> =
            sqlx::query_as(
                "SELECT r.id,
                        (SELECT u.name
                         FROM room_users peer
                         JOIN users u ON u.id = peer.user_id
                         WHERE peer.room_id = r.id AND peer.user_id <> $1
                         ORDER BY u.name
                         LIMIT 1) AS name,
                        latest.content,
                        latest.created_at
                 FROM rooms r
                 JOIN room_users ru ON ru.room_id = r.id AND ru.user_id = $1
                 LEFT JOIN LATERAL (
                     SELECT content, created_at
                     FROM messages
                     WHERE room_id = r.id
                     ORDER BY created_at DESC
                     LIMIT 1
                 ) latest ON TRUE
                 ORDER BY latest.created_at DESC NULLS LAST, r.created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, last_message, last_message_at)| RoomSummary {
                id,
                name,
                last_message,
                last_message_at,
            })
            .collect())
    }

    async fn unread_counts(&self, user_id: &str) -> Result<Vec<UnreadCount>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT ru.room_id, count(m.id)
             FROM room_users ru
             LEFT JOIN messages m
               ON m.room_id = ru.room_id
              AND m.created_at > ru.last_read_at
              AND m.sender_id <> $1
             WHERE ru.user_id = $1
             GROUP BY ru.room_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(room_id, count)| UnreadCount { room_id, count }).collect())
    }

    async fn mark_read(&self, user_id: &str, room_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE room_users SET last_read_at = now()
             WHERE user_id = $1 AND room_id = $2",
        )
        .bind(user_id)
        .bind(room_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// MOCK STORE
// =============================================================================


#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
