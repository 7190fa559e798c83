//! REST room and message endpoints.
//!
//! DESIGN
//! ======
//! Sending a message is an HTTP POST, not a socket request: persistence
//! assigns the id and timestamp, and the broadcast to joined sockets
//! happens only after the insert commits. The sender receives the stored
//! message in the response body and also as a `message_created` push if
//! it has the room joined.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::error;

use protocol::{ChatMessage, parse_timestamp};

use crate::broadcast::Broadcaster;
use crate::routes::auth::AuthUser;
use crate::services::store::{ChatStore, RoomSummary, StoreError, UnreadCount};
use crate::state::AppState;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

// =============================================================================
// SEND
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("sender is not a member of the room")]
    NotMember,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persist a message, then push it to the room's joined connections.
/// The broadcast happens strictly after the insert commits, so pushes
/// for one sender arrive in `created_at` order.
pub async fn send_message(
    store: &Arc<dyn ChatStore>,
    broadcaster: &Broadcaster,
    user_id: &str,
    room_id: &str,
    content: &str,
) -> Result<ChatMessage, SendError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(SendError::EmptyContent);
    }
    if !store.check_membership(user_id, room_id).await? {
        return Err(SendError::NotMember);
    }

    let message = store.save_message(room_id, user_id, content).await?;
    broadcaster.broadcast_message(room_id, &message).await;
    Ok(message)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api/rooms` — the user's rooms, newest activity first.
pub async fn list_rooms(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<RoomSummary>>, StatusCode> {
    state.store.rooms_for_user(&user.id).await.map(Json).map_err(|e| {
        error!(error = %e, "room list failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    /// RFC 3339 timestamp; only messages strictly older are returned.
    before: Option<String>,
    limit: Option<i64>,
}

/// `GET /api/rooms/{id}/messages` — a page of history, ascending, newest
/// page first. Page backwards by passing the oldest `createdAt` of the
/// previous page as `before`.
pub async fn room_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    let is_member = state.store.check_membership(&user.id, &room_id).await.map_err(|e| {
        error!(error = %e, "membership check failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if !is_member {
        return Err(StatusCode::FORBIDDEN);
    }

    let before = match query.before.as_deref() {
        None => None,
        Some(raw) => Some(parse_timestamp(raw).ok_or(StatusCode::BAD_REQUEST)?),
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    state.store.recent_messages(&room_id, before, limit).await.map(Json).map_err(|e| {
        error!(error = %e, room_id, "history query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Deserialize)]
pub struct PostMessageBody {
    content: String,
}

/// `POST /api/rooms/{id}/messages` — persist and broadcast a message.
pub async fn post_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
    Json(body): Json<PostMessageBody>,
) -> Result<(StatusCode, Json<ChatMessage>), StatusCode> {
    match send_message(&state.store, &state.broadcaster, &user.id, &room_id, &body.content).await {
        Ok(message) => Ok((StatusCode::CREATED, Json(message))),
        Err(SendError::EmptyContent) => Err(StatusCode::BAD_REQUEST),
        Err(SendError::NotMember) => Err(StatusCode::FORBIDDEN),
        Err(SendError::Store(e)) => {
            error!(error = %e, room_id, "message send failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// `POST /api/rooms/{id}/read` — advance the user's read marker to now.
pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state.store.mark_read(&user.id, &room_id).await.map_err(|e| {
        error!(error = %e, room_id, "mark read failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/unread` — per-room unread counts for the user's rooms.
pub async fn unread_counts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<UnreadCount>>, StatusCode> {
    state.store.unread_counts(&user.id).await.map(Json).map_err(|e| {
        error!(error = %e, "unread counts failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
