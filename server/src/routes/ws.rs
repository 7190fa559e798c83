//! WebSocket handler — join/sync requests and message push relay.
//!
//! DESIGN
//! ======
//! The session cookie is checked at upgrade time; a socket is never opened
//! for an unauthenticated client. After upgrade the connection enters a
//! `select!` loop:
//! - Inbound client frames → `process_frame` → at most one ack back
//! - Broadcast frames from room peers → forward to client
//!
//! Handler functions validate and return the ack frame; the connection
//! loop owns all socket writes. Malformed requests degrade to a denial
//! ack (`{ok: false}` for join, `{messages: []}` for sync) rather than an
//! error frame, so an old client can never wedge a newer server.
//!
//! LIFECYCLE
//! =========
//! 1. Cookie → session lookup → upgrade (or 401/500)
//! 2. Client sends `join_room` → membership gate → channel registration
//! 3. `message_created` pushes flow from the broadcaster to the socket
//! 4. Close → leave the joined room channel

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use protocol::{EVENT_JOIN_ROOM, EVENT_SYNC, Frame, KEY_LAST_MESSAGE_TIMESTAMP, KEY_ROOM_ID, Status, parse_timestamp};

use crate::routes::auth::SESSION_COOKIE;
use crate::services::store::SessionUser;
use crate::state::AppState;

// =============================================================================
// CONNECTION CONTEXT
// =============================================================================

/// Per-connection state. Explicitly owned by the connection loop and
/// passed to handlers; nothing is attached to the socket itself.
pub struct ConnContext {
    pub client_id: Uuid,
    pub user: SessionUser,
    /// Room whose broadcast channel this connection is joined to, if any.
    pub room_id: Option<String>,
}

impl ConnContext {
    fn new(user: SessionUser) -> Self {
        Self { client_id: Uuid::new_v4(), user, room_id: None }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let token = jar.get(SESSION_COOKIE).map(Cookie::value).unwrap_or_default();
    if token.is_empty() {
        return (StatusCode::UNAUTHORIZED, "session required").into_response();
    }

    let user = match state.store.session_for_token(token).await {
        Ok(Some(user)) => user,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired session").into_response(),
        Err(e) => {
            error!(error = %e, "ws session validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "session validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user: SessionUser) {
    let mut ctx = ConnContext::new(user);

    // Per-connection channel for frames fanned out by the broadcaster.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    info!(client_id = %ctx.client_id, user_id = %ctx.user.id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if let Some(ack) = process_frame(&state, &mut ctx, &client_tx, &text).await
                            && send_frame(&mut socket, &ack).await.is_err()
                        {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(room_id) = ctx.room_id.take() {
        state.broadcaster.leave(&room_id, ctx.client_id).await;
    }
    info!(client_id = %ctx.client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame, returning the ack to send,
/// if any. Unparseable frames, non-request frames, and unknown events
/// are dropped.
///
/// Separated from the socket loop so tests can exercise the join and
/// sync semantics without a live websocket.
async fn process_frame(
    state: &AppState,
    ctx: &mut ConnContext,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Option<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(client_id = %ctx.client_id, error = %e, "ws: invalid inbound frame");
            return None;
        }
    };

    if req.status != Status::Request {
        debug!(client_id = %ctx.client_id, event = %req.event, "ws: ignoring non-request frame");
        return None;
    }

    match req.event.as_str() {
        EVENT_JOIN_ROOM => Some(handle_join(state, ctx, client_tx, &req).await),
        EVENT_SYNC => Some(handle_sync(state, ctx, &req).await),
        other => {
            debug!(client_id = %ctx.client_id, event = other, "ws: unknown event");
            None
        }
    }
}

// =============================================================================
// JOIN
// =============================================================================

/// Gate a `join_room` request on membership, then register the
/// connection's sender with the broadcaster. Every failure mode acks
/// `{ok: false}`.
async fn handle_join(
    state: &AppState,
    ctx: &mut ConnContext,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Frame {
    let Some(room_id) = req.data_str(KEY_ROOM_ID) else {
        warn!(client_id = %ctx.client_id, "join: missing roomId");
        return req.ack_ok(false);
    };

    match state.store.check_membership(&ctx.user.id, room_id).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(client_id = %ctx.client_id, user_id = %ctx.user.id, room_id, "join: not a member");
            return req.ack_ok(false);
        }
        Err(e) => {
            error!(client_id = %ctx.client_id, error = %e, "join: membership check failed");
            return req.ack_ok(false);
        }
    }

    // A connection listens to at most one room; rejoin replaces it.
    if let Some(old_room) = ctx.room_id.take()
        && old_room != room_id
    {
        state.broadcaster.leave(&old_room, ctx.client_id).await;
    }

    state.broadcaster.join(room_id, ctx.client_id, client_tx.clone()).await;
    ctx.room_id = Some(room_id.to_owned());
    req.ack_ok(true)
}

// =============================================================================
// SYNC
// =============================================================================

/// Gap-fill messages newer than the client's watermark. Validation runs
/// shape, then timestamp, then membership; only then is the store
/// queried. Every failure mode acks an empty message array.
async fn handle_sync(state: &AppState, ctx: &ConnContext, req: &Frame) -> Frame {
    let empty = || req.ack_messages(&[]);

    let Some(room_id) = req.data_str(KEY_ROOM_ID) else {
        warn!(client_id = %ctx.client_id, "sync: missing roomId");
        return empty();
    };
    let Some(raw_ts) = req.data_str(KEY_LAST_MESSAGE_TIMESTAMP) else {
        warn!(client_id = %ctx.client_id, room_id, "sync: missing watermark");
        return empty();
    };
    let Some(since) = parse_timestamp(raw_ts) else {
        warn!(client_id = %ctx.client_id, room_id, raw_ts, "sync: unparseable watermark");
        return empty();
    };

    match state.store.check_membership(&ctx.user.id, room_id).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(client_id = %ctx.client_id, user_id = %ctx.user.id, room_id, "sync: not a member");
            return empty();
        }
        Err(e) => {
            error!(client_id = %ctx.client_id, error = %e, "sync: membership check failed");
            return empty();
        }
    }

    match state.store.messages_since(room_id, since).await {
        Ok(messages) => {
            debug!(client_id = %ctx.client_id, room_id, count = messages.len(), "sync: gap filled");
            req.ack_messages(&messages)
        }
        Err(e) => {
            error!(client_id = %ctx.client_id, error = %e, "sync: query failed");
            empty()
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
