//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the REST message/room endpoints and the websocket upgrade under a
//! single Axum router. All `/api` routes except the health check require a
//! valid session cookie.

pub mod auth;
pub mod rooms;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/rooms", get(rooms::list_rooms))
        .route(
            "/api/rooms/{id}/messages",
            get(rooms::room_messages).post(rooms::post_message),
        )
        .route("/api/rooms/{id}/read", post(rooms::mark_read))
        .route("/api/unread", get(rooms::unread_counts))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
