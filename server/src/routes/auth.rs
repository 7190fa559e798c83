//! Session authentication: cookie extractor and the `me` endpoint.
//!
//! Sessions are issued by the account service; this server only resolves
//! the `session_token` cookie against the sessions table.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::StatusCode;
use axum::response::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::error;

use crate::services::store::SessionUser;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session_token";

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user extracted from the session cookie.
/// Use as a handler parameter to require authentication.
pub struct AuthUser(pub SessionUser);

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(SESSION_COOKIE).map(Cookie::value).unwrap_or_default();
        if token.is_empty() {
            return Err(StatusCode::UNAUTHORIZED);
        }

        let app_state = AppState::from_ref(state);
        let user = app_state
            .store
            .session_for_token(token)
            .await
            .map_err(|e| {
                error!(error = %e, "session lookup failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self(user))
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api/auth/me` — the user behind the current session.
pub async fn me(AuthUser(user): AuthUser) -> Json<SessionUser> {
    Json(user)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
