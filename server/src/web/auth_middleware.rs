use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use tracing::debug;

use crate::engine::user_session::Actor;

use super::app_state::AppState;

/// Extractor that resolves the access-token cookie to a known user.
/// Use this in any handler that requires authentication.
pub struct AuthUser(pub Actor);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let cookie = jar
            .get(&state.cookie_name)
            .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Not authenticated").into_response())?;

        let actor = state.engine.authenticate(cookie.value()).await.map_err(|e| {
            debug!("rejected session cookie: {e}");
            (StatusCode::UNAUTHORIZED, "Invalid or expired session").into_response()
        })?;

        Ok(AuthUser(actor))
    }
}
