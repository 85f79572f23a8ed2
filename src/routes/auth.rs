//! Admin authentication extractor.

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;

use crate::services::session;
use crate::state::AppState;

/// Identity used for messages sent through the REST dashboard.
pub const REST_ADMIN_ID: &str = "admin";

/// Proof that the request carried the admin bearer token.
/// Use as a handler parameter to require support-staff access.
pub struct AdminAuth;

impl<S> axum::extract::FromRequestParts<S> for AdminAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let Some(token) = session::bearer_token(header) else {
            return Err(StatusCode::UNAUTHORIZED);
        };

        let app_state = AppState::from_ref(state);
        if !session::token_matches(&app_state.config.admin_token, token) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Self)
    }
}
