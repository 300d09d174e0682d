//! Bearer token extraction and verification (`verifyBearer`, C3).
//!
//! `AuthUser` is an Axum extractor: using it as a handler parameter performs
//! extraction and cryptographic verification as a single operation with
//! exactly two outcomes — a valid `(userId, deviceId)` payload, or rejection.
//! No branch between "header present" and "header absent" is allowed to skip
//! verification; both paths fall through to the same check.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use uuid::Uuid;

use super::jwt::verify_token;
use crate::api::AppState;
use crate::db::queries;
use crate::error::ApiError;

/// The authenticated identity attached to a request after a bearer token has
/// been verified against both its signature and the device directory.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub device_id: String,
}

/// Verify a bearer token end-to-end: signature, expiry, and that a `Device`
/// row for `(userId, deviceId)` still exists. Opportunistically bumps
/// `lastSeenAt` without blocking the result on that write's outcome.
async fn verify_bearer(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = verify_token(&state.config.session_token_secret, token).map_err(|_| ApiError::Unauthenticated)?;

    let device = queries::find_device(&state.db, claims.user_id, &claims.device_id)
        .await
        .map_err(|_| ApiError::Unauthenticated)?;

    if device.is_none() {
        return Err(ApiError::Unauthenticated);
    }

    let db = state.db.clone();
    let user_id = claims.user_id;
    let device_id = claims.device_id.clone();
    tokio::spawn(async move {
        let _ = queries::touch_device_last_seen(&db, user_id, &device_id).await;
    });

    Ok(AuthUser {
        user_id: claims.user_id,
        device_id: claims.device_id,
    })
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        match token {
            Some(token) => verify_bearer(&app_state, token).await,
            None => Err(ApiError::Unauthenticated),
        }
    }
}
