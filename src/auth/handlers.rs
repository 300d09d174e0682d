//! Authentication engine handlers (C3): `issueChallenge`, `verifyChallenge`,
//! `logout`.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::jwt::issue_token;
use super::middleware::AuthUser;
use crate::api::AppState;
use crate::crypto::{generate_nonce_hex, is_well_formed_signature, verify_signature};
use crate::db::queries;
use crate::error::{ok, ApiError, ApiResult};

const CHALLENGE_TTL: ChronoDuration = ChronoDuration::seconds(120);
const MAX_DEVICE_ID_LEN: usize = 255;

lazy_static! {
    static ref FCM_TOKEN_RE: Regex = Regex::new(r"^[A-Za-z0-9_\-:.]{1,512}$").expect("valid regex");
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ChallengeRequest {
    pub username: String,
    pub device_id: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ChallengeResponse {
    pub nonce: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct VerifyRequest {
    pub username: String,
    pub signature: String,
    pub device_id: String,
    #[serde(default)]
    pub fcm_token: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VerifyResponse {
    pub token: String,
    pub user: crate::db::models::User,
    pub remaining_one_time_key_count: i64,
    pub low_key_warn: bool,
}

/// `POST /api/auth/challenge`
///
/// Never reveals whether `username` exists: an unknown username renders the
/// same [`ApiError::AuthFailed`] as any other failure in this flow.
#[utoipa::path(
    post,
    path = "/api/auth/challenge",
    tag = "auth",
    request_body = ChallengeRequest,
    responses((status = 200, body = ChallengeResponse), (status = 401), (status = 400)),
)]
pub async fn issue_challenge(
    State(state): State<AppState>,
    Json(body): Json<ChallengeRequest>,
) -> ApiResult<axum::response::Response> {
    if body.device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(ApiError::BadRequest("device_id exceeds 255 characters".into()));
    }

    let user = queries::find_user_by_username(&state.db, &body.username)
        .await?
        .ok_or(ApiError::AuthFailed)?;

    let nonce = generate_nonce_hex();
    queries::create_challenge(&state.db, user.id, &nonce, CHALLENGE_TTL).await?;

    Ok(ok(ChallengeResponse { nonce }))
}

/// `POST /api/auth/verify`
///
/// The challenge row is always deleted before this function returns,
/// independent of whether the signature checks out — a second verify call
/// against the same challenge always fails, which is what makes this
/// resistant to brute-forcing the signature.
#[utoipa::path(
    post,
    path = "/api/auth/verify",
    tag = "auth",
    request_body = VerifyRequest,
    responses((status = 200, body = VerifyResponse), (status = 401), (status = 400)),
)]
pub async fn verify_challenge(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> ApiResult<axum::response::Response> {
    if body.device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(ApiError::BadRequest("device_id exceeds 255 characters".into()));
    }
    if !is_well_formed_signature(&body.signature) {
        return Err(ApiError::BadRequest("signature must be a base64-encoded 64-byte signature".into()));
    }
    if let Some(ref fcm) = body.fcm_token {
        if !FCM_TOKEN_RE.is_match(fcm) {
            return Err(ApiError::BadRequest("fcm_token has an invalid format".into()));
        }
    }

    let user = queries::find_user_by_username(&state.db, &body.username)
        .await?
        .ok_or(ApiError::AuthFailed)?;

    let challenge = queries::take_challenge(&state.db, user.id).await?;
    let challenge = challenge.ok_or(ApiError::AuthFailed)?;
    if challenge.expires_at < Utc::now() {
        return Err(ApiError::AuthFailed);
    }

    verify_signature(&user.identity_public_key, challenge.nonce.as_bytes(), &body.signature)
        .map_err(|_| ApiError::AuthFailed)?;

    queries::replace_device(
        &state.db,
        user.id,
        &body.device_id,
        &user.identity_public_key,
        user.registration_id,
        body.fcm_token.as_deref(),
    )
    .await?;

    let token = issue_token(
        &state.config.session_token_secret,
        user.id,
        &body.device_id,
        state.config.session_token_ttl,
    )
    .map_err(|_| ApiError::Internal)?;

    let remaining_one_time_key_count = queries::count_one_time_pre_keys(&state.db, user.id).await?;
    let low_key_warn = remaining_one_time_key_count < i64::from(state.config.low_key_threshold);

    Ok(ok(VerifyResponse {
        token,
        user,
        remaining_one_time_key_count,
        low_key_warn,
    }))
}

/// `POST /api/auth/logout`
///
/// Deletes the caller's own `(userId, deviceId)` device row. Idempotent:
/// logging out twice is not an error.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    responses((status = 200)),
    security(("bearer_auth" = [])),
)]
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> ApiResult<axum::response::Response> {
    queries::delete_device(&state.db, auth.user_id, &auth.device_id).await?;
    Ok(ok(serde_json::json!({})))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/challenge", post(issue_challenge))
        .route("/verify", post(verify_challenge))
        .route("/logout", post(logout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fcm_token_regex_accepts_typical_tokens() {
        assert!(FCM_TOKEN_RE.is_match("abcDEF123_-:.456"));
    }

    #[test]
    fn fcm_token_regex_rejects_spaces() {
        assert!(!FCM_TOKEN_RE.is_match("has space"));
    }

    #[test]
    fn rejects_oversized_device_id() {
        let long = "a".repeat(256);
        assert!(long.len() > MAX_DEVICE_ID_LEN);
    }
}
