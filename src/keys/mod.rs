//! Key-directory engine (C4)
//!
//! Upload and consumption of signed and one-time pre-keys, and assembly of
//! the X3DH pre-key bundle. The server never inspects key material beyond
//! its encoding — it stores and serves opaque base64 blobs.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::crypto::{is_well_formed_public_key, is_well_formed_signature};
use crate::db::queries;
use crate::error::{ok, ApiError, ApiResult};

/// Client-replenishment threshold for [`count_one_time_pre_keys`]. Fixed —
/// not independently configurable; the configurable `LOW_KEY_THRESHOLD`
/// governs only `verifyChallenge`'s `lowKeyWarn` hint.
const CLIENT_REPLENISH_THRESHOLD: i64 = 10;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UploadSignedPreKeyRequest {
    pub key_id: i32,
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct OneTimePreKeyInput {
    pub key_id: i32,
    pub public_key: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UploadOneTimePreKeysRequest {
    pub keys: Vec<OneTimePreKeyInput>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PreKeyBundle {
    pub user_id: Uuid,
    pub username: String,
    pub registration_id: i32,
    pub identity_public_key: String,
    pub signed_pre_key: SignedPreKeyView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key: Option<OneTimePreKeyView>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SignedPreKeyView {
    pub key_id: i32,
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OneTimePreKeyView {
    pub key_id: i32,
    pub public_key: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OneTimeKeyCount {
    pub count: i64,
    pub needs_replenishment: bool,
}

/// `POST /api/keys/signed-pre-key`
///
/// Upserts by `(userId, keyId)` then reaps every row beyond the 5 most
/// recently created for this user, in the same transaction.
#[utoipa::path(
    post,
    path = "/api/keys/signed-pre-key",
    tag = "keys",
    request_body = UploadSignedPreKeyRequest,
    responses((status = 200)),
    security(("bearer_auth" = [])),
)]
pub async fn upload_signed_pre_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UploadSignedPreKeyRequest>,
) -> ApiResult<axum::response::Response> {
    if !is_well_formed_public_key(&body.public_key) {
        return Err(ApiError::BadRequest("public_key must be a base64-encoded 32-byte key".into()));
    }
    if !is_well_formed_signature(&body.signature) {
        return Err(ApiError::BadRequest("signature must be a base64-encoded 64-byte signature".into()));
    }

    let row = queries::upsert_signed_pre_key(&state.db, auth.user_id, body.key_id, &body.public_key, &body.signature)
        .await?;

    Ok(ok(SignedPreKeyView {
        key_id: row.key_id,
        public_key: row.public_key,
        signature: row.signature,
    }))
}

/// `POST /api/keys/one-time-pre-keys`
#[utoipa::path(
    post,
    path = "/api/keys/one-time-pre-keys",
    tag = "keys",
    request_body = UploadOneTimePreKeysRequest,
    responses((status = 200)),
    security(("bearer_auth" = [])),
)]
pub async fn upload_one_time_pre_keys(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UploadOneTimePreKeysRequest>,
) -> ApiResult<axum::response::Response> {
    for key in &body.keys {
        if !is_well_formed_public_key(&key.public_key) {
            return Err(ApiError::BadRequest("every public_key must be a base64-encoded 32-byte key".into()));
        }
    }

    let keys: Vec<(i32, String)> = body.keys.into_iter().map(|k| (k.key_id, k.public_key)).collect();
    let inserted = queries::insert_one_time_pre_keys(&state.db, auth.user_id, &keys).await?;

    Ok(ok(serde_json::json!({ "inserted": inserted })))
}

/// `GET /api/keys/bundle/:userId`
///
/// Consuming fetch: the returned one-time pre-key, if any, is deleted in the
/// same transaction it was read from. A second concurrent request never sees
/// the same key.
#[utoipa::path(
    get,
    path = "/api/keys/bundle/{user_id}",
    tag = "keys",
    params(("user_id" = Uuid, Path)),
    responses((status = 200, body = PreKeyBundle), (status = 404)),
    security(("bearer_auth" = [])),
)]
pub async fn get_bundle(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<axum::response::Response> {
    let user = queries::find_user_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    let signed_pre_key = queries::latest_signed_pre_key(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user has no signed pre-key published".into()))?;

    let one_time_pre_key = queries::consume_one_time_pre_key(&state.db, user_id).await?;

    Ok(ok(PreKeyBundle {
        user_id: user.id,
        username: user.username,
        registration_id: user.registration_id,
        identity_public_key: user.identity_public_key,
        signed_pre_key: SignedPreKeyView {
            key_id: signed_pre_key.key_id,
            public_key: signed_pre_key.public_key,
            signature: signed_pre_key.signature,
        },
        one_time_pre_key: one_time_pre_key.map(|k| OneTimePreKeyView {
            key_id: k.key_id,
            public_key: k.public_key,
        }),
    }))
}

/// `GET /api/keys/one-time-pre-keys/count/:userId`
#[utoipa::path(
    get,
    path = "/api/keys/one-time-pre-keys/count/{user_id}",
    tag = "keys",
    params(("user_id" = Uuid, Path)),
    responses((status = 200, body = OneTimeKeyCount)),
    security(("bearer_auth" = [])),
)]
pub async fn count_one_time_pre_keys(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<axum::response::Response> {
    let count = queries::count_one_time_pre_keys(&state.db, user_id).await?;
    Ok(ok(OneTimeKeyCount { count, needs_replenishment: count < CLIENT_REPLENISH_THRESHOLD }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signed-pre-key", post(upload_signed_pre_key))
        .route("/one-time-pre-keys", post(upload_one_time_pre_keys))
        .route("/bundle/{user_id}", get(get_bundle))
        .route("/one-time-pre-keys/count/{user_id}", get(count_one_time_pre_keys))
}
