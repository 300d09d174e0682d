//! User directory (C0)
//!
//! CRUD-ish operations over the `User` entity itself, distinct from the
//! authentication state machine in [`crate::auth`] which owns challenges and
//! devices.

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::api::AppState;
use crate::crypto::is_well_formed_public_key;
use crate::db::models::User;
use crate::db::queries;
use crate::error::{ok, ApiError, ApiResult};

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64, message = "username must be 1-64 characters"))]
    pub username: String,
    pub identity_public_key: String,
    pub registration_id: i32,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct RotateIdentityRequest {
    pub identity_public_key: String,
}

fn validate_identity_key(key: &str) -> ApiResult<()> {
    if is_well_formed_public_key(key) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "identity_public_key must be a base64-encoded 32-byte Ed25519 public key".into(),
        ))
    }
}

/// `POST /api/users/register`
#[utoipa::path(
    post,
    path = "/api/users/register",
    tag = "users",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User created", body = User),
        (status = 409, description = "Username already taken"),
    ),
)]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<axum::response::Response> {
    body.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    validate_identity_key(&body.identity_public_key)?;

    let user = queries::create_user(&state.db, &body.username, &body.identity_public_key, body.registration_id)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::Conflict("username already taken".into())
            }
            other => {
                tracing::error!(error = %other, "create_user failed");
                ApiError::Internal
            }
        })?;

    Ok(ok(user))
}

/// `GET /api/users/by-username/:username`
#[utoipa::path(
    get,
    path = "/api/users/by-username/{username}",
    tag = "users",
    params(("username" = String, Path)),
    responses((status = 200, body = User), (status = 404)),
)]
pub async fn find_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<axum::response::Response> {
    let user = queries::find_user_by_username(&state.db, &username)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(ok(user))
}

/// `GET /api/users/:id`
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path)),
    responses((status = 200, body = User), (status = 404)),
)]
pub async fn find_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::response::Response> {
    let user = queries::find_user_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(ok(user))
}

/// `PUT /api/users/:id/identity`
///
/// Unauthenticated at the transport edge, matching the observed behavior of
/// the system this was modeled on — the only check performed is the
/// key-length validation below.
#[utoipa::path(
    put,
    path = "/api/users/{id}/identity",
    tag = "users",
    params(("id" = Uuid, Path)),
    request_body = RotateIdentityRequest,
    responses((status = 200, body = User), (status = 400), (status = 404)),
)]
pub async fn rotate_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RotateIdentityRequest>,
) -> ApiResult<axum::response::Response> {
    validate_identity_key(&body.identity_public_key)?;

    let user = queries::rotate_identity_key(&state.db, id, &body.identity_public_key)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(ok(user))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", axum::routing::post(register))
        .route("/by-username/{username}", get(find_by_username))
        .route("/{id}", get(find_by_id))
        .route("/{id}/identity", put(rotate_identity))
}
