//! Relay engine (C6)
//!
//! Online-vs-queued delivery decision, the atomic offline-queue drain, and
//! client-acknowledged batch deletion. The server never inspects
//! `encrypted_payload` beyond validating its base64 shape — it is opaque
//! ciphertext end to end.

use axum::extract::ws::Message;
use axum::extract::{Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::db::models::MessageType;
use crate::db::queries;
use crate::error::{ok, ApiError, ApiResult};

/// Maximum base64-encoded ciphertext length accepted by `send`.
const MAX_CIPHERTEXT_LEN: usize = 65_536;
/// Default / maximum page size for `fetchOffline`.
const DEFAULT_OFFLINE_LIMIT: i64 = 100;
const MAX_OFFLINE_LIMIT: i64 = 100;

lazy_static! {
    static ref BASE64_RE: Regex = Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").expect("valid regex");
}

/// The event pushed to a live socket when a message is delivered online.
/// Wire shape fixed by the external interface: `{senderId, ciphertext, type,
/// timestamp}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageEvent {
    pub sender_id: Uuid,
    pub ciphertext: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
}

impl NewMessageEvent {
    /// Serialize as the `new_message` socket.io-style envelope and wrap in a
    /// text [`Message`] ready to push through a [`crate::session_registry`]
    /// session.
    fn into_ws_message(self) -> Message {
        let payload = serde_json::json!({
            "event": "new_message",
            "data": self,
        });
        Message::Text(payload.to_string().into())
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SendRequest {
    pub recipient_id: Uuid,
    pub ciphertext: String,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SendResponse {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueuedMessageView {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub ciphertext: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct OfflineQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AckDeleteRequest {
    pub message_ids: Vec<Uuid>,
}

/// `send(senderId, recipientId, ciphertext, type)` — `POST /api/messages/send`.
///
/// Pushes live if the recipient has a connected socket, otherwise queues for
/// store-and-forward delivery. The socket-stale race (registry entry exists
/// but the push fails because the receive task already exited) falls through
/// to the same queueing path rather than erroring.
#[utoipa::path(
    post,
    path = "/api/messages/send",
    tag = "messages",
    request_body = SendRequest,
    responses((status = 200, body = SendResponse), (status = 400), (status = 404)),
    security(("bearer_auth" = [])),
)]
pub async fn send(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SendRequest>,
) -> ApiResult<axum::response::Response> {
    if body.recipient_id == auth.user_id {
        return Err(ApiError::BadRequest("cannot send a message to yourself".into()));
    }
    if body.ciphertext.len() > MAX_CIPHERTEXT_LEN || !BASE64_RE.is_match(&body.ciphertext) {
        return Err(ApiError::BadRequest("ciphertext must be base64 and at most 65536 characters".into()));
    }

    let recipient_device = queries::find_device_by_user(&state.db, body.recipient_id).await?;
    if recipient_device.is_none() {
        return Err(ApiError::NotFound("recipient has no registered device".into()));
    }
    let recipient_device = recipient_device.expect("checked above");

    if let Some(session) = state.session_registry.socket_of(body.recipient_id, &recipient_device.device_id) {
        let event = NewMessageEvent {
            sender_id: auth.user_id,
            ciphertext: body.ciphertext.clone(),
            message_type: body.message_type,
            timestamp: Utc::now(),
        };
        if session.push(event.into_ws_message()).is_ok() {
            return Ok(ok(SendResponse { delivered: true, message_id: None }));
        }
        // Socket is stale: registry entry exists but the receive task has
        // already exited. Fall through to queueing.
    }

    use base64::Engine as _;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(&body.ciphertext)
        .map_err(|_| ApiError::BadRequest("ciphertext is not valid base64".into()))?;

    let queued = queries::enqueue_message(&state.db, body.recipient_id, auth.user_id, &raw, body.message_type).await?;

    Ok(ok(SendResponse { delivered: false, message_id: Some(queued.id) }))
}

/// `fetchOffline(recipientId, limit)` — `GET /api/messages/offline?limit=`.
///
/// Atomic drain: every row returned here is deleted in the same transaction
/// it was selected from (invariant Q-1), so a second immediate call never
/// sees the same message twice.
#[utoipa::path(
    get,
    path = "/api/messages/offline",
    tag = "messages",
    params(("limit" = Option<i64>, Query)),
    responses((status = 200, body = [QueuedMessageView]), (status = 400)),
    security(("bearer_auth" = [])),
)]
pub async fn fetch_offline(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<OfflineQuery>,
) -> ApiResult<axum::response::Response> {
    let limit = query.limit.unwrap_or(DEFAULT_OFFLINE_LIMIT);
    if !(1..=MAX_OFFLINE_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!("limit must be between 1 and {MAX_OFFLINE_LIMIT}")));
    }

    let rows = queries::fetch_offline_drain(&state.db, auth.user_id, limit).await?;

    use base64::Engine as _;
    let views: Vec<QueuedMessageView> = rows
        .into_iter()
        .map(|row| QueuedMessageView {
            id: row.id,
            sender_id: row.sender_id,
            ciphertext: base64::engine::general_purpose::STANDARD.encode(row.encrypted_payload),
            message_type: row.message_type,
            file_reference: row.file_reference,
            created_at: row.created_at,
        })
        .collect();

    Ok(ok(views))
}

/// `ackDelete(recipientId, messageIds)` — `DELETE /api/messages/batch`.
///
/// Only deletes rows owned by the caller: a forged id belonging to another
/// user's queue is silently skipped, never surfaced as an error.
#[utoipa::path(
    delete,
    path = "/api/messages/batch",
    tag = "messages",
    request_body = AckDeleteRequest,
    responses((status = 200)),
    security(("bearer_auth" = [])),
)]
pub async fn ack_delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<AckDeleteRequest>,
) -> ApiResult<axum::response::Response> {
    let deleted = queries::ack_delete_messages(&state.db, auth.user_id, &body.message_ids).await?;
    Ok(ok(serde_json::json!({ "deleted": deleted })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send", post(send))
        .route("/offline", get(fetch_offline))
        .route("/batch", delete(ack_delete))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_regex_accepts_padded_and_unpadded() {
        assert!(BASE64_RE.is_match("aGVsbG8="));
        assert!(BASE64_RE.is_match("aGVsbG8"));
        assert!(!BASE64_RE.is_match("not base64!"));
    }

    #[test]
    fn offline_limit_bounds() {
        assert!((1..=MAX_OFFLINE_LIMIT).contains(&1));
        assert!((1..=MAX_OFFLINE_LIMIT).contains(&100));
        assert!(!(1..=MAX_OFFLINE_LIMIT).contains(&0));
        assert!(!(1..=MAX_OFFLINE_LIMIT).contains(&101));
    }
}
