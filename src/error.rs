//! Application-wide error hierarchy and response envelope.
//!
//! Every handler returns `Result<_, ApiError>`. `ApiError` renders to the
//! `{success, data?, error?, message?}` envelope used across the HTTP API.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or malformed bearer token. Renders identically to
    /// [`Self::AuthFailed`] — there is no oracle distinguishing "you sent
    /// nothing" from "what you sent was wrong".
    #[error("unauthenticated")]
    Unauthenticated,

    /// Authentication attempt rejected (unknown user, bad signature, expired
    /// or consumed challenge, stale device). Renders identically to
    /// [`Self::Unauthenticated`].
    #[error("authentication failed")]
    AuthFailed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    /// An external collaborator (the blob store) is unreachable or was never
    /// configured. Its absence degrades only the surface that depends on
    /// it — never the rest of the API.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error")]
    Internal,
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        Self::Internal
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

fn envelope(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: code,
            message: message.into(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct Generic401Body {
    success: bool,
    error: &'static str,
}

/// Renders the Generic-401 body shared by [`ApiError::Unauthenticated`] and
/// [`ApiError::AuthFailed`] — the two must be byte-identical on the wire.
/// The external interface's exact shape is `{success:false, error:"Authentication
/// failed"}`, with no separate `message` field.
fn generic_401() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(Generic401Body { success: false, error: "Authentication failed" }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => envelope(StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthenticated | Self::AuthFailed => generic_401(),
            Self::NotFound(msg) => envelope(StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => envelope(StatusCode::CONFLICT, "conflict", msg),
            Self::RateLimited { retry_after_secs } => {
                let mut response = envelope(
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    format!("Too many requests. Wait {retry_after_secs} seconds."),
                );
                if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert("Retry-After", v);
                }
                response
            }
            Self::ServiceUnavailable(msg) => envelope(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg),
            Self::Internal => envelope(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal server error"),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Wraps `data` in the `{success: true, data}` envelope.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(serde_json::json!({
        "success": true,
        "data": data,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_and_auth_failed_render_identically() {
        let a = body_json(ApiError::Unauthenticated.into_response()).await;
        let b = body_json(ApiError::AuthFailed.into_response()).await;
        assert_eq!(a, b);
        assert_eq!(a["success"], false);
        assert_eq!(a["error"], "Authentication failed");
        assert!(a.get("message").is_none());
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after_header() {
        let response = ApiError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "42");
    }
}
