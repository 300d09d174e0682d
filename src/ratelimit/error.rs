//! Rate limiting error types, folded into the app-wide error envelope.

use crate::error::ApiError;
use crate::ratelimit::RateLimitResult;
use axum::response::{IntoResponse, Response};

/// Errors that can occur during rate limit checks.
#[derive(Debug)]
pub enum RateLimitError {
    /// Redis is unavailable (fail-open, but should be logged).
    RedisUnavailable,
    /// Request exceeded the rate limit.
    LimitExceeded(RateLimitResult),
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        match self {
            Self::RedisUnavailable => ApiError::Internal.into_response(),
            Self::LimitExceeded(result) => ApiError::RateLimited {
                retry_after_secs: result.retry_after,
            }
            .into_response(),
        }
    }
}
