//! Axum middleware for rate limiting.
//!
//! Provides middleware functions to enforce rate limits on incoming
//! requests. Supports rate limiting by IP address (for unauthenticated
//! endpoints) and by user id (for bearer-authenticated endpoints).

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::ratelimit::{extract_client_ip, normalize_ip, NormalizedIp, RateLimitCategory, RateLimitError};

/// Middleware to rate limit requests by client IP address.
///
/// Use this for unauthenticated endpoints (`/api/auth/challenge`,
/// `/api/auth/verify`). Extracts the client IP from headers or connection
/// info, normalizes it (IPv6 to /64 prefix), and checks against the rate
/// limiter.
///
/// - If the rate limiter is not configured (`state.rate_limiter` is `None`),
///   requests pass through.
/// - If Redis is unavailable and `fail_open` is true, requests pass through
///   with a warning.
/// - If the rate limit is exceeded, returns `429 Too Many Requests`.
#[tracing::instrument(skip(state, request, next))]
pub async fn rate_limit_by_ip(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    let category = request.extensions().get::<RateLimitCategory>().copied().unwrap_or(RateLimitCategory::Api);

    let Some(ref rate_limiter) = state.rate_limiter else {
        return Ok(next.run(request).await);
    };

    let trust_proxy = rate_limiter.config().trust_proxy;
    let client_ip = extract_client_ip(request.headers(), connect_info.as_ref(), trust_proxy);
    let normalized_ip = normalize_ip(client_ip);

    debug!(category = %category.as_str(), ip = %normalized_ip, "checking rate limit by IP");

    request.extensions_mut().insert(NormalizedIp(normalized_ip.clone()));

    let result = match rate_limiter.check(category, &normalized_ip).await {
        Ok(result) => result,
        Err(RateLimitError::RedisUnavailable) => {
            if rate_limiter.config().fail_open {
                warn!(category = %category.as_str(), ip = %normalized_ip, "Redis unavailable, allowing request (fail_open=true)");
                return Ok(next.run(request).await);
            }
            return Err(RateLimitError::RedisUnavailable);
        }
        Err(e) => return Err(e),
    };

    if !result.allowed {
        debug!(category = %category.as_str(), ip = %normalized_ip, retry_after = result.retry_after, "rate limit exceeded");
        return Err(RateLimitError::LimitExceeded(result));
    }

    Ok(next.run(request).await)
}

/// Sets the rate limit category for downstream middleware.
///
/// Apply this before `rate_limit_by_ip` to specify which category to use.
pub fn with_category(
    category: RateLimitCategory,
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>> + Clone + Send + 'static
{
    move |mut request: Request, next: Next| {
        request.extensions_mut().insert(category);
        Box::pin(async move { next.run(request).await })
    }
}
