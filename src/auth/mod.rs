//! Authentication engine (C3)
//!
//! A challenge/response handshake over each user's identity key, session
//! tokens, and the device directory. No passwords, no OIDC, no MFA — identity
//! is proven by a single Ed25519 signature over a server-issued nonce.

pub(crate) mod handlers;
pub mod jwt;
mod middleware;

use axum::middleware as axum_middleware;
use axum::Router;
pub use jwt::Claims;
pub use middleware::AuthUser;

use crate::api::AppState;
use crate::ratelimit::{rate_limit_by_ip, with_category, RateLimitCategory};

/// Create the authentication router, mounted at `/api/auth`.
///
/// - `POST /challenge` — issue a nonce for `(username, deviceId)`
/// - `POST /verify` — prove possession of the identity key, receive a token
/// - `POST /logout` — requires a bearer token, deletes the caller's device
pub fn router(state: AppState) -> Router<AppState> {
    let challenge_route = Router::new()
        .route("/challenge", axum::routing::post(handlers::issue_challenge))
        .layer(axum_middleware::from_fn_with_state(state.clone(), rate_limit_by_ip))
        .layer(axum_middleware::from_fn(with_category(RateLimitCategory::Challenge)));

    let verify_route = Router::new()
        .route("/verify", axum::routing::post(handlers::verify_challenge))
        .layer(axum_middleware::from_fn_with_state(state.clone(), rate_limit_by_ip))
        .layer(axum_middleware::from_fn(with_category(RateLimitCategory::Verify)));

    let logout_route = Router::new()
        .route("/logout", axum::routing::post(handlers::logout))
        .layer(axum_middleware::from_fn_with_state(state, rate_limit_by_ip))
        .layer(axum_middleware::from_fn(with_category(RateLimitCategory::Logout)));

    challenge_route.merge(verify_route).merge(logout_route)
}
