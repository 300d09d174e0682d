//! Reusable test helpers for black-box HTTP integration tests.
//!
//! Builds the full axum router against real `PostgreSQL`/Redis test
//! instances (see `Config::default_for_test`'s doc comment for the docker
//! invocations) and drives it via `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{self, Method, Request, Response};
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use duskline_server::api::{create_router, AppState, AppStateConfig};
use duskline_server::config::Config;
use duskline_server::db;
use duskline_server::session_registry::SessionRegistry;

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: axum::Router,
    pub pool: PgPool,
    pub config: Arc<Config>,
}

impl TestApp {
    /// Build a `TestApp` with real DB/Redis connections and no rate
    /// limiter — rate-limiting middleware fails open when `rate_limiter` is
    /// `None`, so these tests exercise routing/handler logic without Redis
    /// script state bleeding between runs.
    pub async fn new() -> Self {
        let config = Config::default_for_test();
        let pool = db::create_pool(&config.database_url).await.expect("failed to connect to test DB");
        let redis = db::create_redis_client(&config.redis_url).await.expect("failed to connect to test Redis");

        let state = AppState::new(AppStateConfig {
            db: pool.clone(),
            redis,
            config: config.clone(),
            rate_limiter: None,
            session_registry: Arc::new(SessionRegistry::new()),
            blob_store: None,
        });

        let config = Arc::new(config);
        let router = create_router(state);

        Self { router, pool, config }
    }

    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("oneshot request failed")
    }
}

/// Parse a response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.expect("failed to read body").to_bytes();
    serde_json::from_slice(&bytes).expect("response body was not valid JSON")
}

/// A client-held identity key pair, mirroring what a real client generates
/// at registration time.
pub struct TestIdentity {
    pub signing_key: SigningKey,
    pub public_key_b64: String,
}

impl TestIdentity {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let public_key_b64 = base64::engine::general_purpose::STANDARD.encode(signing_key.verifying_key().to_bytes());
        Self { signing_key, public_key_b64 }
    }

    pub fn sign_b64(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }
}

/// Register a fresh user with a random username and a generated identity
/// key pair. Returns the identity and the decoded `User` JSON.
pub async fn register_user(app: &TestApp, username: &str) -> (TestIdentity, Value) {
    let identity = TestIdentity::generate();
    let body = serde_json::json!({
        "username": username,
        "identity_public_key": identity.public_key_b64,
        "registration_id": 1,
    });

    let request = TestApp::request(Method::POST, "/api/users/register")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");

    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 200, "registration should succeed");
    let json = body_to_json(response).await;
    (identity, json["data"].clone())
}

/// Run the full challenge/verify dance for an already-registered identity
/// and return the session token plus the verify response payload.
pub async fn authenticate(app: &TestApp, username: &str, device_id: &str, identity: &TestIdentity) -> (String, Value) {
    let challenge_body = serde_json::json!({ "username": username, "device_id": device_id });
    let request = TestApp::request(Method::POST, "/api/auth/challenge")
        .header("content-type", "application/json")
        .body(Body::from(challenge_body.to_string()))
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 200, "challenge should succeed");
    let nonce = body_to_json(response).await["data"]["nonce"].as_str().expect("nonce present").to_string();

    let signature = identity.sign_b64(nonce.as_bytes());
    let verify_body = serde_json::json!({
        "username": username,
        "device_id": device_id,
        "signature": signature,
    });
    let request = TestApp::request(Method::POST, "/api/auth/verify")
        .header("content-type", "application/json")
        .body(Body::from(verify_body.to_string()))
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 200, "verify should succeed");
    let json = body_to_json(response).await;
    let token = json["data"]["token"].as_str().expect("token present").to_string();
    (token, json["data"].clone())
}

pub fn bearer(request: http::request::Builder, token: &str) -> http::request::Builder {
    request.header("authorization", format!("Bearer {token}"))
}

pub fn unique_username(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().to_string().split('-').next().expect("uuid has segments"))
}
