//! API router and application state.
//!
//! Central routing configuration and shared state threaded through every
//! handler via Axum's `State` extractor.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRef, State};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::{Json, Router};
use fred::interfaces::ClientLike;
use serde::Serialize;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::files::BlobStoreClient;
use crate::ratelimit::{rate_limit_by_ip, with_category, RateLimitCategory, RateLimiter};
use crate::session_registry::SessionRegistry;
use crate::{auth, files, keys, relay, users, ws};

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Redis client, backing the rate limiter.
    pub redis: fred::clients::RedisClient,
    /// Server configuration.
    pub config: Arc<Config>,
    /// Rate limiter (absent disables all rate limiting, fail-open).
    pub rate_limiter: Option<RateLimiter>,
    /// In-process registry of connected sockets (C5).
    pub session_registry: Arc<SessionRegistry>,
    /// Blob store client for `/api/files/*` (absent disables that surface only).
    pub blob_store: Option<BlobStoreClient>,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

/// Arguments for constructing a new [`AppState`].
pub struct AppStateConfig {
    pub db: PgPool,
    pub redis: fred::clients::RedisClient,
    pub config: Config,
    pub rate_limiter: Option<RateLimiter>,
    pub session_registry: Arc<SessionRegistry>,
    pub blob_store: Option<BlobStoreClient>,
}

impl AppState {
    #[must_use]
    pub fn new(cfg: AppStateConfig) -> Self {
        Self {
            db: cfg.db,
            redis: cfg.redis,
            config: Arc::new(cfg.config),
            rate_limiter: cfg.rate_limiter,
            session_registry: cfg.session_registry,
            blob_store: cfg.blob_store,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = if state.config.cors_allowed_origins.iter().any(|o| o == "*")
        || (state.config.environment == crate::config::Environment::Development && state.config.cors_allowed_origins.is_empty())
    {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        use axum::http::{header, HeaderName, Method};
        let origins: Vec<_> = state
            .config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| {
                o.parse().ok().or_else(|| {
                    tracing::warn!(origin = %o, "invalid CORS origin in configuration, skipping");
                    None
                })
            })
            .collect();

        if origins.is_empty() {
            tracing::error!("no valid CORS origins configured; all cross-origin requests will fail");
        }

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, HeaderName::from_static("x-request-id")])
            .allow_credentials(true)
    };

    let authenticated_api_routes = Router::new()
        .nest("/keys", keys::router())
        .nest("/messages", relay::router())
        .layer(from_fn_with_state(state.clone(), rate_limit_by_ip))
        .layer(from_fn(with_category(RateLimitCategory::Api)));

    let files_routes = files::router()
        .layer(from_fn_with_state(state.clone(), rate_limit_by_ip))
        .layer(from_fn(with_category(RateLimitCategory::Files)));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/users", users::router())
        .nest("/api/auth", auth::router(state.clone()))
        .nest("/api", authenticated_api_routes)
        .nest("/api/files", files_routes)
        .route("/ws", get(ws::handler))
        .merge(api_docs(state.config.enable_api_docs))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct HealthResponse {
    status: &'static str,
    database: bool,
    redis: bool,
    rate_limiting: bool,
    blob_store: bool,
}

/// `GET /health`
///
/// Verifies connectivity to the database and Redis. Reports "degraded"
/// rather than failing outright — liveness, not readiness.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service health status", body = HealthResponse)),
)]
pub(crate) async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let redis_ok = state.redis.ping::<String>(None).await.is_ok();
    let status = if db_ok && redis_ok { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        database: db_ok,
        redis: redis_ok,
        rate_limiting: state.rate_limiter.is_some(),
        blob_store: state.blob_store.is_some(),
    })
}

/// Serves Swagger UI at `/api/docs` when `ENABLE_API_DOCS=true`.
fn api_docs(enable: bool) -> Router<AppState> {
    if !enable {
        return Router::new();
    }
    Router::new().merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", crate::openapi::ApiDoc::openapi()))
}
