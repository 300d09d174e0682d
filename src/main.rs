//! Duskline server - entry point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use duskline_server::api::{self, AppState, AppStateConfig};
use duskline_server::config::{Config, Environment};
use duskline_server::files::BlobStoreClient;
use duskline_server::ratelimit::{RateLimitConfig, RateLimiter};
use duskline_server::scheduler::Scheduler;
use duskline_server::session_registry::SessionRegistry;
use duskline_server::db;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "duskline_server=info,tower_http=info".into())
    };
    match config.environment {
        Environment::Production => tracing_subscriber::fmt().with_env_filter(env_filter()).json().init(),
        Environment::Development => tracing_subscriber::fmt().with_env_filter(env_filter()).init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting duskline relay");

    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    let redis = db::create_redis_client(&config.redis_url).await?;

    let mut rate_limiter = RateLimiter::new(redis.clone(), RateLimitConfig::from_env());
    let rate_limiter = match rate_limiter.init().await {
        Ok(()) => Some(rate_limiter),
        Err(error) => {
            tracing::warn!(%error, "failed to load rate limit script into Redis; rate limiting disabled");
            None
        }
    };

    let blob_store = match BlobStoreClient::from_config(&config).await {
        Some(client) => match client.health_check().await {
            Ok(()) => {
                info!(bucket = %config.blob_store_bucket, "blob store connected");
                Some(client)
            }
            Err(error) => {
                tracing::warn!(%error, "blob store health check failed, file uploads disabled");
                None
            }
        },
        None => {
            info!("no blob store endpoint configured, file uploads disabled");
            None
        }
    };

    let session_registry = Arc::new(SessionRegistry::new());

    let scheduler = Scheduler::new();
    scheduler.start(db_pool.clone());

    let state = AppState::new(AppStateConfig {
        db: db_pool,
        redis,
        config,
        rate_limiter,
        session_registry,
        blob_store,
    });

    let bind_address = state.config.bind_address.clone();
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "server listening");

    let shutdown_signal = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
        info!("received shutdown signal, cleaning up");
    };

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    scheduler.stop();
    info!("server shutdown complete");

    Ok(())
}
