//! Persistence layer (C1)
//!
//! `PostgreSQL` connections, migrations, and the Redis connection backing
//! the rate limiter. Transactional primitives (row locks, atomic
//! delete-and-return) live alongside the query functions in `queries`.

pub mod models;
pub mod queries;

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

pub use models::*;
pub use queries::*;

/// Create the `PostgreSQL` connection pool.
///
/// Bounded to a minimum of 2 and a maximum of 20 connections, matching the
/// production sizing in the concurrency model; callers in development may
/// pass a pool that never grows past 10 by tuning `DATABASE_MAX_CONNECTIONS`.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);

    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Create the Redis client backing the rate limiter.
pub async fn create_redis_client(redis_url: &str) -> Result<fred::clients::RedisClient> {
    use fred::prelude::*;

    let config = RedisConfig::from_url(redis_url)?;
    let client = RedisClient::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await?;

    info!("Connected to Redis");
    Ok(client)
}
