//! Core rate limiter service using Redis.

use fred::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ratelimit::{LimitConfig, RateLimitCategory, RateLimitConfig, RateLimitError, RateLimitResult};

/// Embedded Lua script for atomic rate limit check and increment.
const RATE_LIMIT_SCRIPT: &str = include_str!("rate_limit.lua");

/// Core rate limiter service backed by Redis, enforcing the per-category
/// sliding windows in §4.6: `challenge`, `verify`, `logout`, `api`, `files`.
#[derive(Clone)]
pub struct RateLimiter {
    redis: RedisClient,
    config: Arc<RateLimitConfig>,
    script_sha: String,
}

impl RateLimiter {
    /// Creates a new rate limiter instance.
    ///
    /// Call `init()` after creation to load the Lua script into Redis.
    pub fn new(redis: RedisClient, config: RateLimitConfig) -> Self {
        Self {
            redis,
            config: Arc::new(config),
            script_sha: String::new(),
        }
    }

    /// Initializes the rate limiter by loading the Lua script into Redis.
    ///
    /// Must be called before using `check()`.
    pub async fn init(&mut self) -> Result<(), RedisError> {
        let sha: String = self.redis.script_load(RATE_LIMIT_SCRIPT).await?;
        debug!(script_sha = %sha, "rate limit Lua script loaded");
        self.script_sha = sha;
        Ok(())
    }

    /// Checks and increments the rate limit for a given category and
    /// identifier (typically a normalized IP, or `user:{userId}`).
    ///
    /// # Errors
    /// Returns `RateLimitError::RedisUnavailable` if Redis is unreachable.
    #[tracing::instrument(skip(self), fields(category = %category.as_str()))]
    pub async fn check(&self, category: RateLimitCategory, identifier: &str) -> Result<RateLimitResult, RateLimitError> {
        if !self.config.enabled {
            return Ok(RateLimitResult { allowed: true, limit: 0, remaining: 0, reset_at: 0, retry_after: 0 });
        }

        if self.is_allowed_by_config(identifier) {
            debug!(identifier = %identifier, "identifier in allowlist, bypassing rate limit");
            return Ok(RateLimitResult { allowed: true, limit: 0, remaining: 0, reset_at: 0, retry_after: 0 });
        }

        let limit_config = self.get_limit_config(category);
        let key = self.build_key(category.as_str(), identifier);

        let result: Vec<i64> = self
            .redis
            .evalsha(
                &self.script_sha,
                vec![key.as_str()],
                vec![limit_config.window_secs.to_string(), limit_config.requests.to_string()],
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "redis rate limit check failed");
                RateLimitError::RedisUnavailable
            })?;

        let count = result[0] as u32;
        let allowed = result[1] == 1;
        let ttl = result[2].max(0) as u64;

        let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs();

        Ok(RateLimitResult {
            allowed,
            limit: limit_config.requests,
            remaining: if allowed { limit_config.requests.saturating_sub(count) } else { 0 },
            reset_at: now + ttl,
            retry_after: if allowed { 0 } else { ttl },
        })
    }

    /// Checks if the identifier is in the allowlist configuration.
    pub fn is_allowed_by_config(&self, identifier: &str) -> bool {
        self.config.allowlist.contains(identifier)
    }

    /// Returns the configuration for this rate limiter.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Builds a Redis key with the configured prefix.
    fn build_key(&self, category: &str, identifier: &str) -> String {
        format!("{}:{}:{}", self.config.redis_key_prefix, category, identifier)
    }

    /// Returns the limit configuration for a given category.
    fn get_limit_config(&self, category: RateLimitCategory) -> &LimitConfig {
        match category {
            RateLimitCategory::Challenge => &self.config.limits.challenge,
            RateLimitCategory::Verify => &self.config.limits.verify,
            RateLimitCategory::Logout => &self.config.limits.logout,
            RateLimitCategory::Api => &self.config.limits.api,
            RateLimitCategory::Files => &self.config.limits.files,
        }
    }
}
