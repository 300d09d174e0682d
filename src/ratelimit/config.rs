//! Rate limiting configuration.

use std::collections::HashSet;

/// Configuration for the rate limiting system.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Prefix for Redis keys (e.g., "duskline:rl")
    pub redis_key_prefix: String,
    /// Whether to allow requests when Redis is unavailable
    pub fail_open: bool,
    /// Whether to trust X-Forwarded-For headers
    pub trust_proxy: bool,
    /// IP addresses that bypass rate limiting
    pub allowlist: HashSet<String>,
    /// Per-category rate limits
    pub limits: RateLimits,
}

/// Rate limits for each category.
#[derive(Debug, Clone)]
pub struct RateLimits {
    /// `POST /api/auth/challenge`
    pub challenge: LimitConfig,
    /// `POST /api/auth/verify`
    pub verify: LimitConfig,
    /// `POST /api/auth/logout`
    pub logout: LimitConfig,
    /// Every bearer-authenticated API route outside of `/api/files`.
    pub api: LimitConfig,
    /// `/api/files/*`
    pub files: LimitConfig,
}

/// Configuration for a single rate limit.
#[derive(Debug, Clone)]
pub struct LimitConfig {
    /// Maximum requests allowed in the window
    pub requests: u32,
    /// Window duration in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_key_prefix: "duskline:rl".to_string(),
            fail_open: true,
            trust_proxy: false,
            allowlist: HashSet::new(),
            limits: RateLimits::default(),
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            challenge: LimitConfig { requests: 10, window_secs: 60 },
            verify: LimitConfig { requests: 5, window_secs: 60 },
            logout: LimitConfig { requests: 10, window_secs: 60 },
            api: LimitConfig { requests: 300, window_secs: 900 },
            files: LimitConfig { requests: 100, window_secs: 900 },
        }
    }
}

impl RateLimitConfig {
    /// Creates configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RATE_LIMIT_ENABLED`: Enable/disable rate limiting (default: true)
    /// - `RATE_LIMIT_PREFIX`: Redis key prefix (default: "duskline:rl")
    /// - `RATE_LIMIT_FAIL_OPEN`: Allow requests when Redis unavailable (default: true)
    /// - `RATE_LIMIT_TRUST_PROXY`: Trust X-Forwarded-For headers (default: false)
    /// - `RATE_LIMIT_ALLOWLIST`: Comma-separated IP allowlist
    /// - `RATE_LIMIT_CHALLENGE`: Challenge limit as "requests,window_secs"
    /// - `RATE_LIMIT_VERIFY`: Verify limit as "requests,window_secs"
    /// - `RATE_LIMIT_LOGOUT`: Logout limit as "requests,window_secs"
    /// - `RATE_LIMIT_API`: Authenticated API limit as "requests,window_secs"
    /// - `RATE_LIMIT_FILES`: File endpoint limit as "requests,window_secs"
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RATE_LIMIT_ENABLED") {
            config.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_PREFIX") {
            config.redis_key_prefix = val;
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_FAIL_OPEN") {
            config.fail_open = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_TRUST_PROXY") {
            config.trust_proxy = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_ALLOWLIST") {
            config.allowlist = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_CHALLENGE") {
            if let Some(limit) = parse_limit_config(&val) {
                config.limits.challenge = limit;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_VERIFY") {
            if let Some(limit) = parse_limit_config(&val) {
                config.limits.verify = limit;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_LOGOUT") {
            if let Some(limit) = parse_limit_config(&val) {
                config.limits.logout = limit;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_API") {
            if let Some(limit) = parse_limit_config(&val) {
                config.limits.api = limit;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_FILES") {
            if let Some(limit) = parse_limit_config(&val) {
                config.limits.files = limit;
            }
        }

        config
    }
}

/// Parses a limit config from "requests,window_secs" format.
fn parse_limit_config(val: &str) -> Option<LimitConfig> {
    let parts: Vec<&str> = val.split(',').collect();
    if parts.len() == 2 {
        let requests = parts[0].trim().parse().ok()?;
        let window_secs = parts[1].trim().parse().ok()?;
        Some(LimitConfig { requests, window_secs })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.redis_key_prefix, "duskline:rl");
        assert!(config.fail_open);
        assert!(!config.trust_proxy);
        assert!(config.allowlist.is_empty());
    }

    #[test]
    fn test_default_limits() {
        let limits = RateLimits::default();
        assert_eq!(limits.challenge.requests, 10);
        assert_eq!(limits.verify.requests, 5);
        assert_eq!(limits.logout.requests, 10);
        assert_eq!(limits.api.requests, 300);
        assert_eq!(limits.api.window_secs, 900);
        assert_eq!(limits.files.requests, 100);
        assert_eq!(limits.files.window_secs, 900);
    }

    #[test]
    fn test_parse_limit_config() {
        assert!(parse_limit_config("10,60").is_some());
        let limit = parse_limit_config("10,60").unwrap();
        assert_eq!(limit.requests, 10);
        assert_eq!(limit.window_secs, 60);

        let limit = parse_limit_config(" 20 , 120 ").unwrap();
        assert_eq!(limit.requests, 20);
        assert_eq!(limit.window_secs, 120);

        assert!(parse_limit_config("10").is_none());
        assert!(parse_limit_config("10,60,extra").is_none());
        assert!(parse_limit_config("abc,60").is_none());
    }
}
