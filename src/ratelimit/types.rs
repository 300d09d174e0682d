//! Rate limiting types.

/// Categories for rate limiting, each with its own per-IP sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    /// `POST /api/auth/challenge`
    Challenge,
    /// `POST /api/auth/verify`
    Verify,
    /// `POST /api/auth/logout`
    Logout,
    /// Every bearer-authenticated API route outside of `/api/files`.
    Api,
    /// `/api/files/*`
    Files,
}

impl RateLimitCategory {
    /// Returns the string identifier for this category (used in Redis keys).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Challenge => "challenge",
            Self::Verify => "verify",
            Self::Logout => "logout",
            Self::Api => "api",
            Self::Files => "files",
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Unix timestamp when the window resets
    pub reset_at: u64,
    /// Seconds to wait before retrying (0 if allowed)
    pub retry_after: u64,
}

/// Normalized IP address stored in request extensions.
///
/// IPv4 addresses are stored as-is.
/// IPv6 addresses are normalized to /64 prefix for rate limiting.
#[derive(Debug, Clone)]
pub struct NormalizedIp(pub String);
