//! Session token issuance and verification.
//!
//! Session tokens are signed with a symmetric server secret (HS256) rather
//! than the asymmetric scheme used elsewhere in this codebase's ancestry —
//! there is no distributed-verification requirement here, and a shared
//! secret matches the single-process deployment this server runs as.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by a session token: `(userId, deviceId)` plus standard
/// expiry/issued-at fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub device_id: String,
    pub exp: i64,
    pub iat: i64,
}

/// Mint a session token for `(user_id, device_id)`, expiring after `ttl`.
pub fn issue_token(secret: &str, user_id: Uuid, device_id: &str, ttl: std::time::Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        user_id,
        device_id: device_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::from_std(ttl).unwrap_or(Duration::days(7))).timestamp(),
    };

    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

/// Verify a session token's signature and expiry. Does not check that the
/// device row still exists — that is the caller's responsibility, since it
/// requires a database round trip and this function is pure.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn round_trips_claims() {
        let user_id = Uuid::now_v7();
        let token = issue_token(SECRET, user_id, "device-a", std::time::Duration::from_secs(3600)).unwrap();
        let claims = verify_token(SECRET, &token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.device_id, "device-a");
    }

    #[test]
    fn rejects_wrong_secret() {
        let user_id = Uuid::now_v7();
        let token = issue_token(SECRET, user_id, "device-a", std::time::Duration::from_secs(3600)).unwrap();
        assert!(verify_token("wrong-secret", &token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let user_id = Uuid::now_v7();
        let token = issue_token(SECRET, user_id, "device-a", std::time::Duration::from_secs(0)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(verify_token(SECRET, &token).is_err());
    }
}
