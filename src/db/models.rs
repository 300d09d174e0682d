//! Row types for the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered user. Created once at registration; `identity_public_key`
/// may be rotated but the username is globally unique and immutable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub identity_public_key: String,
    pub registration_id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single active device for a user (invariant SS-1: at most one row
/// per `user_id` at any instant).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub identity_public_key: String,
    pub registration_id: i32,
    pub device_name: Option<String>,
    pub fcm_token: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A medium-lived, Ed25519-signed X25519 pre-key. Unique on `(user_id,
/// key_id)`; the directory retains the 5 most recent per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct SignedPreKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_id: i32,
    pub public_key: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// A single-use X25519 pre-key. Invariant OTK-1: consumed exactly once by
/// `getBundle`, which atomically deletes the row it returns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct OneTimePreKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_id: i32,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

/// An issued authentication nonce. Invariant AC-1: at most one non-expired
/// row per `user_id`; issuing a new challenge deletes any prior row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The wire-level type of an opaque message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "message_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SignalMessage,
    PreKeySignalMessage,
    KeyExchange,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::SignalMessage
    }
}

/// A message queued for store-and-forward delivery. Invariant Q-1: delivered
/// to a client at most once through `fetchOffline`'s atomic drain.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    pub encrypted_payload: Vec<u8>,
    pub message_type: MessageType,
    pub file_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
