//! Runtime queries over the persistence layer (no compile-time `DATABASE_URL`
//! required). Every multi-step operation that spans more than one statement
//! runs inside a single transaction so the database is never left in a
//! partially committed state.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{AuthChallenge, Device, MessageType, OneTimePreKey, QueuedMessage, SignedPreKey, User};

/// Number of signed pre-keys retained per user once the upload path reaps.
pub const SIGNED_PRE_KEY_RETENTION: i64 = 5;

/// Queued-message retention ceiling, independent of `expires_at`.
pub const QUEUE_MAX_AGE_DAYS: i64 = 30;

// ============================================================================
// Users (C0)
// ============================================================================

/// Create a new user. A unique-constraint violation on `username` bubbles up
/// as a `sqlx::Error::Database` for the caller to map to *Conflict*.
pub async fn create_user(
    pool: &PgPool,
    username: &str,
    identity_public_key: &str,
    registration_id: i32,
) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(
        "INSERT INTO users (id, username, identity_public_key, registration_id, created_at, updated_at)
         VALUES ($1, $2, $3, $4, NOW(), NOW())
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(username)
    .bind(identity_public_key)
    .bind(registration_id)
    .fetch_one(pool)
    .await
}

/// Find a user by id.
pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Find a user by username.
pub async fn find_user_by_username(pool: &PgPool, username: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// Rotate a user's long-lived identity key.
pub async fn rotate_identity_key(
    pool: &PgPool,
    user_id: Uuid,
    new_identity_public_key: &str,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "UPDATE users SET identity_public_key = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .bind(new_identity_public_key)
    .fetch_optional(pool)
    .await
}

// ============================================================================
// Devices (C3 — invariant SS-1)
// ============================================================================

/// Atomically replace the single active device for `user_id`: delete every
/// prior row, then insert the new one. Observers see either the old device
/// or the new one, never both.
pub async fn replace_device(
    pool: &PgPool,
    user_id: Uuid,
    device_id: &str,
    identity_public_key: &str,
    registration_id: i32,
    fcm_token: Option<&str>,
) -> sqlx::Result<Device> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM devices WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let device = sqlx::query_as::<_, Device>(
        "INSERT INTO devices (id, user_id, device_id, identity_public_key, registration_id, fcm_token, last_seen_at, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(device_id)
    .bind(identity_public_key)
    .bind(registration_id)
    .bind(fcm_token)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(device)
}

/// Find the (at most one) device row for a user.
pub async fn find_device_by_user(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<Device>> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Find the device row for a `(user_id, device_id)` pair specifically —
/// used by `logout`, which must only delete the caller's own device.
pub async fn find_device(pool: &PgPool, user_id: Uuid, device_id: &str) -> sqlx::Result<Option<Device>> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE user_id = $1 AND device_id = $2")
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(pool)
        .await
}

/// Delete the `(user_id, device_id)` device row. Idempotent: deleting a
/// row that is already gone is not an error.
pub async fn delete_device(pool: &PgPool, user_id: Uuid, device_id: &str) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM devices WHERE user_id = $1 AND device_id = $2")
        .bind(user_id)
        .bind(device_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Opportunistically bump `last_seen_at`. Callers do not await failures of
/// this on the request's critical path.
pub async fn touch_device_last_seen(pool: &PgPool, user_id: Uuid, device_id: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE devices SET last_seen_at = NOW() WHERE user_id = $1 AND device_id = $2")
        .bind(user_id)
        .bind(device_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// Auth challenges (C3 — invariant AC-1)
// ============================================================================

/// Issue a fresh challenge: delete any prior row for the user and insert the
/// new one in a single transaction, enforcing AC-1.
pub async fn create_challenge(
    pool: &PgPool,
    user_id: Uuid,
    nonce: &str,
    ttl: Duration,
) -> sqlx::Result<AuthChallenge> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM auth_challenges WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let expires_at = Utc::now() + ttl;
    let challenge = sqlx::query_as::<_, AuthChallenge>(
        "INSERT INTO auth_challenges (id, user_id, nonce, expires_at, created_at)
         VALUES ($1, $2, $3, $4, NOW())
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(nonce)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(challenge)
}

/// Fetch and unconditionally delete the challenge row for a user, whatever
/// its expiry state. The caller decides expiry/AuthFailed semantics after
/// the row is gone — this is what makes challenge consumption
/// brute-force-resistant: a second `verify` call always sees no row.
pub async fn take_challenge(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<AuthChallenge>> {
    let mut tx = pool.begin().await?;

    let challenge = sqlx::query_as::<_, AuthChallenge>(
        "SELECT * FROM auth_challenges WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM auth_challenges WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(challenge)
}

/// Delete every expired challenge row. Used by the challenge reaper (C7).
pub async fn reap_expired_challenges(pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM auth_challenges WHERE expires_at < NOW()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Signed pre-keys (C4)
// ============================================================================

/// Upsert a signed pre-key by `(user_id, key_id)`, then reap all but the
/// most recent [`SIGNED_PRE_KEY_RETENTION`] rows for the user.
pub async fn upsert_signed_pre_key(
    pool: &PgPool,
    user_id: Uuid,
    key_id: i32,
    public_key: &str,
    signature: &str,
) -> sqlx::Result<SignedPreKey> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, SignedPreKey>(
        "INSERT INTO signed_pre_keys (id, user_id, key_id, public_key, signature, created_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (user_id, key_id)
         DO UPDATE SET public_key = EXCLUDED.public_key, signature = EXCLUDED.signature
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(key_id)
    .bind(public_key)
    .bind(signature)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM signed_pre_keys
         WHERE user_id = $1
           AND id NOT IN (
               SELECT id FROM signed_pre_keys WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2
           )",
    )
    .bind(user_id)
    .bind(SIGNED_PRE_KEY_RETENTION)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// The most recently created signed pre-key for a user, if any.
pub async fn latest_signed_pre_key(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<SignedPreKey>> {
    sqlx::query_as::<_, SignedPreKey>(
        "SELECT * FROM signed_pre_keys WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

// ============================================================================
// One-time pre-keys (C4 — invariant OTK-1)
// ============================================================================

/// Batch-insert one-time pre-keys, ignoring any `(user_id, key_id)` that
/// already exists.
pub async fn insert_one_time_pre_keys(
    pool: &PgPool,
    user_id: Uuid,
    keys: &[(i32, String)],
) -> sqlx::Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;
    for (key_id, public_key) in keys {
        let result = sqlx::query(
            "INSERT INTO one_time_pre_keys (id, user_id, key_id, public_key, created_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (user_id, key_id) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(key_id)
        .bind(public_key)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Consume the oldest one-time pre-key for a user: select it under a
/// `FOR UPDATE SKIP LOCKED` row lock, delete it, and return it in the same
/// transaction. Two concurrent callers never observe the same row.
pub async fn consume_one_time_pre_key(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<OneTimePreKey>> {
    let mut tx = pool.begin().await?;

    let key = sqlx::query_as::<_, OneTimePreKey>(
        "SELECT * FROM one_time_pre_keys WHERE user_id = $1 ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(ref key) = key {
        sqlx::query("DELETE FROM one_time_pre_keys WHERE id = $1")
            .bind(key.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(key)
}

/// Count remaining one-time pre-keys for a user.
pub async fn count_one_time_pre_keys(pool: &PgPool, user_id: Uuid) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM one_time_pre_keys WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

// ============================================================================
// Queued messages (C6 — invariant Q-1)
// ============================================================================

/// Insert a queued message with the default 30-day TTL.
pub async fn enqueue_message(
    pool: &PgPool,
    recipient_id: Uuid,
    sender_id: Uuid,
    encrypted_payload: &[u8],
    message_type: MessageType,
) -> sqlx::Result<QueuedMessage> {
    sqlx::query_as::<_, QueuedMessage>(
        "INSERT INTO queued_messages (id, recipient_id, sender_id, encrypted_payload, message_type, created_at, expires_at)
         VALUES ($1, $2, $3, $4, $5, NOW(), NOW() + INTERVAL '30 days')
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(recipient_id)
    .bind(sender_id)
    .bind(encrypted_payload)
    .bind(message_type)
    .fetch_one(pool)
    .await
}

/// Atomically drain up to `limit` queued messages for a recipient, oldest
/// first: select with `FOR UPDATE SKIP LOCKED`, delete, return. Two
/// interleaved drains never return overlapping rows.
pub async fn fetch_offline_drain(pool: &PgPool, recipient_id: Uuid, limit: i64) -> sqlx::Result<Vec<QueuedMessage>> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as::<_, QueuedMessage>(
        "SELECT * FROM queued_messages WHERE recipient_id = $1 ORDER BY created_at ASC LIMIT $2 FOR UPDATE SKIP LOCKED",
    )
    .bind(recipient_id)
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;

    if !rows.is_empty() {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        sqlx::query("DELETE FROM queued_messages WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(rows)
}

/// Delete queued messages acknowledged by the recipient. Only rows owned by
/// `recipient_id` are eligible — a caller cannot erase another user's queue.
pub async fn ack_delete_messages(pool: &PgPool, recipient_id: Uuid, message_ids: &[Uuid]) -> sqlx::Result<u64> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query("DELETE FROM queued_messages WHERE recipient_id = $1 AND id = ANY($2)")
        .bind(recipient_id)
        .bind(message_ids)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delete queued messages whose `expires_at` has passed, then separately
/// delete rows older than [`QUEUE_MAX_AGE_DAYS`] regardless of `expires_at`.
/// Reports both counts for the scheduler to log.
pub async fn reap_queue(pool: &PgPool) -> sqlx::Result<(u64, u64)> {
    let expired = sqlx::query("DELETE FROM queued_messages WHERE expires_at < NOW()")
        .execute(pool)
        .await?
        .rows_affected();

    let cutoff: DateTime<Utc> = Utc::now() - Duration::days(QUEUE_MAX_AGE_DAYS);
    let stale = sqlx::query("DELETE FROM queued_messages WHERE created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    Ok((expired, stale))
}
