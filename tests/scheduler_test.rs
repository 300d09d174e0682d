//! Tests for the scheduler's reaper queries (C7): expired-challenge and
//! queued-message purge.

mod helpers;

use chrono::Duration;
use duskline_server::db::queries;
use helpers::{register_user, unique_username, TestApp};
use serial_test::serial;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn queue_reaper_purges_expired_and_stale_but_keeps_fresh() {
    let app = TestApp::new().await;
    let sender_name = unique_username("sender");
    let recipient_name = unique_username("recipient");
    let (_sender_identity, sender_user) = register_user(&app, &sender_name).await;
    let (_recipient_identity, recipient_user) = register_user(&app, &recipient_name).await;

    let sender_id: Uuid = sender_user["id"].as_str().expect("id present").parse().expect("valid uuid");
    let recipient_id: Uuid = recipient_user["id"].as_str().expect("id present").parse().expect("valid uuid");

    let expired_id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO queued_messages (id, recipient_id, sender_id, encrypted_payload, message_type, created_at, expires_at)
         VALUES ($1, $2, $3, $4, 'signal_message', NOW(), NOW() - INTERVAL '1 second')",
    )
    .bind(expired_id)
    .bind(recipient_id)
    .bind(sender_id)
    .bind(b"payload".as_slice())
    .execute(&app.pool)
    .await
    .expect("insert expired message");

    let stale_id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO queued_messages (id, recipient_id, sender_id, encrypted_payload, message_type, created_at, expires_at)
         VALUES ($1, $2, $3, $4, 'signal_message', NOW() - INTERVAL '31 days', NOW() + INTERVAL '30 days')",
    )
    .bind(stale_id)
    .bind(recipient_id)
    .bind(sender_id)
    .bind(b"payload".as_slice())
    .execute(&app.pool)
    .await
    .expect("insert stale message");

    let fresh_id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO queued_messages (id, recipient_id, sender_id, encrypted_payload, message_type, created_at, expires_at)
         VALUES ($1, $2, $3, $4, 'signal_message', NOW() - INTERVAL '29 days', NOW() + INTERVAL '1 day')",
    )
    .bind(fresh_id)
    .bind(recipient_id)
    .bind(sender_id)
    .bind(b"payload".as_slice())
    .execute(&app.pool)
    .await
    .expect("insert fresh message");

    let (expired_count, stale_count) = queries::reap_queue(&app.pool).await.expect("reap_queue failed");
    assert_eq!(expired_count, 1);
    assert_eq!(stale_count, 1);

    let remaining: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM queued_messages WHERE recipient_id = $1")
        .bind(recipient_id)
        .fetch_all(&app.pool)
        .await
        .expect("select remaining failed");

    assert_eq!(remaining, vec![fresh_id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn challenge_reaper_purges_only_expired_rows() {
    let app = TestApp::new().await;
    let username = unique_username("challenge_reap");
    let (_identity, user) = register_user(&app, &username).await;
    let user_id: Uuid = user["id"].as_str().expect("id present").parse().expect("valid uuid");

    queries::create_challenge(&app.pool, user_id, "stale-nonce", Duration::seconds(-1))
        .await
        .expect("create expired challenge");

    let deleted = queries::reap_expired_challenges(&app.pool).await.expect("reap failed");
    assert!(deleted >= 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auth_challenges WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&app.pool)
        .await
        .expect("count failed");
    assert_eq!(remaining, 0);
}
