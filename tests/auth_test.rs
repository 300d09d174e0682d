//! Black-box tests for the authentication engine (C3): challenge/verify,
//! the single-active-session invariant (SS-1), and brute-force resistance
//! via challenge consumption (AC-1).

mod helpers;

use axum::body::Body;
use axum::http::Method;
use helpers::{authenticate, bearer, body_to_json, register_user, unique_username, TestApp};
use serial_test::serial;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn single_session_takeover_invalidates_the_prior_token() {
    let app = TestApp::new().await;
    let username = unique_username("alice");
    let (identity, _user) = register_user(&app, &username).await;

    let (token1, _) = authenticate(&app, &username, "device-x", &identity).await;
    let (token2, _) = authenticate(&app, &username, "device-y", &identity).await;

    assert_ne!(token1, token2);

    // token1's device row no longer exists: replace_device deleted it when
    // device-y authenticated, so this now renders the generic 401.
    let request = bearer(TestApp::request(Method::POST, "/api/auth/logout"), &token1)
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 401);

    let request = bearer(TestApp::request(Method::POST, "/api/auth/logout"), &token2)
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn brute_force_prevention_consumes_the_challenge_on_first_attempt() {
    let app = TestApp::new().await;
    let username = unique_username("bob");
    let (identity, _user) = register_user(&app, &username).await;

    let challenge_body = serde_json::json!({ "username": username, "device_id": "device-1" });
    let request = TestApp::request(Method::POST, "/api/auth/challenge")
        .header("content-type", "application/json")
        .body(Body::from(challenge_body.to_string()))
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 200);
    let nonce = body_to_json(response).await["data"]["nonce"].as_str().expect("nonce present").to_string();

    // Wrong signature first.
    let wrong_body = serde_json::json!({
        "username": username,
        "device_id": "device-1",
        "signature": identity.sign_b64(b"not-the-nonce"),
    });
    let request = TestApp::request(Method::POST, "/api/auth/verify")
        .header("content-type", "application/json")
        .body(Body::from(wrong_body.to_string()))
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 401);

    // Correct signature against the now-consumed challenge also fails: the
    // first attempt deleted the row regardless of outcome.
    let correct_body = serde_json::json!({
        "username": username,
        "device_id": "device-1",
        "signature": identity.sign_b64(nonce.as_bytes()),
    });
    let request = TestApp::request(Method::POST, "/api/auth/verify")
        .header("content-type", "application/json")
        .body(Body::from(correct_body.to_string()))
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 401);

    // A fresh challenge succeeds.
    let (token, _) = authenticate(&app, &username, "device-1", &identity).await;
    assert!(!token.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn generic_401_bodies_are_byte_identical() {
    let app = TestApp::new().await;
    let username = unique_username("generic401");
    let (identity, _user) = register_user(&app, &username).await;

    // Unknown user.
    let body = serde_json::json!({
        "username": unique_username("ghost"),
        "device_id": "d",
        "signature": identity.sign_b64(b"whatever"),
    });
    let request = TestApp::request(Method::POST, "/api/auth/verify")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 401);
    let unknown_user_body = body_to_json(response).await;

    // Known user, no challenge issued: bad signature against an absent row.
    let body = serde_json::json!({
        "username": username,
        "device_id": "d",
        "signature": identity.sign_b64(b"whatever"),
    });
    let request = TestApp::request(Method::POST, "/api/auth/verify")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), 401);
    let bad_signature_body = body_to_json(response).await;

    assert_eq!(unknown_user_body, bad_signature_body);
    assert_eq!(unknown_user_body["error"], "Authentication failed");
    assert!(unknown_user_body.get("message").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn at_most_one_device_per_user() {
    let app = TestApp::new().await;
    let username = unique_username("carol");
    let (identity, _user) = register_user(&app, &username).await;

    authenticate(&app, &username, "device-a", &identity).await;
    authenticate(&app, &username, "device-b", &identity).await;
    authenticate(&app, &username, "device-c", &identity).await;

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM devices d JOIN users u ON u.id = d.user_id WHERE u.username = $1",
    )
    .bind(&username)
    .fetch_one(&app.pool)
    .await
    .expect("count query failed");

    assert_eq!(count, 1);
}
