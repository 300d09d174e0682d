//! Transport edge (C8): WebSocket handshake, authentication, and the
//! `new_message` push path.
//!
//! There is no client-to-server protocol here — the external interface
//! defines exactly one server event (`new_message`); clients never send
//! anything meaningful over the socket itself. Every other interaction
//! (sending, fetching offline messages, acking deletes) is a plain HTTP call.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::jwt::verify_token;
use crate::db::queries;

/// The handshake carries the session token as a query parameter rather than
/// a WS-protocol-level payload — axum has no first-class equivalent of a
/// socket.io `auth` handshake field, and verifying the token before the
/// upgrade completes preserves the same "never exchange data pre-auth"
/// guarantee the external interface describes.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// `GET /ws?token=...`
///
/// Verifies the bearer token and that its device row still exists before
/// upgrading. A stale or forged token never reaches [`handle_socket`].
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>, Query(query): Query<WsAuthQuery>) -> Response {
    let claims = match verify_token(&state.config.session_token_secret, &query.token) {
        Ok(claims) => claims,
        Err(_) => return Response::builder().status(401).body("invalid token".into()).expect("static response"),
    };

    let device = match queries::find_device(&state.db, claims.user_id, &claims.device_id).await {
        Ok(Some(device)) => device,
        _ => return Response::builder().status(401).body("unknown device".into()).expect("static response"),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.user_id, device.device_id))
}

/// Drive one socket for its lifetime: register with the session registry
/// (kicking any prior socket for this device), forward pushed events until
/// the writer channel or the socket itself closes, and deregister on exit —
/// guarding the stale-disconnect race so a late-arriving close from an
/// already-replaced socket cannot evict the session that replaced it.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid, device_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = unbounded_channel::<Message>();
    let socket_id = Uuid::now_v7();

    if let Some(previous) = state.session_registry.connect(user_id, &device_id, socket_id, tx) {
        info!(%user_id, device_id = %device_id, previous_socket = %previous.socket_id, "kicking prior session on reconnect");
        let _ = previous.push(Message::Close(None));
    }

    info!(%user_id, device_id = %device_id, %socket_id, "socket connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // No inbound protocol to interpret; drain the stream until it closes so
    // the socket's read half doesn't pile up back-pressure. A text payload
    // here would just be a client bug — nothing expects one.
    while let Some(message) = ws_receiver.next().await {
        if message.is_err() {
            break;
        }
    }

    writer.abort();
    state.session_registry.disconnect(user_id, &device_id, socket_id);
    info!(%user_id, device_id = %device_id, %socket_id, "socket disconnected");
}
