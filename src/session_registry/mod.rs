//! Session registry (C5)
//!
//! An in-memory map of currently-connected clients, keyed by `user_id` +
//! `device_id`. Backed by [`DashMap`] for lock-free concurrent access —
//! connects and disconnects are rare compared to the read-heavy lookup path
//! used by the relay engine (C6) to decide between a live push and queueing.
//!
//! Invariant SS-1 bounds every user to at most one [`crate::db::Device`] row,
//! so this registry never needs to fan out to more than one socket per user.

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// A single registered connection: the socket identity and a channel back to
/// its write half, so other requests can push events without owning the
/// socket itself.
#[derive(Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub device_id: String,
    pub socket_id: Uuid,
    sender: UnboundedSender<Message>,
}

impl Session {
    /// Push a message to this session's socket. A failure means the socket's
    /// receive task has already exited; the caller should treat the session
    /// as gone (the relay engine falls through to queueing in that case).
    pub fn push(&self, message: Message) -> Result<(), ()> {
        self.sender.send(message).map_err(|_| ())
    }
}

fn registry_key(user_id: Uuid, device_id: &str) -> String {
    format!("{user_id}:{device_id}")
}

/// The process-wide connection registry (C5).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Register a newly-authenticated socket for `(user_id, device_id)`.
    ///
    /// If a session is already registered for this key, it is replaced and
    /// the prior [`Session`] is returned so the caller can forcibly close its
    /// socket (kick-on-reconnect). The registry itself never closes sockets —
    /// that is a transport concern left to [`crate::ws`].
    #[tracing::instrument(skip(self, sender), fields(user_id = %user_id, device_id = %device_id))]
    pub fn connect(
        &self,
        user_id: Uuid,
        device_id: &str,
        socket_id: Uuid,
        sender: UnboundedSender<Message>,
    ) -> Option<Session> {
        let key = registry_key(user_id, device_id);
        let session = Session { user_id, device_id: device_id.to_string(), socket_id, sender };
        self.sessions.insert(key, session)
    }

    /// Remove the mapping for `(user_id, device_id)`, but only if its current
    /// `socket_id` still matches `socket_id` — a stale disconnect event from a
    /// socket that has already been replaced must not evict the newer one.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, device_id = %device_id))]
    pub fn disconnect(&self, user_id: Uuid, device_id: &str, socket_id: Uuid) {
        let key = registry_key(user_id, device_id);
        if let dashmap::mapref::entry::Entry::Occupied(entry) = self.sessions.entry(key) {
            if entry.get().socket_id == socket_id {
                entry.remove();
            }
        }
    }

    #[must_use]
    pub fn is_online(&self, user_id: Uuid, device_id: &str) -> bool {
        self.sessions.contains_key(&registry_key(user_id, device_id))
    }

    #[must_use]
    pub fn socket_of(&self, user_id: Uuid, device_id: &str) -> Option<Session> {
        self.sessions.get(&registry_key(user_id, device_id)).map(|e| e.clone())
    }

    /// SS-1 bounds every user to at most one device, so this is a single
    /// lookup rather than a fan-out query: the registry has no way to hold
    /// more than one entry per user in a correctly-running system, but a
    /// caller may still legitimately ask "is *the* device of this user
    /// online" without knowing its `device_id`.
    #[must_use]
    pub fn any_online_device_of(&self, user_id: Uuid) -> Option<Session> {
        self.sessions.iter().find(|e| e.value().user_id == user_id).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn make_sender() -> UnboundedSender<Message> {
        let (tx, _rx) = unbounded_channel();
        tx
    }

    #[test]
    fn connect_replaces_prior_session_and_returns_it() {
        let registry = SessionRegistry::new();
        let user_id = Uuid::now_v7();
        let first_socket = Uuid::now_v7();
        let second_socket = Uuid::now_v7();

        assert!(registry.connect(user_id, "device-a", first_socket, make_sender()).is_none());
        let replaced = registry.connect(user_id, "device-a", second_socket, make_sender());
        assert_eq!(replaced.unwrap().socket_id, first_socket);
        assert_eq!(registry.socket_of(user_id, "device-a").unwrap().socket_id, second_socket);
    }

    #[test]
    fn stale_disconnect_does_not_evict_newer_session() {
        let registry = SessionRegistry::new();
        let user_id = Uuid::now_v7();
        let first_socket = Uuid::now_v7();
        let second_socket = Uuid::now_v7();

        registry.connect(user_id, "device-a", first_socket, make_sender());
        registry.connect(user_id, "device-a", second_socket, make_sender());

        // A disconnect event for the now-replaced first socket arrives late.
        registry.disconnect(user_id, "device-a", first_socket);

        assert!(registry.is_online(user_id, "device-a"));
        assert_eq!(registry.socket_of(user_id, "device-a").unwrap().socket_id, second_socket);
    }

    #[test]
    fn matching_disconnect_removes_session() {
        let registry = SessionRegistry::new();
        let user_id = Uuid::now_v7();
        let socket_id = Uuid::now_v7();

        registry.connect(user_id, "device-a", socket_id, make_sender());
        registry.disconnect(user_id, "device-a", socket_id);

        assert!(!registry.is_online(user_id, "device-a"));
    }

    #[test]
    fn any_online_device_of_returns_the_singleton() {
        let registry = SessionRegistry::new();
        let user_id = Uuid::now_v7();
        let socket_id = Uuid::now_v7();

        assert!(registry.any_online_device_of(user_id).is_none());
        registry.connect(user_id, "device-a", socket_id, make_sender());
        assert_eq!(registry.any_online_device_of(user_id).unwrap().device_id, "device-a");
    }
}
