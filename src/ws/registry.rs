//! Live connection registry: the per-user set of open WebSocket connections.
//!
//! Process-lifetime state with no persistence — rebuilt empty on restart.
//! Delivery is best-effort: a failed push removes the dead connection and is
//! never surfaced to the caller; the durable notification/message row written
//! by the producer is the source of truth for later retrieval. The registry
//! is process-local, so in a multi-instance deployment users connected to a
//! different instance are simply not reachable from here.

use axum::extract::ws::Message;
use dashmap::DashMap;

use crate::ws::events::OutboundEvent;
use crate::ws::ConnectionSender;

/// Tracks which users currently have live WebSocket connections and routes
/// outbound events to them. A user can have multiple concurrent connections
/// (multiple devices/tabs); a user's key is present in the map iff at least
/// one of their connections is live. Created once at process start and
/// shared via `AppState`.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<i64, Vec<ConnectionSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection under `user_id`.
    pub fn register(&self, user_id: i64, sender: ConnectionSender) {
        self.connections.entry(user_id).or_default().push(sender);

        tracing::debug!(
            user_id,
            connections = self.connection_count(user_id),
            "connection registered"
        );
    }

    /// Remove a connection from its owner's set, along with any senders
    /// whose writer task has already died. A no-op if the connection was
    /// already removed.
    pub fn unregister(&self, user_id: i64, sender: &ConnectionSender) {
        if let Some(mut conns) = self.connections.get_mut(&user_id) {
            conns.retain(|c| !c.same_channel(sender) && !c.is_closed());
        }
        self.connections.remove_if(&user_id, |_, conns| conns.is_empty());

        tracing::debug!(user_id, "connection unregistered");
    }

    /// Serialize `event` once and fan it out to every live connection of
    /// `user_id`. Never fails observably.
    pub fn send(&self, user_id: i64, event: &OutboundEvent) {
        match serde_json::to_string(event) {
            Ok(text) => self.send_text(user_id, text),
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to serialize outbound event");
            }
        }
    }

    /// Fan a raw text frame out to every live connection of `user_id`.
    ///
    /// A push that fails (the connection's writer is gone) removes only that
    /// connection; the user's other connections still receive the frame.
    /// Zero registered connections is a silent no-op.
    pub fn send_text(&self, user_id: i64, text: String) {
        let msg = Message::Text(text.into());

        if let Some(mut conns) = self.connections.get_mut(&user_id) {
            conns.retain(|sender| sender.send(msg.clone()).is_ok());
        }
        self.connections.remove_if(&user_id, |_, conns| conns.is_empty());
    }

    /// Whether `user_id` has at least one live connection.
    pub fn is_online(&self, user_id: i64) -> bool {
        self.connections.contains_key(&user_id)
    }

    /// Number of live connections registered for `user_id`.
    pub fn connection_count(&self, user_id: i64) -> usize {
        self.connections.get(&user_id).map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn connection() -> (ConnectionSender, UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    fn pong() -> OutboundEvent {
        OutboundEvent::Pong
    }

    fn recv_text(rx: &mut UnboundedReceiver<Message>) -> Option<String> {
        match rx.try_recv().ok()? {
            Message::Text(text) => Some(text.to_string()),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn register_then_unregister_prunes_the_user_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = connection();

        registry.register(7, tx.clone());
        assert!(registry.is_online(7));
        assert_eq!(registry.connection_count(7), 1);

        registry.unregister(7, &tx);
        assert!(!registry.is_online(7));
        assert_eq!(registry.connection_count(7), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = connection();

        registry.register(7, tx.clone());
        registry.unregister(7, &tx);
        registry.unregister(7, &tx);

        assert!(!registry.is_online(7));
    }

    #[test]
    fn unregister_removes_only_that_connection() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = connection();
        let (tx2, mut rx2) = connection();

        registry.register(7, tx1.clone());
        registry.register(7, tx2);
        registry.unregister(7, &tx1);

        assert_eq!(registry.connection_count(7), 1);
        registry.send(7, &pong());
        assert!(recv_text(&mut rx2).is_some());
    }

    #[test]
    fn send_to_user_without_connections_is_a_noop() {
        let registry = ConnectionRegistry::new();
        registry.send(42, &pong());
        assert!(!registry.is_online(42));
    }

    #[test]
    fn send_fans_out_to_all_connections_of_the_user() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = connection();
        let (tx2, mut rx2) = connection();

        registry.register(7, tx1);
        registry.register(7, tx2);
        registry.send(7, &pong());

        for rx in [&mut rx1, &mut rx2] {
            let text = recv_text(rx).expect("connection should receive the event");
            assert!(text.contains("\"type\":\"pong\""));
        }
    }

    #[test]
    fn failed_send_drops_only_the_dead_connection() {
        let registry = ConnectionRegistry::new();
        let (tx1, rx1) = connection();
        let (tx2, mut rx2) = connection();

        registry.register(7, tx1);
        registry.register(7, tx2);

        // Simulate a broken transport: the writer side is gone.
        drop(rx1);

        registry.send(7, &pong());
        assert!(recv_text(&mut rx2).is_some(), "live connection still receives");
        assert_eq!(registry.connection_count(7), 1, "dead connection was pruned");
    }

    #[test]
    fn last_dead_connection_prunes_the_user_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = connection();

        registry.register(9, tx);
        drop(rx);
        registry.send(9, &pong());

        assert!(!registry.is_online(9));
    }

    #[test]
    fn delivery_order_per_connection_is_fifo() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = connection();
        registry.register(7, tx);

        registry.send_text(7, "first".to_string());
        registry.send_text(7, "second".to_string());

        assert_eq!(recv_text(&mut rx).as_deref(), Some("first"));
        assert_eq!(recv_text(&mut rx).as_deref(), Some("second"));
    }
}
