//! Inbound control-message handling.
//!
//! Clients send small JSON control frames over an open connection: typing
//! indicators, read receipts, and heartbeats. None of these carry chat
//! content — messages are created over REST. Parsing is deliberately
//! forgiving: a frame that is not valid JSON is echoed back as plain text,
//! and valid JSON that is not a recognized control message is ignored.
//! Neither case closes the connection.

use axum::extract::ws::Message;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::SocketIdentity;
use crate::state::AppState;
use crate::ws::events::OutboundEvent;

/// Control messages a client may send over an open connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundControlMessage {
    /// The client started (or stopped) typing to `recipient_id`.
    Typing {
        recipient_id: i64,
        #[serde(default = "default_is_typing")]
        is_typing: bool,
    },
    /// The client read message `message_id`.
    MessageRead { message_id: i64 },
    /// Liveness check, answered with a `pong` event on the same connection.
    Heartbeat,
}

fn default_is_typing() -> bool {
    true
}

/// Handle one inbound text frame from an authenticated connection.
pub async fn handle_text_message(
    raw: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    identity: &SocketIdentity,
) {
    // Non-JSON input degrades to a plain-text echo on the sender's own
    // connections; it is not a protocol violation.
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            state.registry.send_text(identity.id, format!("Echo: {}", raw));
            return;
        }
    };

    let control = match serde_json::from_value::<InboundControlMessage>(value) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(
                user_id = identity.id,
                error = %e,
                "unrecognized control message"
            );
            return;
        }
    };

    match control {
        InboundControlMessage::Typing {
            recipient_id,
            is_typing,
        } => {
            // Fan out to the recipient only; never persisted, never echoed
            // back to the sender's own connections.
            state.registry.send(
                recipient_id,
                &OutboundEvent::Typing {
                    sender_id: identity.id,
                    sender_name: identity.name.clone(),
                    is_typing,
                },
            );
        }
        InboundControlMessage::MessageRead { message_id } => {
            handle_message_read(state, identity, message_id).await;
        }
        InboundControlMessage::Heartbeat => {
            send_event(tx, &OutboundEvent::Pong);
        }
    }
}

/// Mark a message read and deliver a receipt to its original sender.
///
/// Only the message's recipient can mark it. A missing, foreign, or
/// already-read message produces no mutation and no outbound send.
async fn handle_message_read(state: &AppState, identity: &SocketIdentity, message_id: i64) {
    let db = state.db.clone();
    let reader_id = identity.id;

    let receipt = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;

        let (sender_id, is_read): (i64, bool) = conn
            .query_row(
                "SELECT sender_id, is_read FROM messages WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![message_id, reader_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok()?;

        if is_read {
            return None;
        }

        let read_at = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE messages SET is_read = 1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![read_at, message_id],
        )
        .ok()?;

        Some((sender_id, read_at))
    })
    .await
    .ok()
    .flatten();

    if let Some((sender_id, read_at)) = receipt {
        state.registry.send(
            sender_id,
            &OutboundEvent::MessageRead {
                message_id,
                read_by: reader_id,
                read_at,
            },
        );
    }
}

/// Encode an event and push it on a single connection's channel.
fn send_event(tx: &mpsc::UnboundedSender<Message>, event: &OutboundEvent) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_defaults_to_is_typing_true() {
        let msg: InboundControlMessage =
            serde_json::from_str(r#"{"type": "typing", "recipient_id": 2}"#).unwrap();
        match msg {
            InboundControlMessage::Typing {
                recipient_id,
                is_typing,
            } => {
                assert_eq!(recipient_id, 2);
                assert!(is_typing);
            }
            other => panic!("expected typing, got {:?}", other),
        }
    }

    #[test]
    fn heartbeat_parses_without_fields() {
        let msg: InboundControlMessage =
            serde_json::from_str(r#"{"type": "heartbeat"}"#).unwrap();
        assert!(matches!(msg, InboundControlMessage::Heartbeat));
    }

    #[test]
    fn message_read_requires_message_id() {
        assert!(serde_json::from_str::<InboundControlMessage>(r#"{"type": "message_read"}"#)
            .is_err());

        let msg: InboundControlMessage =
            serde_json::from_str(r#"{"type": "message_read", "message_id": 5}"#).unwrap();
        assert!(matches!(
            msg,
            InboundControlMessage::MessageRead { message_id: 5 }
        ));
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        assert!(
            serde_json::from_str::<InboundControlMessage>(r#"{"type": "shrug"}"#).is_err()
        );
    }
}
