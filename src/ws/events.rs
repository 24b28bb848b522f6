//! Outbound event types delivered over WebSocket.
//!
//! Every frame the server pushes to a client is one of these variants,
//! serialized as JSON with a `type` tag. The set is closed: event producers
//! cannot invent ad-hoc payload shapes.

use serde::{Deserialize, Serialize};

/// Sender info embedded in notification and message events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUser {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
}

/// An event destined for a specific user's live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A persisted notification, pushed right after its row is written.
    Notification {
        id: i64,
        notification_type: String,
        title: String,
        message: String,
        sender: Option<EventUser>,
        data: serde_json::Value,
        created_at: String,
    },
    /// A new direct message.
    Message {
        id: i64,
        sender: EventUser,
        content: Option<String>,
        message_type: String,
        media_url: Option<String>,
        created_at: String,
        is_read: bool,
    },
    /// A peer started or stopped typing.
    Typing {
        sender_id: i64,
        sender_name: String,
        is_typing: bool,
    },
    /// A message the user sent was read by its recipient.
    MessageRead {
        message_id: i64,
        read_by: i64,
        read_at: String,
    },
    /// Heartbeat acknowledgement, sent only on the connection that asked.
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_snake_case_type_tags() {
        let json = serde_json::to_value(&OutboundEvent::Pong).unwrap();
        assert_eq!(json["type"], "pong");

        let json = serde_json::to_value(&OutboundEvent::Typing {
            sender_id: 3,
            sender_name: "Ada Lovelace".to_string(),
            is_typing: true,
        })
        .unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["sender_id"], 3);
        assert_eq!(json["is_typing"], true);

        let json = serde_json::to_value(&OutboundEvent::MessageRead {
            message_id: 10,
            read_by: 7,
            read_at: "2026-01-01T00:00:00+00:00".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "message_read");
        assert_eq!(json["message_id"], 10);
    }

    #[test]
    fn notification_event_embeds_sender_and_data() {
        let event = OutboundEvent::Notification {
            id: 1,
            notification_type: "like".to_string(),
            title: "New reaction!".to_string(),
            message: "Ada Lovelace reacted to your post".to_string(),
            sender: Some(EventUser {
                id: 3,
                name: "Ada Lovelace".to_string(),
                avatar: None,
            }),
            data: serde_json::json!({"post_id": 42}),
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["sender"]["name"], "Ada Lovelace");
        assert_eq!(json["data"]["post_id"], 42);
    }
}
