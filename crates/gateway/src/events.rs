//! Wire events exchanged with WebSocket clients.
//!
//! Payload field names match the original deployment of this protocol
//! (`is_private`, `correlation_token`) and must stay stable for
//! interop with existing clients.

use serde::{Deserialize, Serialize};

use parley_delivery::{ChatMessage, DeliveryStatus};

/// Client events received from WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat to keep the connection alive
    Ping,
    /// Bind this connection to a username and room
    Join {
        username: String,
        #[serde(default)]
        room: Option<String>,
    },
    /// Send a chat message (`@name text` addresses a direct message)
    Send {
        message: String,
        #[serde(default)]
        correlation_token: Option<String>,
    },
    /// Confirm receipt of a broadcast by message id
    Ack { message_id: String },
}

/// Server events sent to WebSocket clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Heartbeat response
    Pong,
    /// A chat message (broadcast, direct, or system notice)
    Message(MessagePayload),
    /// Presence change for a room member
    UserStatus {
        username: String,
        status: PresenceStatus,
    },
    /// Acknowledgment of a send that carried a correlation token
    MessageAck {
        correlation_token: String,
        message_id: String,
        status: DeliveryStatus,
    },
}

/// Reachability reported in a `user_status` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Body of a `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub username: String,
    pub message: String,
    /// RFC 3339 arrival timestamp.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub status: DeliveryStatus,
    pub is_private: bool,
}

impl MessagePayload {
    /// Wire form of a routed chat message.
    pub fn from_message(message: &ChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            username: message.sender.clone(),
            message: message.body.clone(),
            timestamp: message.timestamp.to_rfc3339(),
            room: message.room().map(str::to_string),
            status: message.status,
            is_private: message.is_private(),
        }
    }

    /// A room-scoped notice attributed to the system user.
    pub fn system_notice(room: &str, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: "System".to_string(),
            message: text.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            room: Some(room.to_string()),
            status: DeliveryStatus::Delivered,
            is_private: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_tagged_json() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"join","username":"Alice","room":"general"}"#)
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::Join {
                username: "Alice".to_string(),
                room: Some("general".to_string()),
            }
        );

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"send","message":"hi"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Send {
                message: "hi".to_string(),
                correlation_token: None,
            }
        );
    }

    #[test]
    fn message_payload_keeps_wire_field_names() {
        let payload = MessagePayload::from_message(&ChatMessage::direct("Alice", "Bob", "hi"));
        let json = serde_json::to_value(ServerEvent::Message(payload)).unwrap();

        assert_eq!(json["type"], "message");
        assert_eq!(json["username"], "Alice");
        assert_eq!(json["is_private"], true);
        assert_eq!(json["status"], "undelivered");
        assert!(json.get("room").is_none());
    }

    #[test]
    fn ack_event_shape() {
        let json = serde_json::to_value(ServerEvent::MessageAck {
            correlation_token: "tok-1".to_string(),
            message_id: "msg-1".to_string(),
            status: DeliveryStatus::Queued,
        })
        .unwrap();

        assert_eq!(json["type"], "message_ack");
        assert_eq!(json["correlation_token"], "tok-1");
        assert_eq!(json["message_id"], "msg-1");
        assert_eq!(json["status"], "queued");
    }
}
