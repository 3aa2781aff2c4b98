use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of delivery a message asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    /// Fan out to every reachable identity in the room.
    Broadcast { room: String },
    /// Addressed to exactly one identity, by display name.
    Direct { target: String },
}

/// Delivery status of a message.
///
/// Once `Delivered`, the status never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Queued,
    Undelivered,
}

/// A chat message as routed through the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message id (uuid v4).
    pub id: String,
    /// Sender display name.
    pub sender: String,
    /// Message text, already trimmed by the router.
    pub body: String,
    /// Arrival timestamp.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MessageKind,
    pub status: DeliveryStatus,
}

impl ChatMessage {
    /// Create a room broadcast, initially `Undelivered`.
    pub fn broadcast(sender: impl Into<String>, room: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            body: body.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Broadcast { room: room.into() },
            status: DeliveryStatus::Undelivered,
        }
    }

    /// Create a direct message, initially `Undelivered`.
    pub fn direct(sender: impl Into<String>, target: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            body: body.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Direct { target: target.into() },
            status: DeliveryStatus::Undelivered,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self.kind, MessageKind::Direct { .. })
    }

    /// Room of a broadcast, `None` for direct messages.
    pub fn room(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Broadcast { room } => Some(room),
            MessageKind::Direct { .. } => None,
        }
    }

    /// Target display name of a direct message.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Direct { target } => Some(target),
            MessageKind::Broadcast { .. } => None,
        }
    }

    /// Return a copy with the given status. Delivered is terminal:
    /// attempts to downgrade it are ignored.
    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        if self.status != DeliveryStatus::Delivered {
            self.status = status;
        }
        self
    }
}
