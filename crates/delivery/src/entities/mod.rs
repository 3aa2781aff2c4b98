//! Delivery entities.

pub mod conversation;
pub mod message;

pub use conversation::{ConversationEntry, ConversationKey};
pub use message::{ChatMessage, DeliveryStatus, MessageKind};
