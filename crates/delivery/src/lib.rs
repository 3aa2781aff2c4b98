//! # Parley Delivery Crate
//!
//! Two pieces of the router core live here:
//!
//! - **Message store**: per-identity offline buffers for unreachable
//!   recipients, per-connection undelivered lists, and append-only
//!   per-pair conversation logs with delivered/undelivered marking.
//! - **Retry queue**: a generic at-least-once dispatch primitive with
//!   an acknowledgment/timeout protocol and a periodic sweep loop,
//!   independent of chat semantics.

pub mod entities;
pub mod services;

pub use entities::{
    ChatMessage, ConversationEntry, ConversationKey, DeliveryStatus, MessageKind,
};
pub use services::{
    spawn_sweep_loop, DeliveryOutcome, MessageStore, QueueObserver, QueueStatus, RecordState,
    RetryQueue, RetryRecord, SweeperHandle,
};
