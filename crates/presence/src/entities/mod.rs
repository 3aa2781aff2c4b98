//! Presence entities.

pub mod identity;

pub use identity::{ConnectionId, Identity};
