//! # Parley Presence Crate
//!
//! Authoritative mapping of connection -> identity -> room, and
//! identity -> reachability. Leaf component of the router core; the
//! delivery store and the router query it, nothing here calls out.

pub mod directory;
pub mod entities;

pub use directory::{DepartedIdentity, JoinOutcome, PresenceDirectory};
pub use entities::{ConnectionId, Identity};
