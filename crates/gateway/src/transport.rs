//! Boundary between the router core and the connection layer.

use parley_presence::ConnectionId;

use crate::events::ServerEvent;

/// Outbound half of the transport boundary.
///
/// Both calls are fire-and-forget with respect to network delivery:
/// the core never waits for a remote acknowledgment here — that is the
/// retry queue's job. `deliver_to` does report whether the event was
/// handed to a live session, so the router can divert messages whose
/// handoff failed into the undelivered list.
pub trait Transport: Send + Sync {
    /// Deliver an event to one connection. Returns `false` if the
    /// connection has no live session to hand the event to.
    fn deliver_to(
        &self,
        connection: &ConnectionId,
        event: ServerEvent,
    ) -> impl std::future::Future<Output = bool> + Send;

    /// Deliver an event to every session subscribed to `room`.
    fn deliver_to_room(
        &self,
        room: &str,
        event: ServerEvent,
    ) -> impl std::future::Future<Output = ()> + Send;
}
