//! Shared gateway state: per-connection outboxes and per-room fanout.
//!
//! Each WebSocket session registers an unbounded outbox; room delivery
//! goes through a `broadcast` channel per room with one forwarding task
//! per subscribed session. The state implements [`Transport`] so the
//! router core stays oblivious to channels and sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use parley_delivery::{MessageStore, RetryQueue};
use parley_presence::{ConnectionId, PresenceDirectory};

use crate::events::ServerEvent;
use crate::router::{RoomDispatch, Router};
use crate::transport::Transport;

/// Capacity of each room's broadcast channel. A session that lags this
/// far behind loses room events; direct deliveries are unaffected.
const ROOM_CHANNEL_CAPACITY: usize = 256;

pub struct GatewayState {
    pub presence: Arc<PresenceDirectory>,
    pub store: Arc<MessageStore>,
    pub retries: Arc<RetryQueue<RoomDispatch>>,
    default_room: String,
    outboxes: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
    rooms: RwLock<HashMap<String, broadcast::Sender<ServerEvent>>>,
}

impl GatewayState {
    pub fn new(
        presence: Arc<PresenceDirectory>,
        store: Arc<MessageStore>,
        retries: Arc<RetryQueue<RoomDispatch>>,
        default_room: impl Into<String>,
    ) -> Self {
        Self {
            presence,
            store,
            retries,
            default_room: default_room.into(),
            outboxes: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Convenience constructor with a fresh core, used by tests.
    pub fn with_defaults(default_room: impl Into<String>, retry_timeout: Duration) -> Self {
        let presence = Arc::new(PresenceDirectory::new());
        let store = Arc::new(MessageStore::new(presence.clone()));
        let retries = Arc::new(RetryQueue::new(retry_timeout));
        Self::new(presence, store, retries, default_room)
    }

    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    /// Build the router core over this state as its transport.
    pub fn router(self: &Arc<Self>) -> Router<GatewayState> {
        Router::new(
            self.presence.clone(),
            self.store.clone(),
            self.retries.clone(),
            self.clone(),
            self.default_room.clone(),
        )
    }

    /// Register a session's outbox under its connection id.
    pub async fn register_connection(
        &self,
        connection: ConnectionId,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.outboxes.write().await.insert(connection, outbox);
    }

    /// Drop a session's outbox. Forwarding tasks notice on their next
    /// send and exit.
    pub async fn remove_connection(&self, connection: &ConnectionId) {
        self.outboxes.write().await.remove(connection);
    }

    /// Subscribe a connection's outbox to a room's fanout channel.
    ///
    /// Returns the forwarding task handle; the session aborts it when
    /// the client joins a different room or disconnects.
    pub async fn subscribe_room(&self, room: &str, connection: &ConnectionId) -> JoinHandle<()> {
        let sender = {
            let mut rooms = self.rooms.write().await;
            rooms
                .entry(room.to_string())
                .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
                .clone()
        };
        let mut receiver = sender.subscribe();
        let outbox = self.outboxes.read().await.get(connection).cloned();
        let connection = connection.clone();
        let room = room.to_string();

        tokio::spawn(async move {
            let Some(outbox) = outbox else {
                return;
            };
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if outbox.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(%connection, room, missed, "room subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Transport for GatewayState {
    async fn deliver_to(&self, connection: &ConnectionId, event: ServerEvent) -> bool {
        let outboxes = self.outboxes.read().await;
        match outboxes.get(connection) {
            Some(outbox) => outbox.send(event).is_ok(),
            None => false,
        }
    }

    async fn deliver_to_room(&self, room: &str, event: ServerEvent) {
        let sender = self.rooms.read().await.get(room).cloned();
        if let Some(sender) = sender {
            // No subscribers is fine; the event simply has no audience.
            let _ = sender.send(event);
        }
    }
}
