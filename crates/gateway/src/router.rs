//! Event router: the core orchestrator.
//!
//! One inbound event at a time: consult the presence directory, decide
//! routing through the message store, hand broadcasts to the retry
//! queue, and translate outcomes into transport deliveries. The router
//! owns no state of its own beyond handles to the three leaves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use parley_delivery::{
    ChatMessage, DeliveryOutcome, DeliveryStatus, MessageStore, RetryQueue, RetryRecord,
};
use parley_presence::{ConnectionId, PresenceDirectory};

use crate::events::{MessagePayload, PresenceStatus, ServerEvent};
use crate::transport::Transport;

/// Payload of a broadcast awaiting client acknowledgment.
///
/// The wire message id is the retry record id, so the payload carries
/// everything except the id; re-deliveries rebuild the identical event.
#[derive(Debug, Clone)]
pub struct RoomDispatch {
    pub room: String,
    pub username: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Build the room and wire event for a dispatch record.
pub fn room_dispatch_event(record: &RetryRecord<RoomDispatch>) -> (String, ServerEvent) {
    let dispatch = &record.payload;
    let payload = MessagePayload {
        id: record.id.clone(),
        username: dispatch.username.clone(),
        message: dispatch.body.clone(),
        timestamp: dispatch.timestamp.to_rfc3339(),
        room: Some(dispatch.room.clone()),
        status: DeliveryStatus::Delivered,
        is_private: false,
    };
    (dispatch.room.clone(), ServerEvent::Message(payload))
}

/// Orchestrates presence, delivery, and retries per inbound event.
pub struct Router<T: Transport> {
    presence: Arc<PresenceDirectory>,
    store: Arc<MessageStore>,
    retries: Arc<RetryQueue<RoomDispatch>>,
    transport: Arc<T>,
    default_room: String,
}

impl<T: Transport> Router<T> {
    pub fn new(
        presence: Arc<PresenceDirectory>,
        store: Arc<MessageStore>,
        retries: Arc<RetryQueue<RoomDispatch>>,
        transport: Arc<T>,
        default_room: impl Into<String>,
    ) -> Self {
        Self {
            presence,
            store,
            retries,
            transport,
            default_room: default_room.into(),
        }
    }

    /// A transport connection opened. Presence is untouched until the
    /// client joins.
    pub async fn on_connect(&self, connection: &ConnectionId) {
        debug!(%connection, "client connected");
    }

    /// A transport connection closed. Unknown connections are a no-op.
    pub async fn on_disconnect(&self, connection: &ConnectionId) {
        let Some(departed) = self.presence.leave(connection).await else {
            debug!(%connection, "disconnect from unbound connection");
            return;
        };

        // The only migration point besides supersession.
        self.store
            .reconcile_connection(connection, &departed.username_key)
            .await;

        info!(username = %departed.username, room = %departed.room, "user left");

        self.transport
            .deliver_to_room(
                &departed.room,
                ServerEvent::Message(MessagePayload::system_notice(
                    &departed.room,
                    format!("{} has left the chat.", departed.username),
                )),
            )
            .await;
        self.transport
            .deliver_to_room(
                &departed.room,
                ServerEvent::UserStatus {
                    username: departed.username,
                    status: PresenceStatus::Offline,
                },
            )
            .await;
    }

    /// Bind the connection to an identity and replay anything buffered
    /// while that identity was unreachable.
    pub async fn on_join(&self, connection: &ConnectionId, username: &str, room: Option<&str>) {
        let room = room.unwrap_or(&self.default_room).to_string();
        let outcome = self.presence.join(connection.clone(), username, &room).await;

        // Supersession: rescue the displaced connection's undelivered
        // messages before releasing the buffered replay below.
        if let Some(displaced) = &outcome.superseded {
            self.store
                .reconcile_connection(displaced, &outcome.username_key)
                .await;
        }

        let buffered = self.store.drain_offline(&outcome.username_key).await;
        if !buffered.is_empty() {
            info!(username, count = buffered.len(), "replaying buffered messages");
        }
        for message in buffered {
            let message = message.with_status(DeliveryStatus::Delivered);
            let event = ServerEvent::Message(MessagePayload::from_message(&message));
            if self.transport.deliver_to(connection, event).await {
                self.store
                    .confirm_delivered(&message.sender, username, None)
                    .await;
            } else {
                // Handoff failed; keep it recoverable for the next join.
                self.store.queue_undelivered(connection, message).await;
            }
        }

        info!(username, room, "user joined");

        self.transport
            .deliver_to_room(
                &room,
                ServerEvent::Message(MessagePayload::system_notice(
                    &room,
                    format!("{username} has joined the room."),
                )),
            )
            .await;
        self.transport
            .deliver_to_room(
                &room,
                ServerEvent::UserStatus {
                    username: username.to_string(),
                    status: PresenceStatus::Online,
                },
            )
            .await;
    }

    /// Route a send: trim, parse the `@name ` prefix, route, deliver,
    /// and acknowledge the sender's correlation token if present.
    pub async fn on_send(
        &self,
        connection: &ConnectionId,
        text: &str,
        correlation_token: Option<&str>,
    ) {
        let Some(sender) = self.presence.identity_for(connection).await else {
            debug!(%connection, "send from unbound connection ignored");
            return;
        };

        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let message = match parse_direct(text) {
            Some((target, body)) => ChatMessage::direct(&sender.username, target, body),
            None => ChatMessage::broadcast(&sender.username, &sender.room, text),
        };

        match self.store.route(message).await {
            DeliveryOutcome::Broadcast { message, recipients } => {
                debug!(
                    id = %message.id,
                    room = %sender.room,
                    recipients,
                    "broadcast routed"
                );
                let record_id = self
                    .retries
                    .enqueue(
                        &sender.username_key,
                        RoomDispatch {
                            room: sender.room.clone(),
                            username: message.sender.clone(),
                            body: message.body.clone(),
                            timestamp: message.timestamp,
                        },
                    )
                    .await;
                self.dispatch_pending().await;
                self.send_ack(connection, correlation_token, &record_id, DeliveryStatus::Delivered)
                    .await;
            }
            DeliveryOutcome::DirectDelivered { message, target } => {
                match self.presence.connection_for(&target.username_key).await {
                    Some(target_connection) => {
                        let event = ServerEvent::Message(MessagePayload::from_message(&message));
                        if self
                            .transport
                            .deliver_to(&target_connection, event.clone())
                            .await
                        {
                            self.store
                                .confirm_delivered(&message.sender, &target.username, None)
                                .await;
                        } else {
                            self.store
                                .queue_undelivered(&target_connection, message.clone())
                                .await;
                        }

                        // Echo to the sender.
                        self.transport.deliver_to(connection, event).await;
                        self.send_ack(
                            connection,
                            correlation_token,
                            &message.id,
                            DeliveryStatus::Delivered,
                        )
                        .await;
                    }
                    None => {
                        // The target left between the routing decision
                        // and the handoff. Land the message in its
                        // offline buffer and report it queued.
                        self.store
                            .buffer_offline(&target.username_key, message.clone())
                            .await;

                        let mut payload = MessagePayload::from_message(&message);
                        payload.status = DeliveryStatus::Queued;
                        self.transport
                            .deliver_to(connection, ServerEvent::Message(payload))
                            .await;
                        self.send_ack(
                            connection,
                            correlation_token,
                            &message.id,
                            DeliveryStatus::Queued,
                        )
                        .await;
                    }
                }
            }
            DeliveryOutcome::DirectQueued { message } => {
                // The sender receives its own copy tagged queued.
                self.transport
                    .deliver_to(
                        connection,
                        ServerEvent::Message(MessagePayload::from_message(&message)),
                    )
                    .await;
                self.send_ack(connection, correlation_token, &message.id, DeliveryStatus::Queued)
                    .await;
            }
        }
    }

    /// Client confirmation that a broadcast arrived. Duplicate or
    /// unknown ids are a no-op.
    pub async fn on_ack(&self, message_id: &str) {
        if !self.retries.acknowledge(message_id).await {
            debug!(message_id, "ack for unknown or settled record");
        }
    }

    /// Hand every pending retry record to its room, leaving each record
    /// in flight until acknowledged. Also called by the sweep loop
    /// after expired records are re-queued.
    pub async fn dispatch_pending(&self) {
        while let Some(record) = self.retries.dequeue().await {
            let (room, event) = room_dispatch_event(&record);
            if record.attempts > 0 {
                debug!(id = %record.id, attempts = record.attempts, "re-dispatching broadcast");
            }
            self.transport.deliver_to_room(&room, event).await;
        }
    }

    async fn send_ack(
        &self,
        connection: &ConnectionId,
        correlation_token: Option<&str>,
        message_id: &str,
        status: DeliveryStatus,
    ) {
        let Some(token) = correlation_token else {
            return;
        };
        self.transport
            .deliver_to(
                connection,
                ServerEvent::MessageAck {
                    correlation_token: token.to_string(),
                    message_id: message_id.to_string(),
                    status,
                },
            )
            .await;
    }
}

/// Parse a leading `@name ` prefix. Returns `(target, body)`, or
/// `None` when the text is not well-formed direct-message syntax and
/// should fall back to a broadcast.
fn parse_direct(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('@')?;
    let (target, body) = rest.split_once(' ')?;
    let body = body.trim();
    if target.is_empty() || body.is_empty() {
        return None;
    }
    Some((target, body))
}
