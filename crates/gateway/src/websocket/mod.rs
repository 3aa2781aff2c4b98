//! WebSocket session layer.
//!
//! Each accepted socket gets a fresh connection id, an outbox, and a
//! send/receive task pair. Inbound frames decode to [`ClientEvent`]s
//! and feed the router core; outbound [`ServerEvent`]s drain from the
//! outbox. Malformed frames are logged and skipped, never fatal.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router as AxumRouter,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_presence::ConnectionId;

use crate::events::{ClientEvent, ServerEvent};
use crate::state::GatewayState;

pub fn create_websocket_routes() -> AxumRouter<Arc<GatewayState>> {
    AxumRouter::new().route("/ws", get(websocket_handler))
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let connection = ConnectionId::new();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state
        .register_connection(connection.clone(), outbox_tx.clone())
        .await;

    let router = state.router();
    router.on_connect(&connection).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(error) => {
                    warn!(%error, "failed to encode outbound event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_connection = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        let router = recv_state.router();
        // Handle of the current room-forwarding task, replaced on join.
        let mut room_forwarder: Option<JoinHandle<()>> = None;

        while let Some(frame) = ws_receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(error) => {
                    debug!(connection = %recv_connection, %error, "websocket read error");
                    break;
                }
            };

            let event = match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => event,
                Err(error) => {
                    warn!(connection = %recv_connection, %error, "discarding malformed frame");
                    continue;
                }
            };

            match event {
                ClientEvent::Ping => {
                    if outbox_tx.send(ServerEvent::Pong).is_err() {
                        break;
                    }
                }
                ClientEvent::Join { username, room } => {
                    let room = room.unwrap_or_else(|| recv_state.default_room().to_string());
                    if let Some(previous) = room_forwarder.take() {
                        previous.abort();
                    }
                    room_forwarder =
                        Some(recv_state.subscribe_room(&room, &recv_connection).await);
                    router
                        .on_join(&recv_connection, &username, Some(&room))
                        .await;
                }
                ClientEvent::Send {
                    message,
                    correlation_token,
                } => {
                    router
                        .on_send(&recv_connection, &message, correlation_token.as_deref())
                        .await;
                }
                ClientEvent::Ack { message_id } => {
                    router.on_ack(&message_id).await;
                }
            }
        }

        if let Some(forwarder) = room_forwarder.take() {
            forwarder.abort();
        }
    });

    // Either task ending tears the session down.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    router.on_disconnect(&connection).await;
    state.remove_connection(&connection).await;
    debug!(%connection, "websocket session closed");
}
