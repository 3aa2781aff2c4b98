//! End-to-end scenarios over the gateway state and router core, using
//! real outbox channels in place of WebSocket sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use parley_delivery::DeliveryStatus;
use parley_gateway::events::{MessagePayload, ServerEvent};
use parley_gateway::GatewayState;
use parley_presence::ConnectionId;

struct Session {
    connection: ConnectionId,
    inbox: mpsc::UnboundedReceiver<ServerEvent>,
}

async fn connect(state: &Arc<GatewayState>) -> Session {
    let connection = ConnectionId::new();
    let (tx, inbox) = mpsc::unbounded_channel();
    state.register_connection(connection.clone(), tx).await;
    Session { connection, inbox }
}

fn drain_events(session: &mut Session) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = session.inbox.try_recv() {
        events.push(event);
    }
    events
}

fn drain_messages(session: &mut Session) -> Vec<MessagePayload> {
    drain_events(session)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Message(payload) => Some(payload),
            _ => None,
        })
        .collect()
}

fn chat_only(payloads: Vec<MessagePayload>) -> Vec<MessagePayload> {
    payloads
        .into_iter()
        .filter(|p| p.username != "System")
        .collect()
}

#[tokio::test]
async fn offline_direct_message_is_replayed_on_join() {
    let state = Arc::new(GatewayState::with_defaults(
        "general",
        Duration::from_secs(10),
    ));
    let router = state.router();

    let mut alice = connect(&state).await;
    router.on_join(&alice.connection, "Alice", None).await;
    router
        .on_send(&alice.connection, "@Bob you around?", Some("t1"))
        .await;

    // Alice sees her queued copy and a queued ack.
    let alice_events = drain_events(&mut alice);
    let alice_chat: Vec<_> = alice_events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Message(payload) if payload.username != "System" => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(alice_chat.len(), 1);
    assert_eq!(alice_chat[0].status, DeliveryStatus::Queued);
    assert!(alice_events.iter().any(|event| matches!(
        event,
        ServerEvent::MessageAck {
            correlation_token,
            status: DeliveryStatus::Queued,
            ..
        } if correlation_token == "t1"
    )));

    // Bob joins and receives the buffered message marked delivered.
    let mut bob = connect(&state).await;
    router.on_join(&bob.connection, "Bob", None).await;

    let bob_chat = chat_only(drain_messages(&mut bob));
    assert_eq!(bob_chat.len(), 1);
    assert_eq!(bob_chat[0].username, "Alice");
    assert_eq!(bob_chat[0].message, "you around?");
    assert_eq!(bob_chat[0].status, DeliveryStatus::Delivered);
    assert!(bob_chat[0].is_private);

    // Conversation flipped to delivered; buffer is empty.
    let log = state.store.conversation("Alice", "Bob").await;
    assert_eq!(log.len(), 1);
    assert!(log[0].delivered);
    assert!(state.store.drain_offline("bob").await.is_empty());
}

#[tokio::test]
async fn broadcast_travels_through_room_fanout_and_settles_on_ack() {
    let state = Arc::new(GatewayState::with_defaults(
        "general",
        Duration::from_secs(10),
    ));
    let router = state.router();

    let mut alice = connect(&state).await;
    let alice_forwarder = state.subscribe_room("general", &alice.connection).await;
    router.on_join(&alice.connection, "Alice", None).await;

    let mut bob = connect(&state).await;
    let bob_forwarder = state.subscribe_room("general", &bob.connection).await;
    router.on_join(&bob.connection, "Bob", None).await;

    router
        .on_send(&alice.connection, "hello everyone", Some("t2"))
        .await;

    // Bob's forwarder relays the broadcast.
    let payload = loop {
        let event = timeout(Duration::from_secs(2), bob.inbox.recv())
            .await
            .expect("room event expected")
            .expect("channel open");
        if let ServerEvent::Message(payload) = event {
            if payload.username == "Alice" {
                break payload;
            }
        }
    };
    assert_eq!(payload.message, "hello everyone");
    assert_eq!(payload.room.as_deref(), Some("general"));
    assert!(!payload.is_private);

    // The record stays in flight until a client acknowledges it.
    assert_eq!(state.retries.status().await.in_flight, 1);
    router.on_ack(&payload.id).await;
    let status = state.retries.status().await;
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.acknowledged, 1);

    alice_forwarder.abort();
    bob_forwarder.abort();
}

#[tokio::test]
async fn unacknowledged_broadcast_is_redispatched_after_sweep() {
    let state = Arc::new(GatewayState::with_defaults(
        "general",
        Duration::from_millis(10),
    ));
    let router = state.router();

    let mut alice = connect(&state).await;
    let forwarder = state.subscribe_room("general", &alice.connection).await;
    router.on_join(&alice.connection, "Alice", None).await;
    router.on_send(&alice.connection, "anyone there", None).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    let swept = state.retries.sweep_expired(std::time::Instant::now()).await;
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].attempts, 1);

    router.dispatch_pending().await;

    // The same message id arrives twice through the room channel.
    let mut seen = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), alice.inbox.recv()).await {
        if let ServerEvent::Message(payload) = event {
            if payload.username == "Alice" {
                seen.push(payload.id);
            }
        }
        if seen.len() == 2 {
            break;
        }
    }
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);

    forwarder.abort();
}

#[tokio::test]
async fn second_login_takes_over_name_and_pending_messages() {
    let state = Arc::new(GatewayState::with_defaults(
        "general",
        Duration::from_secs(10),
    ));
    let router = state.router();

    let alice = connect(&state).await;
    router.on_join(&alice.connection, "Alice", None).await;

    // Carol's first session goes dead without a disconnect event.
    let carol_first = connect(&state).await;
    router.on_join(&carol_first.connection, "Carol", None).await;
    state.remove_connection(&carol_first.connection).await;

    router
        .on_send(&alice.connection, "@Carol still there?", None)
        .await;

    // A second session joins under the same name and inherits the
    // message that never reached the first one.
    let mut carol_second = connect(&state).await;
    router.on_join(&carol_second.connection, "carol", None).await;

    let chat = chat_only(drain_messages(&mut carol_second));
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0].message, "still there?");
    assert_eq!(chat[0].status, DeliveryStatus::Delivered);

    // The first connection is no longer bound.
    assert!(state
        .presence
        .identity_for(&carol_first.connection)
        .await
        .is_none());
}
