//! Signaling client integration tests.
//!
//! Covers the connection lifecycle against the in-memory server:
//! - One cached connection per client, started at most once
//! - Event bus delivery of lifecycle and server events
//! - Bounded reconnection with backoff
//! - Listener cleanup on disconnect
//! - Flushing and reporting of queued events on close

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use common::secret::SecretString;
use meet_client::config::Config;
use meet_client::errors::SignalingError;
use meet_client::signaling::{
    ClientEvent, ConnectOptions, EventKind, LinkState, ServerEvent, SignalingClient,
    SignalingEvent, SignalingTransport, CLIENT_DISCONNECT_REASON,
};
use meet_test_utils::{
    assert_eventually, roster, settle, test_config, test_config_with, MockSignalingServer,
    TEST_SOCKET_URL,
};
use tokio::sync::mpsc;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn client(server: &Arc<MockSignalingServer>) -> SignalingClient {
    client_with(server, &test_config())
}

fn client_with(server: &Arc<MockSignalingServer>, config: &Config) -> SignalingClient {
    let options =
        ConnectOptions::from_config(config).with_token(SecretString::from("token-amy"));
    let transport = Arc::clone(server) as Arc<dyn SignalingTransport>;
    SignalingClient::new(TEST_SOCKET_URL, options, transport)
}

async fn next(events: &mut mpsc::UnboundedReceiver<SignalingEvent>) -> SignalingEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for signaling event")
        .expect("event bus closed")
}

fn end_meeting() -> ClientEvent {
    ClientEvent::EndMeeting {
        meeting_id: "m1".to_string(),
    }
}

fn new_user() -> ClientEvent {
    ClientEvent::NewUser {
        token: SecretString::from("token-amy"),
        user_id: "amy".to_string(),
        meeting_id: "m1".to_string(),
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_connection_is_lazy_and_cached() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    assert!(!client.has_connection().await);

    let connection = client.connection().await;
    assert_eq!(connection.state(), LinkState::Idle);
    assert!(client.has_connection().await);

    settle().await;
    assert_eq!(server.open_count(), 0, "connection() must not connect");
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let first = client.connect().await;
    let second = client.connect().await;

    let socket_id = first.wait_connected(RECV_TIMEOUT).await.unwrap();
    assert_eq!(socket_id, "socket-1");
    assert_eq!(second.socket_id().as_deref(), Some("socket-1"));

    settle().await;
    assert_eq!(server.open_count(), 1);
    assert_eq!(server.credentials_seen(), vec![true]);
}

#[tokio::test]
async fn test_connected_event_published() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connection().await;
    let mut connected = connection.subscribe(EventKind::Connect).await;
    client.connect().await;

    assert_eq!(
        next(&mut connected).await,
        SignalingEvent::Connected {
            socket_id: "socket-1".to_string()
        }
    );
    assert!(connection.is_connected());
}

#[tokio::test]
async fn test_emit_before_connect_is_delivered_after_connect() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connection().await;
    connection.emit(new_user()).unwrap();
    assert!(server.sent_events().is_empty());

    client.connect().await;

    let check = Arc::clone(&server);
    assert_eventually("buffered event delivered", || {
        let server = Arc::clone(&check);
        async move { server.sent_event_names() == vec!["newUser"] }
    })
    .await;
}

#[tokio::test]
async fn test_server_events_reach_subscribers() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connect().await;
    let mut users = connection.subscribe(EventKind::UsersOnline).await;
    let mut ended = connection.subscribe(EventKind::MeetingEnded).await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    let online = ServerEvent::UsersOnline {
        users: roster(&["amy", "bob"]),
        joining_user: None,
        leaving_user: None,
    };
    server.broadcast(online.clone()).await;
    server.broadcast(ServerEvent::MeetingEnded).await;

    assert_eq!(next(&mut users).await, SignalingEvent::Server(online));
    assert_eq!(
        next(&mut ended).await,
        SignalingEvent::Server(ServerEvent::MeetingEnded)
    );
}

#[tokio::test]
async fn test_every_subscriber_receives_event() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connect().await;
    let mut first = connection.subscribe(EventKind::ServerError).await;
    let mut second = connection.subscribe(EventKind::ServerError).await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    server
        .broadcast(ServerEvent::ServerError {
            message: "boom".to_string(),
        })
        .await;

    for events in [&mut first, &mut second] {
        assert!(matches!(
            next(events).await,
            SignalingEvent::Server(ServerEvent::ServerError { .. })
        ));
    }
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_removes_domain_listeners() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connect().await;
    let _users = connection.subscribe(EventKind::UsersOnline).await;
    let _chat = connection.subscribe(EventKind::NewMessage).await;
    let mut disconnects = connection.subscribe(EventKind::Disconnect).await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    client.disconnect().await;

    assert_eq!(connection.listener_count(EventKind::UsersOnline).await, 0);
    assert_eq!(connection.listener_count(EventKind::NewMessage).await, 0);
    assert_eq!(
        next(&mut disconnects).await,
        SignalingEvent::Disconnected {
            reason: CLIENT_DISCONNECT_REASON.to_string()
        }
    );

    assert_eq!(connection.state(), LinkState::Closed);
    assert!(matches!(
        connection.emit(new_user()),
        Err(SignalingError::Closed)
    ));
    assert!(!client.has_connection().await);
    assert!(server.live_links().is_empty());
}

#[tokio::test]
async fn test_disconnect_without_connection_is_noop() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    assert!(client.disconnect().await.is_empty());

    assert!(!client.has_connection().await);
    assert_eq!(server.open_count(), 0);
}

#[tokio::test]
async fn test_connect_after_disconnect_opens_new_link() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    client
        .connect()
        .await
        .wait_connected(RECV_TIMEOUT)
        .await
        .unwrap();
    client.disconnect().await;

    let socket_id = client
        .connect()
        .await
        .wait_connected(RECV_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(socket_id, "socket-2");
    assert_eq!(server.open_count(), 2);
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_reconnects_after_link_loss() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connect().await;
    let mut disconnects = connection.subscribe(EventKind::Disconnect).await;
    let mut attempts = connection.subscribe(EventKind::ReconnectAttempt).await;
    let mut reconnects = connection.subscribe(EventKind::Reconnect).await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    server.drop_links();

    assert!(matches!(
        next(&mut disconnects).await,
        SignalingEvent::Disconnected { reason } if reason != CLIENT_DISCONNECT_REASON
    ));
    assert_eq!(
        next(&mut attempts).await,
        SignalingEvent::ReconnectAttempt { attempt: 1 }
    );
    assert_eq!(
        next(&mut reconnects).await,
        SignalingEvent::Reconnected { attempt: 1 }
    );
    assert_eq!(connection.socket_id().as_deref(), Some("socket-2"));
    assert_eq!(server.live_links(), vec!["socket-2"]);
}

#[tokio::test]
async fn test_initial_connect_retries() {
    let server = MockSignalingServer::new();
    server.fail_next_opens(1);
    let client = client(&server);

    let connection = client.connection().await;
    let mut errors = connection.subscribe(EventKind::ConnectError).await;
    let mut reconnects = connection.subscribe(EventKind::Reconnect).await;
    client.connect().await;

    assert!(matches!(
        next(&mut errors).await,
        SignalingEvent::ConnectError { .. }
    ));
    let socket_id = connection.wait_connected(RECV_TIMEOUT).await.unwrap();
    assert_eq!(socket_id, "socket-2");

    // Never connected before, so this is not a reconnection
    settle().await;
    assert!(reconnects.try_recv().is_err());
}

#[tokio::test]
async fn test_reconnect_attempts_are_bounded() {
    let server = MockSignalingServer::new();
    server.refuse_opens();
    let client = client(&server);

    let connection = client.connection().await;
    let mut failed = connection.subscribe(EventKind::ReconnectFailed).await;
    client.connect().await;

    assert_eq!(
        next(&mut failed).await,
        SignalingEvent::ReconnectFailed { attempts: 3 }
    );
    assert!(matches!(
        connection.wait_connected(RECV_TIMEOUT).await,
        Err(SignalingError::Closed)
    ));
    assert_eq!(connection.state(), LinkState::Closed);
    assert_eq!(server.open_count(), 4);
}

#[tokio::test]
async fn test_events_emitted_while_reconnecting_are_delivered() {
    let server = MockSignalingServer::new();
    let config = test_config_with(&[
        ("SOCKET_RECONNECTION_ATTEMPTS", "10"),
        ("SOCKET_RECONNECTION_DELAY_MS", "50"),
        ("SOCKET_RECONNECTION_DELAY_MAX_MS", "50"),
    ]);
    let client = client_with(&server, &config);

    let connection = client.connect().await;
    let mut reconnects = connection.subscribe(EventKind::Reconnect).await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    server.refuse_opens();
    server.drop_links();
    let check = Arc::clone(&server);
    assert_eventually("client noticed the lost link", || {
        let server = Arc::clone(&check);
        async move { server.open_count() >= 2 }
    })
    .await;

    connection.emit(new_user()).unwrap();
    server.accept_opens();

    next(&mut reconnects).await;
    let check = Arc::clone(&server);
    assert_eventually("queued event delivered on the new link", || {
        let server = Arc::clone(&check);
        async move { server.sent_event_names() == vec!["newUser"] }
    })
    .await;
    assert!(server.sent_by("socket-1").is_empty());
}

// ============================================================================
// Close with queued events
// ============================================================================

#[tokio::test]
async fn test_disconnect_flushes_events_emitted_just_before() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connect().await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    // Repeat to give the cancel branch a chance to win the race
    for round in 0..20 {
        if round > 0 {
            client
                .connect()
                .await
                .wait_connected(RECV_TIMEOUT)
                .await
                .unwrap();
        }
        let connection = client.connection().await;
        connection.emit(end_meeting()).unwrap();

        let undelivered = client.disconnect().await;
        assert!(undelivered.is_empty(), "round {round}: {undelivered:?}");
    }

    let check = Arc::clone(&server);
    assert_eventually("every endMeeting reached the server", || {
        let server = Arc::clone(&check);
        async move { server.sent_event_names().len() == 20 }
    })
    .await;
    assert!(server
        .sent_event_names()
        .iter()
        .all(|name| *name == "endMeeting"));
}

#[tokio::test]
async fn test_disconnect_while_reconnecting_reports_undelivered_events() {
    let server = MockSignalingServer::new();
    let config = test_config_with(&[
        ("SOCKET_RECONNECTION_ATTEMPTS", "10"),
        ("SOCKET_RECONNECTION_DELAY_MS", "50"),
        ("SOCKET_RECONNECTION_DELAY_MAX_MS", "50"),
    ]);
    let client = client_with(&server, &config);

    let connection = client.connect().await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    server.refuse_opens();
    server.drop_links();
    let check = Arc::clone(&server);
    assert_eventually("client noticed the lost link", || {
        let server = Arc::clone(&check);
        async move { server.open_count() >= 2 }
    })
    .await;
    assert_eq!(connection.state(), LinkState::Reconnecting);

    connection.emit(new_user()).unwrap();
    connection.emit(end_meeting()).unwrap();

    let undelivered = client.disconnect().await;

    assert_eq!(undelivered, vec!["newUser", "endMeeting"]);
    assert!(server.sent_events().is_empty());
    assert_eq!(connection.state(), LinkState::Closed);
}

#[tokio::test]
async fn test_disconnect_before_connect_reports_queued_events() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connection().await;
    connection.emit(end_meeting()).unwrap();

    assert_eq!(client.disconnect().await, vec!["endMeeting"]);
    assert_eq!(server.open_count(), 0);
}

// ============================================================================
// Reset
// ============================================================================

#[tokio::test]
async fn test_reset_keeps_listeners_and_forgets_connection() {
    let server = MockSignalingServer::new();
    let client = client(&server);

    let connection = client.connect().await;
    let _users = connection.subscribe(EventKind::UsersOnline).await;
    connection.wait_connected(RECV_TIMEOUT).await.unwrap();

    client.reset().await;

    assert_eq!(connection.listener_count(EventKind::UsersOnline).await, 1);
    assert_eq!(connection.state(), LinkState::Closed);
    assert!(!client.has_connection().await);
    assert!(server.live_links().is_empty());

    let socket_id = client
        .connect()
        .await
        .wait_connected(RECV_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(socket_id, "socket-2");
}
