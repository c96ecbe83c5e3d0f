//! Media channel integration tests.
//!
//! Drives `MediaChannelActor` against the in-memory peer network:
//! - Initialization, capture failures and registration failures
//! - Call placement, answering and stream delivery between two channels
//! - Simultaneous calls resolved by user id order
//! - Teardown on leave and on endpoint loss
//! - Release restricted to the owning session

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use common::types::MediaKind;
use meet_client::errors::{CaptureDeviceError, MediaError, TransportError};
use meet_client::media::{
    CallDirection, CaptureConstraints, ChannelPhase, ConnectionEvent, EndpointEvent,
    MediaChannelHandle, MediaEvent, MediaTrack, PeerIdentity, PeerTransport,
};
use meet_test_utils::{
    assert_eventually, mock_stream, settle, spawn_channel, test_config, MockCaptureDevice,
    MockPeerNetwork, AUDIO_AUTHORITY, VIDEO_AUTHORITY,
};
use tokio::sync::mpsc;

const MEETING: &str = "m1";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Participant {
    channel: MediaChannelHandle,
    capture: Arc<MockCaptureDevice>,
    events: mpsc::UnboundedReceiver<MediaEvent>,
}

/// Spawn and initialize an audio channel for `user_id`.
async fn joined_audio(network: &Arc<MockPeerNetwork>, user_id: &str) -> Participant {
    let capture = MockCaptureDevice::granting();
    let channel = spawn_channel(
        MediaKind::Audio,
        Arc::clone(&capture),
        Arc::clone(network),
        &test_config(),
    );
    let (tx, events) = mpsc::unbounded_channel();
    channel
        .init(MEETING, user_id, tx)
        .await
        .expect("audio init should succeed");

    Participant {
        channel,
        capture,
        events,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<MediaEvent>) -> MediaEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for media event")
        .expect("media event channel closed")
}

async fn next_connection_event(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
) -> ConnectionEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("connection event channel closed")
}

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn test_init_registers_deterministic_identity() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;

    assert_eq!(network.registered(AUDIO_AUTHORITY), vec!["m1-amy"]);
    assert!(network.registered(VIDEO_AUTHORITY).is_empty());
    assert_eq!(amy.capture.requested(), vec![CaptureConstraints::Audio]);

    let state = amy.channel.state().await.unwrap();
    assert_eq!(state.phase, ChannelPhase::Ready);
    assert_eq!(state.peer_identity.unwrap().as_str(), "m1-amy");
    assert!(state.local_enabled);
    assert!(state.active_users.is_empty());

    let local = amy.channel.local_stream().await.unwrap();
    assert!(local.is_some(), "Local stream should be exposed after init");
}

#[tokio::test]
async fn test_double_init_rejected() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let result = amy.channel.init(MEETING, "amy", tx).await;

    assert!(matches!(
        result,
        Err(MediaError::AlreadyInitialized(MediaKind::Audio))
    ));
    assert_eq!(network.registration_count(AUDIO_AUTHORITY), 1);
    assert_eq!(
        amy.capture.tracks().len(),
        1,
        "Rejected init must not acquire another stream"
    );
}

#[tokio::test]
async fn test_capture_denied_does_not_register() {
    let network = MockPeerNetwork::new();
    let capture = MockCaptureDevice::denying();
    let channel = spawn_channel(
        MediaKind::Video,
        Arc::clone(&capture),
        Arc::clone(&network),
        &test_config(),
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = channel.init(MEETING, "amy", tx).await.unwrap_err();

    match &err {
        MediaError::CaptureDevice(CaptureDeviceError::PermissionDenied { kind, .. }) => {
            assert_eq!(*kind, MediaKind::Video);
        }
        other => panic!("expected permission error, got {other:?}"),
    }
    assert!(err.user_message().contains("camera"));
    assert!(err.user_message().contains("browser settings"));
    assert_eq!(network.registration_count(VIDEO_AUTHORITY), 0);

    let state = channel.state().await.unwrap();
    assert_eq!(state.phase, ChannelPhase::Uninitialized);
}

#[tokio::test]
async fn test_capture_unavailable_reports_generic_device_message() {
    let network = MockPeerNetwork::new();
    let channel = spawn_channel(
        MediaKind::Audio,
        MockCaptureDevice::unavailable(),
        Arc::clone(&network),
        &test_config(),
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = channel.init(MEETING, "amy", tx).await.unwrap_err();

    assert!(matches!(
        err,
        MediaError::CaptureDevice(CaptureDeviceError::Unavailable { .. })
    ));
    assert!(!err.user_message().contains("browser settings"));
}

#[tokio::test]
async fn test_init_after_denied_capture_can_retry() {
    let network = MockPeerNetwork::new();
    let capture = MockCaptureDevice::denying();
    let channel = spawn_channel(
        MediaKind::Audio,
        Arc::clone(&capture),
        Arc::clone(&network),
        &test_config(),
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(channel.init(MEETING, "amy", tx).await.is_err());

    capture.grant();
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(channel.init(MEETING, "amy", tx).await.is_ok());
    assert_eq!(network.registered(AUDIO_AUTHORITY), vec!["m1-amy"]);
}

#[tokio::test]
async fn test_registration_failure_stops_local_capture() {
    let network = MockPeerNetwork::new();
    network.fail_server(AUDIO_AUTHORITY);
    let capture = MockCaptureDevice::granting();
    let channel = spawn_channel(
        MediaKind::Audio,
        Arc::clone(&capture),
        Arc::clone(&network),
        &test_config(),
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = channel.init(MEETING, "amy", tx).await.unwrap_err();

    assert!(matches!(
        err,
        MediaError::Transport(TransportError::ServerUnavailable(_))
    ));
    let tracks = capture.tracks_of(MediaKind::Audio);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].stop_calls(), 1, "Acquired track must be released");
    assert_eq!(
        channel.state().await.unwrap().phase,
        ChannelPhase::Uninitialized
    );
}

#[tokio::test]
async fn test_registration_timeout() {
    let network = MockPeerNetwork::new();
    network.hang_server(AUDIO_AUTHORITY);
    let capture = MockCaptureDevice::granting();
    let channel = spawn_channel(
        MediaKind::Audio,
        Arc::clone(&capture),
        Arc::clone(&network),
        &test_config(),
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = channel.init(MEETING, "amy", tx).await.unwrap_err();

    assert!(matches!(
        err,
        MediaError::Transport(TransportError::Timeout(300))
    ));
    assert!(capture.tracks()[0].is_stopped());
}

#[tokio::test]
async fn test_audio_and_video_use_distinct_servers() {
    let network = MockPeerNetwork::new();
    let capture = MockCaptureDevice::granting();
    let config = test_config();
    let audio = spawn_channel(
        MediaKind::Audio,
        Arc::clone(&capture),
        Arc::clone(&network),
        &config,
    );
    let video = spawn_channel(
        MediaKind::Video,
        Arc::clone(&capture),
        Arc::clone(&network),
        &config,
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    audio.init(MEETING, "amy", tx.clone()).await.unwrap();
    video.init(MEETING, "amy", tx).await.unwrap();

    // Same identity on both servers without collision
    assert_eq!(network.registered(AUDIO_AUTHORITY), vec!["m1-amy"]);
    assert_eq!(network.registered(VIDEO_AUTHORITY), vec!["m1-amy"]);

    let requested = capture.requested();
    assert_eq!(requested.len(), 2);
    assert!(requested.contains(&CaptureConstraints::Audio));
    assert!(requested.contains(&CaptureConstraints::for_kind(MediaKind::Video)));
}

// ============================================================================
// Calls
// ============================================================================

#[tokio::test]
async fn test_two_channels_exchange_streams() {
    let network = MockPeerNetwork::new();
    let mut amy = joined_audio(&network, "amy").await;
    let mut bob = joined_audio(&network, "bob").await;

    let handle = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap()
        .expect("call should be placed");
    assert_eq!(handle.remote_user_id, "bob");
    assert_eq!(handle.direction, CallDirection::Outbound);
    assert_eq!(handle.peer.as_str(), "m1-bob");

    match next_event(&mut amy.events).await {
        MediaEvent::StreamAdded { kind, user_id, .. } => {
            assert_eq!(kind, MediaKind::Audio);
            assert_eq!(user_id, "bob");
        }
        other => panic!("expected StreamAdded, got {other:?}"),
    }
    match next_event(&mut bob.events).await {
        MediaEvent::StreamAdded { user_id, .. } => assert_eq!(user_id, "amy"),
        other => panic!("expected StreamAdded, got {other:?}"),
    }

    // Each side holds the other's local stream
    let bob_local = bob.channel.local_stream().await.unwrap().unwrap();
    let amy_remote = amy.channel.remote_streams().await.unwrap();
    assert_eq!(amy_remote.len(), 1);
    assert_eq!(amy_remote[0].0, "bob");
    assert_eq!(amy_remote[0].1.id(), bob_local.id());

    let bob_state = bob.channel.state().await.unwrap();
    assert_eq!(bob_state.active_users, vec!["amy"]);
    assert_eq!(bob_state.stream_users, vec!["amy"]);
}

#[tokio::test]
async fn test_connect_to_peer_is_idempotent() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;
    let _bob = joined_audio(&network, "bob").await;

    let first = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap()
        .unwrap();
    let second = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.connection_id, second.connection_id);
    assert_eq!(network.calls_from(AUDIO_AUTHORITY, "m1-amy"), 1);
}

#[tokio::test]
async fn test_connect_requires_initialized_channel() {
    let network = MockPeerNetwork::new();
    let channel = spawn_channel(
        MediaKind::Audio,
        MockCaptureDevice::granting(),
        Arc::clone(&network),
        &test_config(),
    );

    let result = channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(network.calls_placed(AUDIO_AUTHORITY), 0);
}

#[tokio::test]
async fn test_connect_refuses_self_call() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;

    let result = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "amy"), "amy")
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(network.calls_placed(AUDIO_AUTHORITY), 0);
}

#[tokio::test]
async fn test_connect_skipped_while_endpoint_disconnected() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;
    let _bob = joined_audio(&network, "bob").await;

    network.disconnect_endpoint(AUDIO_AUTHORITY, "m1-amy");

    let result = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(network.calls_placed(AUDIO_AUTHORITY), 0);

    // Disconnection alone does not tear the channel down
    assert_eq!(amy.channel.state().await.unwrap().phase, ChannelPhase::Ready);
}

#[tokio::test]
async fn test_unavailable_peer_is_pruned() {
    let network = MockPeerNetwork::new();
    let mut amy = joined_audio(&network, "amy").await;

    let placed = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "ghost"), "ghost")
        .await
        .unwrap();
    assert!(placed.is_some(), "Call placement succeeds; failure is async");

    match next_event(&mut amy.events).await {
        MediaEvent::StreamRemoved { user_id, .. } => assert_eq!(user_id, "ghost"),
        other => panic!("expected StreamRemoved, got {other:?}"),
    }

    let channel = amy.channel.clone();
    assert_eventually("ghost entry pruned", || {
        let channel = channel.clone();
        async move { channel.state().await.unwrap().active_users.is_empty() }
    })
    .await;

    // A later connect places a fresh call
    let _ghost_now_here = joined_audio(&network, "ghost").await;
    let retried = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "ghost"), "ghost")
        .await
        .unwrap();
    assert!(retried.is_some());
    assert_eq!(network.calls_from(AUDIO_AUTHORITY, "m1-amy"), 2);
}

#[tokio::test]
async fn test_remote_close_removes_stream() {
    let network = MockPeerNetwork::new();
    let mut amy = joined_audio(&network, "amy").await;
    let mut bob = joined_audio(&network, "bob").await;

    amy.channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap();
    next_event(&mut amy.events).await;
    next_event(&mut bob.events).await;

    amy.channel.leave().await.unwrap();

    match next_event(&mut bob.events).await {
        MediaEvent::StreamRemoved { kind, user_id } => {
            assert_eq!(kind, MediaKind::Audio);
            assert_eq!(user_id, "amy");
        }
        other => panic!("expected StreamRemoved, got {other:?}"),
    }
    let bob_state = bob.channel.state().await.unwrap();
    assert!(bob_state.active_users.is_empty());
    assert!(bob.channel.remote_streams().await.unwrap().is_empty());
}

// ============================================================================
// Simultaneous calls
// ============================================================================

#[tokio::test]
async fn test_simultaneous_call_keeps_outbound_when_local_id_smaller() {
    let network = MockPeerNetwork::new();
    let config = test_config();
    let amy = joined_audio(&network, "amy").await;

    // "zed" is driven by hand to control the timing
    let mut zed = network
        .register(
            PeerIdentity::new(MEETING, "zed"),
            config.peer_server(MediaKind::Audio),
        )
        .await
        .unwrap();

    let outbound = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "zed"), "zed")
        .await
        .unwrap()
        .unwrap();

    // zed sees amy's call but calls amy instead of answering
    let incoming = tokio::time::timeout(RECV_TIMEOUT, zed.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(incoming, EndpointEvent::IncomingCall(_)));

    let (zed_stream, _track) = mock_stream(MediaKind::Audio);
    let mut zed_call = zed
        .endpoint
        .call(&PeerIdentity::new(MEETING, "amy"), &zed_stream)
        .unwrap();

    assert!(matches!(
        next_connection_event(&mut zed_call.events).await,
        ConnectionEvent::Closed
    ));

    let tracked = amy
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "zed"), "zed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tracked.connection_id, outbound.connection_id);
    assert_eq!(tracked.direction, CallDirection::Outbound);
}

#[tokio::test]
async fn test_simultaneous_call_answers_inbound_when_local_id_larger() {
    let network = MockPeerNetwork::new();
    let config = test_config();
    let mut zed = joined_audio(&network, "zed").await;

    let mut amy = network
        .register(
            PeerIdentity::new(MEETING, "amy"),
            config.peer_server(MediaKind::Audio),
        )
        .await
        .unwrap();

    let outbound = zed
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "amy"), "amy")
        .await
        .unwrap()
        .unwrap();

    let Some(EndpointEvent::IncomingCall(mut zed_call)) =
        tokio::time::timeout(RECV_TIMEOUT, amy.events.recv())
            .await
            .unwrap()
    else {
        panic!("expected zed's incoming call");
    };

    let (amy_stream, _track) = mock_stream(MediaKind::Audio);
    let mut amy_call = amy
        .endpoint
        .call(&PeerIdentity::new(MEETING, "zed"), &amy_stream)
        .unwrap();

    // zed answers amy's call and drops its own
    assert!(matches!(
        next_connection_event(&mut amy_call.events).await,
        ConnectionEvent::Stream(_)
    ));
    assert!(matches!(
        next_connection_event(&mut zed_call.events).await,
        ConnectionEvent::Closed
    ));

    match next_event(&mut zed.events).await {
        MediaEvent::StreamAdded { user_id, stream, .. } => {
            assert_eq!(user_id, "amy");
            assert_eq!(stream.id(), amy_stream.id());
        }
        other => panic!("expected StreamAdded, got {other:?}"),
    }

    let tracked = zed
        .channel
        .connect_to_peer(PeerIdentity::new(MEETING, "amy"), "amy")
        .await
        .unwrap()
        .unwrap();
    assert_ne!(tracked.connection_id, outbound.connection_id);
    assert_eq!(tracked.direction, CallDirection::Inbound);
    assert_eq!(network.open_calls(AUDIO_AUTHORITY), 1);
}

// ============================================================================
// Local controls
// ============================================================================

#[tokio::test]
async fn test_toggle_mic_flips_local_tracks() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;
    let track = amy.capture.tracks_of(MediaKind::Audio)[0].clone();

    assert!(!amy.channel.toggle_mic(true).await, "Muted means disabled");
    assert!(!track.is_enabled());
    assert!(!amy.channel.is_enabled().await);

    assert!(amy.channel.toggle_mic(false).await);
    assert!(track.is_enabled());
    assert!(amy.channel.is_enabled().await);
}

#[tokio::test]
async fn test_toggle_without_stream_returns_false() {
    let network = MockPeerNetwork::new();
    let channel = spawn_channel(
        MediaKind::Video,
        MockCaptureDevice::granting(),
        network,
        &test_config(),
    );

    assert!(!channel.toggle_camera(false).await);
}

#[tokio::test]
async fn test_toggle_on_wrong_kind_returns_false() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;

    assert!(!amy.channel.toggle_camera(false).await);
    // The audio track was not touched
    assert!(amy.capture.tracks_of(MediaKind::Audio)[0].is_enabled());
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_leave_is_idempotent() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;
    let _bob = joined_audio(&network, "bob").await;

    amy.channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap();

    amy.channel.leave().await.unwrap();
    amy.channel.leave().await.unwrap();

    let track = amy.capture.tracks_of(MediaKind::Audio)[0].clone();
    assert_eq!(track.stop_calls(), 1, "Tracks are stopped exactly once");
    assert_eq!(network.registered(AUDIO_AUTHORITY), vec!["m1-bob"]);
    assert_eq!(network.open_calls(AUDIO_AUTHORITY), 0);

    let state = amy.channel.state().await.unwrap();
    assert_eq!(state.phase, ChannelPhase::Uninitialized);
    assert!(state.peer_identity.is_none());
    assert!(state.active_users.is_empty());
    assert!(amy.channel.local_stream().await.unwrap().is_none());
}

#[tokio::test]
async fn test_leave_then_rejoin() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;

    amy.channel.leave().await.unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    amy.channel.init(MEETING, "amy", tx).await.unwrap();

    assert_eq!(network.registration_count(AUDIO_AUTHORITY), 2);
    assert_eq!(network.registered(AUDIO_AUTHORITY), vec!["m1-amy"]);
    assert_eq!(amy.capture.tracks().len(), 2);
}

#[tokio::test]
async fn test_endpoint_closed_tears_channel_down() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;

    network.drop_endpoint(AUDIO_AUTHORITY, "m1-amy");

    let channel = amy.channel.clone();
    assert_eventually("channel returns to uninitialized", || {
        let channel = channel.clone();
        async move { channel.state().await.unwrap().phase == ChannelPhase::Uninitialized }
    })
    .await;
    assert!(amy.capture.tracks()[0].is_stopped());
}

#[tokio::test]
async fn test_endpoint_closed_notifies_owner() {
    let network = MockPeerNetwork::new();
    let mut amy = joined_audio(&network, "amy").await;
    let _bob = joined_audio(&network, "bob").await;

    amy.channel
        .connect_to_peer(PeerIdentity::new(MEETING, "bob"), "bob")
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut amy.events).await,
        MediaEvent::StreamAdded { .. }
    ));

    network.drop_endpoint(AUDIO_AUTHORITY, "m1-amy");

    match next_event(&mut amy.events).await {
        MediaEvent::StreamRemoved { kind, user_id } => {
            assert_eq!(kind, MediaKind::Audio);
            assert_eq!(user_id, "bob");
        }
        other => panic!("expected StreamRemoved, got {other:?}"),
    }
    match next_event(&mut amy.events).await {
        MediaEvent::ChannelClosed { kind, reason } => {
            assert_eq!(kind, MediaKind::Audio);
            assert_eq!(reason, "endpoint closed");
        }
        other => panic!("expected ChannelClosed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_requested_leave_does_not_report_channel_closed() {
    let network = MockPeerNetwork::new();
    let mut amy = joined_audio(&network, "amy").await;

    amy.channel.leave().await.unwrap();
    settle().await;

    while let Ok(event) = amy.events.try_recv() {
        assert!(
            !matches!(event, MediaEvent::ChannelClosed { .. }),
            "unexpected {event:?}"
        );
    }
}

#[tokio::test]
async fn test_release_only_by_owner() {
    let network = MockPeerNetwork::new();
    let capture = MockCaptureDevice::granting();
    let channel = spawn_channel(
        MediaKind::Audio,
        Arc::clone(&capture),
        Arc::clone(&network),
        &test_config(),
    );
    let (owner, _owner_rx) = mpsc::unbounded_channel();
    let (stranger, _stranger_rx) = mpsc::unbounded_channel();

    assert!(!channel.release(&owner).await.unwrap(), "Nothing to release yet");

    channel.init(MEETING, "amy", owner.clone()).await.unwrap();

    assert!(!channel.release(&stranger).await.unwrap());
    assert_eq!(channel.state().await.unwrap().phase, ChannelPhase::Ready);
    assert_eq!(network.registered(AUDIO_AUTHORITY), vec!["m1-amy"]);
    assert!(!capture.tracks()[0].is_stopped());

    assert!(channel.release(&owner).await.unwrap());
    assert_eq!(
        channel.state().await.unwrap().phase,
        ChannelPhase::Uninitialized
    );
    assert!(network.registered(AUDIO_AUTHORITY).is_empty());
    assert_eq!(capture.tracks()[0].stop_calls(), 1);
}

#[tokio::test]
async fn test_cancel_performs_final_leave() {
    let network = MockPeerNetwork::new();
    let amy = joined_audio(&network, "amy").await;

    amy.channel.cancel();
    assert!(amy.channel.is_cancelled());

    let network_check = Arc::clone(&network);
    assert_eventually("registration released on cancel", || {
        let network = Arc::clone(&network_check);
        async move { network.registered(AUDIO_AUTHORITY).is_empty() }
    })
    .await;
    assert_eq!(amy.capture.tracks()[0].stop_calls(), 1);

    settle().await;
    assert!(amy.channel.state().await.is_err(), "Actor has exited");
}
