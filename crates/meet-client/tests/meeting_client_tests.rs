//! `MeetingClient` assembly tests.
//!
//! A client built over the in-memory signaling server and peer network,
//! with the HTTP backend served by wiremock:
//! - Session opening rules
//! - Both media channels shared by every session of one client
//! - A session only releases channels it initialized

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use std::sync::Arc;

use common::types::MediaKind;
use meet_client::media::{CaptureDevice, ChannelPhase, MediaTrack, PeerTransport};
use meet_client::session::SessionPhase;
use meet_client::signaling::SignalingTransport;
use meet_client::{JoinOutcome, MeetingClient, Route, SessionError};
use meet_test_utils::{
    assert_eventually, identity, test_config_with, MockCaptureDevice, MockPeerNetwork,
    MockSignalingServer, AUDIO_AUTHORITY, VIDEO_AUTHORITY,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MEETING: &str = "m1";

struct Fixture {
    client: MeetingClient,
    backend: MockServer,
    network: Arc<MockPeerNetwork>,
    signaling: Arc<MockSignalingServer>,
    capture: Arc<MockCaptureDevice>,
}

/// Backend where `amy` created `m1` and every presence call succeeds.
async fn backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("/meetings/updateOrAddMeetingUser/{MEETING}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"userId": "amy", "socketId": "socket-1"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/meetings/{MEETING}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"_id": MEETING, "userId": "amy"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/meetings/removeUser/{MEETING}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "removed"})))
        .mount(&server)
        .await;
    server
}

async fn fixture() -> Fixture {
    let backend = backend().await;
    let uri = backend.uri();
    let config = test_config_with(&[("BACKEND_URL", uri.as_str())]);

    let network = MockPeerNetwork::new();
    let signaling = MockSignalingServer::new();
    let capture = MockCaptureDevice::granting();

    let client = MeetingClient::with_signaling_transport(
        config,
        Arc::clone(&capture) as Arc<dyn CaptureDevice>,
        Arc::clone(&network) as Arc<dyn PeerTransport>,
        Arc::clone(&signaling) as Arc<dyn SignalingTransport>,
    )
    .unwrap();

    Fixture {
        client,
        backend,
        network,
        signaling,
        capture,
    }
}

// ============================================================================
// Opening sessions
// ============================================================================

#[tokio::test]
async fn test_open_session_rejects_blank_meeting_id() {
    let f = fixture().await;

    let err = f.client.open_session("  ", identity("amy")).unwrap_err();

    assert!(matches!(err, SessionError::InvalidInput(_)));
}

#[tokio::test]
async fn test_open_session_after_shutdown_fails() {
    let f = fixture().await;

    f.client.shutdown();

    let err = f.client.open_session(MEETING, identity("amy")).unwrap_err();
    assert!(matches!(err, SessionError::Closed));
}

#[tokio::test]
async fn test_channels_use_configured_kinds() {
    let f = fixture().await;

    assert_eq!(f.client.audio().kind(), MediaKind::Audio);
    assert_eq!(f.client.video().kind(), MediaKind::Video);
    assert!(f.client.config().backend_url.starts_with("http://127.0.0.1"));
}

// ============================================================================
// Join and leave over HTTP
// ============================================================================

#[tokio::test]
async fn test_session_joins_and_leaves_through_shared_channels() {
    let f = fixture().await;
    let session = f.client.open_session(MEETING, identity("amy")).unwrap();

    let outcome = session.join().await.unwrap();
    assert_eq!(outcome, JoinOutcome::Joined { participants: 1 });

    let check = session.clone();
    assert_eventually("media ready", || {
        let session = check.clone();
        async move {
            let state = session.state().await.unwrap();
            state.mic_enabled && state.camera_enabled
        }
    })
    .await;

    let state = session.state().await.unwrap();
    assert_eq!(state.phase, SessionPhase::Joined);
    assert!(state.is_host);
    assert_eq!(
        f.client.audio().state().await.unwrap().phase,
        ChannelPhase::Ready
    );
    assert_eq!(f.network.registered(AUDIO_AUTHORITY), vec!["m1-amy"]);
    assert_eq!(f.network.registered(VIDEO_AUTHORITY), vec!["m1-amy"]);
    assert_eq!(f.signaling.credentials_seen(), vec![true]);

    assert_eq!(session.leave().await.unwrap(), Route::Dashboard);

    assert_eq!(
        f.client.audio().state().await.unwrap().phase,
        ChannelPhase::Uninitialized
    );
    assert!(f.network.registered(AUDIO_AUTHORITY).is_empty());
    let requests = f.backend.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .any(|r| r.url.path() == format!("/meetings/removeUser/{MEETING}")));
}

#[tokio::test]
async fn test_second_session_leaving_keeps_first_sessions_media() {
    let f = fixture().await;
    let first = f.client.open_session(MEETING, identity("amy")).unwrap();
    first.join().await.unwrap();

    let check = first.clone();
    assert_eventually("first session owns media", || {
        let session = check.clone();
        async move { session.state().await.unwrap().mic_enabled }
    })
    .await;

    // The channels are taken, so the second session joins without media
    let second = f.client.open_session(MEETING, identity("bob")).unwrap();
    second.join().await.unwrap();
    let check = second.clone();
    assert_eventually("second session reports busy media", || {
        let session = check.clone();
        async move { session.state().await.unwrap().error_message.is_some() }
    })
    .await;

    second.leave().await.unwrap();

    assert_eq!(
        f.client.audio().state().await.unwrap().phase,
        ChannelPhase::Ready
    );
    assert_eq!(
        f.client.video().state().await.unwrap().phase,
        ChannelPhase::Ready
    );
    assert_eq!(f.network.registered(AUDIO_AUTHORITY), vec!["m1-amy"]);
    assert!(f.capture.tracks().iter().all(|track| !track.is_stopped()));
    assert!(first.state().await.unwrap().mic_enabled);
}
