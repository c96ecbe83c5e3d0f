//! Test data and a harness that wires one participant's session to mocks.

use crate::mock_capture::MockCaptureDevice;
use crate::mock_membership::{MockChatStore, MockMembership};
use crate::mock_peer::MockPeerNetwork;
use crate::mock_signaling::MockSignalingServer;

use common::secret::SecretString;
use common::types::MediaKind;
use meet_client::config::Config;
use meet_client::media::{MediaChannelActor, MediaChannelHandle};
use meet_client::session::{
    LocalIdentity, MeetingSessionActor, MeetingSessionHandle, SessionDeps, SessionSettings,
};
use meet_client::signaling::{ConnectOptions, RosterEntry, SignalingClient, SignalingTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const TEST_BACKEND_URL: &str = "http://127.0.0.1:9";
pub const TEST_SOCKET_URL: &str = "http://127.0.0.1:9";

/// Default peer server authorities.
pub const AUDIO_AUTHORITY: &str = "localhost:3001";
pub const VIDEO_AUTHORITY: &str = "localhost:3002";

/// Configuration with short timeouts for tests.
pub fn test_config() -> Config {
    test_config_with(&[])
}

/// `test_config` with extra variables applied on top.
pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("BACKEND_URL", TEST_BACKEND_URL),
        ("SOCKET_URL", TEST_SOCKET_URL),
        ("SOCKET_RECONNECTION_ATTEMPTS", "3"),
        ("SOCKET_RECONNECTION_DELAY_MS", "10"),
        ("SOCKET_RECONNECTION_DELAY_MAX_MS", "40"),
        ("SOCKET_TIMEOUT_MS", "1000"),
        ("PEER_OPEN_TIMEOUT_MS", "300"),
        ("SESSION_CLEANUP_SETTLE_MS", "50"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }

    Config::from_vars(&vars).expect("test config must be valid")
}

pub fn roster_entry(user_id: &str) -> RosterEntry {
    RosterEntry {
        user_id: user_id.to_string(),
        socket_id: format!("socket-of-{user_id}"),
        name: Some(format!("User {user_id}")),
        email: None,
        photo_url: None,
    }
}

pub fn roster(user_ids: &[&str]) -> Vec<RosterEntry> {
    user_ids.iter().map(|id| roster_entry(id)).collect()
}

/// A complete identity for `user_id`.
pub fn identity(user_id: &str) -> LocalIdentity {
    LocalIdentity::new(user_id, SecretString::from(format!("token-{user_id}")))
        .with_display_name(format!("User {user_id}"))
}

/// Spawn a media channel of `kind` against `network`.
pub fn spawn_channel(
    kind: MediaKind,
    capture: Arc<MockCaptureDevice>,
    network: Arc<MockPeerNetwork>,
    config: &Config,
) -> MediaChannelHandle {
    let (handle, _task) = MediaChannelActor::spawn(
        kind,
        config.peer_server(kind).clone(),
        capture,
        network,
        config.peer_open_timeout,
        CancellationToken::new(),
    );
    handle
}

/// One participant's session wired to mocks.
pub struct SessionHarness {
    pub meeting_id: String,
    pub user_id: String,
    pub config: Config,
    pub signaling: Arc<MockSignalingServer>,
    pub signaling_client: Arc<SignalingClient>,
    pub membership: MockMembership,
    pub chat: MockChatStore,
    pub capture: Arc<MockCaptureDevice>,
    pub network: Arc<MockPeerNetwork>,
    pub audio: MediaChannelHandle,
    pub video: MediaChannelHandle,
    pub session: MeetingSessionHandle,
    pub cancel_token: CancellationToken,
}

/// Builder for [`SessionHarness`].
pub struct SessionHarnessBuilder {
    meeting_id: String,
    user_id: String,
    identity: Option<LocalIdentity>,
    config: Config,
    signaling: Option<Arc<MockSignalingServer>>,
    membership: Option<MockMembership>,
    capture: Option<Arc<MockCaptureDevice>>,
    network: Option<Arc<MockPeerNetwork>>,
}

impl SessionHarness {
    pub fn builder(meeting_id: &str, user_id: &str) -> SessionHarnessBuilder {
        SessionHarnessBuilder {
            meeting_id: meeting_id.to_string(),
            user_id: user_id.to_string(),
            identity: None,
            config: test_config(),
            signaling: None,
            membership: None,
            capture: None,
            network: None,
        }
    }

    pub fn audio_peer_id(&self) -> String {
        format!("{}-{}", self.meeting_id, self.user_id)
    }
}

impl SessionHarnessBuilder {
    pub fn identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Share a signaling server with other participants.
    pub fn signaling(mut self, server: Arc<MockSignalingServer>) -> Self {
        self.signaling = Some(server);
        self
    }

    /// Share a membership service with other participants.
    pub fn membership(mut self, membership: MockMembership) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn capture(mut self, capture: Arc<MockCaptureDevice>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Share a peer network with other participants.
    pub fn network(mut self, network: Arc<MockPeerNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build(self) -> SessionHarness {
        let signaling = self.signaling.unwrap_or_else(MockSignalingServer::new);
        let membership = self
            .membership
            .unwrap_or_else(|| MockMembership::new(&self.user_id));
        let capture = self.capture.unwrap_or_else(MockCaptureDevice::granting);
        let network = self.network.unwrap_or_else(MockPeerNetwork::new);
        let identity = self.identity.unwrap_or_else(|| identity(&self.user_id));
        let chat = MockChatStore::new();
        let cancel_token = CancellationToken::new();

        let mut options = ConnectOptions::from_config(&self.config);
        if let Some(token) = &identity.auth_token {
            options = options.with_token(token.clone());
        }
        let signaling_client = Arc::new(SignalingClient::new(
            self.config.socket_url.clone(),
            options,
            Arc::clone(&signaling) as Arc<dyn SignalingTransport>,
        ));

        let audio = spawn_channel(
            MediaKind::Audio,
            Arc::clone(&capture),
            Arc::clone(&network),
            &self.config,
        );
        let video = spawn_channel(
            MediaKind::Video,
            Arc::clone(&capture),
            Arc::clone(&network),
            &self.config,
        );

        let deps = SessionDeps {
            signaling: Arc::clone(&signaling_client),
            audio: audio.clone(),
            video: video.clone(),
            membership: Arc::new(membership.clone()),
            chat: Arc::new(chat.clone()),
        };

        let (session, _task) = MeetingSessionActor::spawn(
            self.meeting_id.clone(),
            identity,
            deps,
            SessionSettings::from_config(&self.config),
            cancel_token.clone(),
        );

        SessionHarness {
            meeting_id: self.meeting_id,
            user_id: self.user_id,
            config: self.config,
            signaling,
            signaling_client,
            membership,
            chat,
            capture,
            network,
            audio,
            video,
            session,
            cancel_token,
        }
    }
}
