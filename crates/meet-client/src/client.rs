//! `MeetingClient` - wires configuration, transports and actors together.

use crate::api::{HttpChatStore, HttpMembershipClient, RestClient};
use crate::config::Config;
use crate::errors::SessionError;
use crate::media::{CaptureDevice, MediaChannelActor, MediaChannelHandle, PeerTransport};
use crate::session::{
    LocalIdentity, MeetingSessionActor, MeetingSessionHandle, SessionDeps, SessionSettings,
};
use crate::signaling::{ConnectOptions, SignalingClient, SignalingTransport, WebSocketTransport};

use common::types::MediaKind;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Entry point for embedding applications.
///
/// Owns one media channel per kind, shared by every session it opens. Each
/// session gets its own signaling client and HTTP collaborators bound to
/// the joining user's token.
pub struct MeetingClient {
    config: Config,
    rest: RestClient,
    signaling_transport: Arc<dyn SignalingTransport>,
    audio: MediaChannelHandle,
    video: MediaChannelHandle,
    cancel_token: CancellationToken,
}

impl MeetingClient {
    /// Build a client that signals over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Request` if the HTTP client cannot be built.
    pub fn new(
        config: Config,
        capture: Arc<dyn CaptureDevice>,
        peers: Arc<dyn PeerTransport>,
    ) -> Result<Self, SessionError> {
        Self::with_signaling_transport(config, capture, peers, Arc::new(WebSocketTransport::new()))
    }

    /// Build a client over an arbitrary signaling transport.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Request` if the HTTP client cannot be built.
    pub fn with_signaling_transport(
        config: Config,
        capture: Arc<dyn CaptureDevice>,
        peers: Arc<dyn PeerTransport>,
        signaling_transport: Arc<dyn SignalingTransport>,
    ) -> Result<Self, SessionError> {
        let rest = RestClient::new(config.backend_url.clone(), config.http_timeout)?;
        let cancel_token = CancellationToken::new();

        let (audio, _audio_task) = MediaChannelActor::spawn(
            MediaKind::Audio,
            config.peer_server(MediaKind::Audio).clone(),
            Arc::clone(&capture),
            Arc::clone(&peers),
            config.peer_open_timeout,
            cancel_token.child_token(),
        );
        let (video, _video_task) = MediaChannelActor::spawn(
            MediaKind::Video,
            config.peer_server(MediaKind::Video).clone(),
            capture,
            peers,
            config.peer_open_timeout,
            cancel_token.child_token(),
        );

        info!(
            target: "meet.client",
            backend = %config.backend_url,
            signaling = %config.socket_url,
            audio_server = %config.audio_server,
            video_server = %config.video_server,
            "Meeting client ready"
        );

        Ok(Self {
            config,
            rest,
            signaling_transport,
            audio,
            video,
            cancel_token,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn audio(&self) -> &MediaChannelHandle {
        &self.audio
    }

    #[must_use]
    pub fn video(&self) -> &MediaChannelHandle {
        &self.video
    }

    /// Spawn a session for `meeting_id`. The session is idle until joined.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidInput` for a blank meeting id
    /// - `SessionError::Closed` after `shutdown`
    pub fn open_session(
        &self,
        meeting_id: &str,
        identity: LocalIdentity,
    ) -> Result<MeetingSessionHandle, SessionError> {
        let meeting_id = meeting_id.trim();
        if meeting_id.is_empty() {
            return Err(SessionError::InvalidInput(
                "Meeting id is required".to_string(),
            ));
        }
        if self.cancel_token.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let mut options = ConnectOptions::from_config(&self.config);
        let mut membership = HttpMembershipClient::new(self.rest.clone());
        let mut chat = HttpChatStore::new(self.rest.clone());
        if let Some(token) = &identity.auth_token {
            options = options.with_token(token.clone());
            membership = membership.with_token(token.clone());
            chat = chat.with_token(token.clone());
        }

        let deps = SessionDeps {
            signaling: Arc::new(SignalingClient::new(
                self.config.socket_url.clone(),
                options,
                Arc::clone(&self.signaling_transport),
            )),
            audio: self.audio.clone(),
            video: self.video.clone(),
            membership: Arc::new(membership),
            chat: Arc::new(chat),
        };

        debug!(target: "meet.client", meeting_id = %meeting_id, "Opening meeting session");

        let (handle, _task) = MeetingSessionActor::spawn(
            meeting_id.to_string(),
            identity,
            deps,
            SessionSettings::from_config(&self.config),
            self.cancel_token.child_token(),
        );
        Ok(handle)
    }

    /// Cancel every session and both media channels.
    pub fn shutdown(&self) {
        info!(target: "meet.client", "Shutting down meeting client");
        self.cancel_token.cancel();
    }
}
