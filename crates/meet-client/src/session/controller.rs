//! `MeetingSessionActor` - one attendance of one meeting.
//!
//! The session drives the signaling client and both media channels:
//!
//! - `join` connects signaling, registers presence, announces the user,
//!   decides host status and starts both media channels in the background
//! - every roster snapshot (and every channel becoming ready) is reconciled
//!   into peer calls, one per remote user and kind
//! - `leave`, `end_meeting` and the host's termination broadcast tear the
//!   attendance down in a fixed order: media, presence, signaling
//!
//! Signaling events reach the actor through per-kind forwarder tasks, so
//! ordering is only guaranteed within one event kind.

use super::identity::{LocalIdentity, VerifiedIdentity};
use super::messages::{
    JoinOutcome, PeerLinks, Route, SessionEvent, SessionMessage, SessionPhase, SessionSnapshot,
};
use crate::api::{ChatStore, MeetingSummary, MembershipService};
use crate::config::Config;
use crate::errors::{MediaError, SessionError};
use crate::media::{LinkStatus, MediaChannelHandle, MediaEvent, MediaStream, PeerIdentity};
use crate::observability::metrics;
use crate::signaling::{
    ChatMessage, ClientEvent, EventKind, RosterEntry, ServerEvent, SignalingClient,
    SignalingConnection, SignalingEvent, CLIENT_DISCONNECT_REASON,
};

use common::types::MediaKind;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the session mailbox.
const SESSION_MAILBOX_BUFFER: usize = 64;

/// Signaling events the session listens to.
pub const SESSION_EVENT_KINDS: [EventKind; 7] = [
    EventKind::UsersOnline,
    EventKind::NewMessage,
    EventKind::ServerError,
    EventKind::MeetingEnded,
    EventKind::Disconnect,
    EventKind::Reconnect,
    EventKind::ReconnectFailed,
];

pub const ENDED_BY_HOST_NOTICE: &str = "The meeting has been ended by the host";
pub const RECONNECTING_NOTICE: &str = "Connection lost. Reconnecting...";
pub const CONNECTION_LOST_NOTICE: &str = "Connection to the meeting was lost. Please rejoin";
pub const END_NOT_BROADCAST_NOTICE: &str =
    "The meeting was ended, but other participants could not be notified";

/// Collaborators of a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub signaling: Arc<SignalingClient>,
    pub audio: MediaChannelHandle,
    pub video: MediaChannelHandle,
    pub membership: Arc<dyn MembershipService>,
    pub chat: Arc<dyn ChatStore>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Bound on waiting for the signaling socket id during join.
    pub connect_timeout: Duration,
    /// How long the teardown guard stays set after a teardown.
    pub cleanup_settle: Duration,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.socket_timeout,
            cleanup_settle: config.cleanup_settle,
        }
    }
}

/// Handle to a `MeetingSessionActor`.
#[derive(Clone, Debug)]
pub struct MeetingSessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    meeting_id: String,
}

impl MeetingSessionHandle {
    #[must_use]
    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Join the meeting.
    ///
    /// Connection and registration failures do not return `Err`; they
    /// yield `JoinOutcome::Degraded` and leave an error banner in the
    /// snapshot.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` if the session was left
    /// - `SessionError::Internal` if the actor is gone
    pub async fn join(&self) -> Result<JoinOutcome, SessionError> {
        self.request(|respond_to| SessionMessage::Join { respond_to })
            .await?
    }

    /// Tear down and return the route to navigate to. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the actor is gone.
    pub async fn leave(&self) -> Result<Route, SessionError> {
        self.request(|respond_to| SessionMessage::Leave { respond_to })
            .await?
    }

    /// End the meeting for everyone (host only).
    ///
    /// # Errors
    ///
    /// - `SessionError::NotJoined` if not joined
    /// - `SessionError::PermissionDenied` if not the host
    /// - `SessionError::Request` if finishing the meeting failed
    pub async fn end_meeting(&self) -> Result<MeetingSummary, SessionError> {
        self.request(|respond_to| SessionMessage::EndMeeting { respond_to })
            .await?
    }

    /// Returns the new microphone state; `false` if nothing was toggled.
    pub async fn toggle_mic(&self, mute: bool) -> bool {
        self.set_muted(MediaKind::Audio, mute).await
    }

    /// Returns the new camera state; `false` if nothing was toggled.
    pub async fn toggle_camera(&self, off: bool) -> bool {
        self.set_muted(MediaKind::Video, off).await
    }

    async fn set_muted(&self, kind: MediaKind, muted: bool) -> bool {
        match self
            .request(|respond_to| SessionMessage::SetMuted {
                kind,
                muted,
                respond_to,
            })
            .await
        {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(target: "meet.session", kind = %kind, error = %e, "Toggle failed");
                false
            }
        }
    }

    /// Send a chat message.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotJoined` if not joined
    /// - `SessionError::InvalidInput` for blank text
    /// - `SessionError::Signaling` if the event could not be queued
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, SessionError> {
        self.request(|respond_to| SessionMessage::SendMessage {
            text: text.to_string(),
            respond_to,
        })
        .await?
    }

    /// Clear the error banner.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the actor is gone.
    pub async fn dismiss_error(&self) -> Result<(), SessionError> {
        self.sender
            .send(SessionMessage::DismissError)
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Acknowledge the "ended by host" notice. Only the first call returns
    /// a route.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the actor is gone.
    pub async fn acknowledge_ended(&self) -> Result<Option<Route>, SessionError> {
        self.request(|respond_to| SessionMessage::AcknowledgeEnded { respond_to })
            .await
    }

    /// Close the summary panel.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the actor is gone.
    pub async fn acknowledge_summary(&self) -> Result<Option<Route>, SessionError> {
        self.request(|respond_to| SessionMessage::AcknowledgeSummary { respond_to })
            .await
    }

    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the actor is gone.
    pub async fn state(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    /// Remote streams of `kind`, sorted by user id.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the actor is gone.
    pub async fn remote_streams(
        &self,
        kind: MediaKind,
    ) -> Result<Vec<(String, MediaStream)>, SessionError> {
        self.request(|respond_to| SessionMessage::RemoteStreams { kind, respond_to })
            .await
    }

    /// Cancel the actor. An active attendance is torn down first.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The meeting session actor.
pub struct MeetingSessionActor {
    meeting_id: String,
    identity: LocalIdentity,
    verified: Option<VerifiedIdentity>,
    deps: SessionDeps,
    settings: SessionSettings,
    receiver: mpsc::Receiver<SessionMessage>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    /// Handed to both media channels on init.
    media_tx: mpsc::UnboundedSender<MediaEvent>,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    cancel_token: CancellationToken,
    /// Parent of the signaling forwarders of the current attendance.
    forwarders: CancellationToken,
    phase: SessionPhase,
    has_joined: bool,
    is_cleaning_up: bool,
    /// Bumped on every teardown; late media inits compare against it.
    attendance: u64,
    connection: Option<SignalingConnection>,
    socket_id: Option<String>,
    is_host: bool,
    roster: Vec<RosterEntry>,
    /// Remote users of the last roster.
    known_peers: BTreeSet<String>,
    media_ready: BTreeSet<MediaKind>,
    remote_streams: BTreeMap<MediaKind, BTreeMap<String, MediaStream>>,
    chat: Vec<ChatMessage>,
    sent_ids: HashSet<String>,
    error_message: Option<String>,
    connection_notice: Option<String>,
    connection_lost: bool,
    ended_notice: Option<String>,
    ended_acknowledged: bool,
    summary: Option<MeetingSummary>,
    showing_summary: bool,
    redirect: Option<Route>,
}

impl MeetingSessionActor {
    /// Spawn a session actor for `meeting_id`.
    pub fn spawn(
        meeting_id: String,
        identity: LocalIdentity,
        deps: SessionDeps,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> (MeetingSessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_MAILBOX_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();

        let actor = Self {
            meeting_id: meeting_id.clone(),
            identity,
            verified: None,
            deps,
            settings,
            receiver,
            events_tx,
            events_rx,
            media_tx,
            media_rx,
            forwarders: cancel_token.child_token(),
            cancel_token: cancel_token.clone(),
            phase: SessionPhase::Idle,
            has_joined: false,
            is_cleaning_up: false,
            attendance: 0,
            connection: None,
            socket_id: None,
            is_host: false,
            roster: Vec::new(),
            known_peers: BTreeSet::new(),
            media_ready: BTreeSet::new(),
            remote_streams: BTreeMap::new(),
            chat: Vec::new(),
            sent_ids: HashSet::new(),
            error_message: None,
            connection_notice: None,
            connection_lost: false,
            ended_notice: None,
            ended_acknowledged: false,
            summary: None,
            showing_summary: false,
            redirect: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MeetingSessionHandle {
            sender,
            cancel_token,
            meeting_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "meet.session", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        debug!(target: "meet.session", meeting_id = %self.meeting_id, "MeetingSessionActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "meet.session",
                        meeting_id = %self.meeting_id,
                        "MeetingSessionActor received cancellation signal"
                    );
                    self.shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "meet.session",
                                meeting_id = %self.meeting_id,
                                "MeetingSessionActor channel closed, exiting"
                            );
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }

                Some(event) = self.media_rx.recv() => {
                    self.handle_media_event(event);
                }
            }
        }

        debug!(
            target: "meet.session",
            meeting_id = %self.meeting_id,
            phase = ?self.phase,
            "MeetingSessionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join { respond_to } => {
                let result = self.handle_join().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave { respond_to } => {
                let result = self.handle_leave().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::EndMeeting { respond_to } => {
                let result = self.handle_end_meeting().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SetMuted {
                kind,
                muted,
                respond_to,
            } => {
                let enabled = self.handle_set_muted(kind, muted).await;
                let _ = respond_to.send(enabled);
            }

            SessionMessage::SendMessage { text, respond_to } => {
                let result = self.handle_send_message(&text);
                let _ = respond_to.send(result);
            }

            SessionMessage::DismissError => {
                self.error_message = None;
            }

            SessionMessage::AcknowledgeEnded { respond_to } => {
                let route = if self.ended_notice.is_some() && !self.ended_acknowledged {
                    self.ended_acknowledged = true;
                    self.redirect = Some(Route::Dashboard);
                    Some(Route::Dashboard)
                } else {
                    None
                };
                let _ = respond_to.send(route);
            }

            SessionMessage::AcknowledgeSummary { respond_to } => {
                let route = if self.showing_summary {
                    self.showing_summary = false;
                    self.redirect = Some(Route::Dashboard);
                    Some(Route::Dashboard)
                } else {
                    None
                };
                let _ = respond_to.send(route);
            }

            SessionMessage::GetState { respond_to } => {
                let snapshot = self.snapshot().await;
                let _ = respond_to.send(snapshot);
            }

            SessionMessage::RemoteStreams { kind, respond_to } => {
                let streams = self
                    .visible_streams(kind)
                    .map(|(user, stream)| (user.clone(), stream.clone()))
                    .collect();
                let _ = respond_to.send(streams);
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Signaling(event) => self.handle_signaling(event).await,

            SessionEvent::MediaInitialized {
                kind,
                attendance,
                result,
            } => self.handle_media_initialized(kind, attendance, result).await,

            SessionEvent::CleanupSettled => {
                debug!(target: "meet.session", meeting_id = %self.meeting_id, "Cleanup settled");
                self.is_cleaning_up = false;
            }
        }
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id))]
    async fn handle_join(&mut self) -> Result<JoinOutcome, SessionError> {
        if self.phase == SessionPhase::Closed {
            return Err(SessionError::Closed);
        }
        if self.has_joined {
            debug!(target: "meet.session", meeting_id = %self.meeting_id, "Join ignored: already joined");
            return Ok(JoinOutcome::AlreadyJoined);
        }

        let verified = match self.identity.verify() {
            Ok(verified) => verified,
            Err(route) => {
                warn!(
                    target: "meet.session",
                    meeting_id = %self.meeting_id,
                    route = ?route,
                    "Join requires a complete identity"
                );
                self.redirect = Some(route);
                return Ok(JoinOutcome::Redirected(route));
            }
        };

        self.has_joined = true;
        self.phase = SessionPhase::Joining;
        let started = Instant::now();
        let user_id = verified.user_id.clone();
        self.verified = Some(verified);

        let connection = self.deps.signaling.connect().await;
        self.subscribe_all(&connection).await;
        self.connection = Some(connection.clone());

        let socket_id = match connection.wait_connected(self.settings.connect_timeout).await {
            Ok(socket_id) => socket_id,
            Err(e) => return Ok(self.degrade(&SessionError::from(e), started)),
        };
        self.socket_id = Some(socket_id.clone());

        let roster = match self
            .deps
            .membership
            .register_presence(&self.meeting_id, &user_id, &socket_id)
            .await
        {
            Ok(roster) => roster,
            Err(e) => return Ok(self.degrade(&SessionError::from(e), started)),
        };
        self.apply_roster(roster);
        self.announce(&connection);

        self.is_host = match self.deps.membership.meeting(&self.meeting_id).await {
            Ok(record) => record.creator_id == user_id,
            Err(e) => {
                warn!(
                    target: "meet.session",
                    meeting_id = %self.meeting_id,
                    error = %e,
                    "Meeting lookup failed, continuing as participant"
                );
                false
            }
        };

        self.phase = SessionPhase::Joined;
        self.start_media(&user_id);
        metrics::record_join_duration("joined", started.elapsed());

        info!(
            target: "meet.session",
            meeting_id = %self.meeting_id,
            user_id = %user_id,
            is_host = self.is_host,
            participants = self.roster.len(),
            "Joined meeting"
        );

        Ok(JoinOutcome::Joined {
            participants: self.roster.len(),
        })
    }

    fn degrade(&mut self, e: &SessionError, started: Instant) -> JoinOutcome {
        error!(
            target: "meet.session",
            meeting_id = %self.meeting_id,
            error = %e,
            "Join failed"
        );

        let message = e.user_message();
        self.phase = SessionPhase::Degraded;
        self.error_message = Some(message.clone());
        self.roster.clear();
        self.known_peers.clear();
        metrics::record_join_duration("degraded", started.elapsed());

        JoinOutcome::Degraded { message }
    }

    async fn subscribe_all(&self, connection: &SignalingConnection) {
        for kind in SESSION_EVENT_KINDS {
            let receiver = connection.subscribe(kind).await;
            spawn_signaling_forwarder(receiver, self.events_tx.clone(), self.forwarders.clone());
        }
    }

    /// Emit the `newUser` presence announcement.
    fn announce(&self, connection: &SignalingConnection) {
        let Some(verified) = &self.verified else {
            return;
        };

        let event = ClientEvent::NewUser {
            token: verified.auth_token.clone(),
            user_id: verified.user_id.clone(),
            meeting_id: self.meeting_id.clone(),
        };
        if let Err(e) = connection.emit(event) {
            warn!(target: "meet.session", meeting_id = %self.meeting_id, error = %e, "Failed to announce user");
        }
    }

    fn start_media(&self, user_id: &str) {
        let attendance = self.attendance;

        for handle in [self.deps.audio.clone(), self.deps.video.clone()] {
            let events = self.events_tx.clone();
            let media_events = self.media_tx.clone();
            let meeting_id = self.meeting_id.clone();
            let user_id = user_id.to_string();

            tokio::spawn(async move {
                let kind = handle.kind();
                let result = handle.init(&meeting_id, &user_id, media_events).await;
                let _ = events.send(SessionEvent::MediaInitialized {
                    kind,
                    attendance,
                    result,
                });
            });
        }
    }

    async fn handle_media_initialized(
        &mut self,
        kind: MediaKind,
        attendance: u64,
        result: Result<MediaStream, MediaError>,
    ) {
        let current = attendance == self.attendance
            && self.phase == SessionPhase::Joined
            && !self.is_cleaning_up;

        match result {
            Ok(_) if !current => {
                debug!(
                    target: "meet.session",
                    meeting_id = %self.meeting_id,
                    kind = %kind,
                    "Media initialized after teardown, releasing"
                );
                if let Err(e) = self.media(kind).release(&self.media_tx).await {
                    warn!(target: "meet.session", kind = %kind, error = %e, "Late media release failed");
                }
            }
            Ok(_) => {
                info!(target: "meet.session", meeting_id = %self.meeting_id, kind = %kind, "Media channel ready");
                self.media_ready.insert(kind);
                self.reconcile(kind).await;
            }
            Err(e) if !current => {
                debug!(target: "meet.session", kind = %kind, error = %e, "Stale media init failure ignored");
            }
            Err(e) => {
                error!(
                    target: "meet.session",
                    meeting_id = %self.meeting_id,
                    kind = %kind,
                    error = %e,
                    "Media channel failed to start"
                );
                self.error_message = Some(e.user_message());
            }
        }
    }

    fn media(&self, kind: MediaKind) -> &MediaChannelHandle {
        match kind {
            MediaKind::Audio => &self.deps.audio,
            MediaKind::Video => &self.deps.video,
        }
    }

    /// Remote streams of `kind` whose user is still on the roster. A
    /// departed user's call lingers until its transport closes it.
    fn visible_streams(
        &self,
        kind: MediaKind,
    ) -> impl Iterator<Item = (&String, &MediaStream)> + '_ {
        self.remote_streams
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|(user, _)| self.known_peers.contains(*user))
    }

    fn local_user_id(&self) -> Option<&str> {
        self.verified.as_ref().map(|v| v.user_id.as_str())
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    fn apply_roster(&mut self, roster: Vec<RosterEntry>) {
        let local = self.local_user_id().unwrap_or_default().to_string();
        let present: BTreeSet<String> = roster
            .iter()
            .map(|entry| entry.user_id.clone())
            .filter(|id| !id.is_empty() && *id != local)
            .collect();

        for departed in self.known_peers.difference(&present) {
            debug!(
                target: "meet.session",
                meeting_id = %self.meeting_id,
                user_id = %departed,
                "Participant left the roster"
            );
        }

        self.known_peers = present;
        self.roster = roster;
    }

    /// Call every roster user that has no connection of `kind` yet.
    async fn reconcile(&self, kind: MediaKind) {
        if self.phase != SessionPhase::Joined || !self.media_ready.contains(&kind) {
            return;
        }

        let handle = self.media(kind);
        let active: HashSet<String> = match handle.state().await {
            Ok(state) => state.active_users.into_iter().collect(),
            Err(e) => {
                warn!(target: "meet.session", kind = %kind, error = %e, "Cannot read media channel state");
                return;
            }
        };

        for remote in self.known_peers.iter().filter(|user| !active.contains(*user)) {
            let peer = PeerIdentity::new(&self.meeting_id, remote);
            match handle.connect_to_peer(peer, remote).await {
                Ok(Some(connection)) => debug!(
                    target: "meet.session",
                    kind = %kind,
                    user_id = %remote,
                    connection_id = %connection.connection_id,
                    "Peer connection requested"
                ),
                Ok(None) => debug!(
                    target: "meet.session",
                    kind = %kind,
                    user_id = %remote,
                    "Peer connection not opened"
                ),
                Err(e) => {
                    warn!(target: "meet.session", kind = %kind, error = %e, "Media channel unavailable");
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Signaling and media events
    // ------------------------------------------------------------------

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Server(ServerEvent::UsersOnline {
                users,
                joining_user,
                leaving_user,
            }) => {
                if self.phase != SessionPhase::Joined {
                    debug!(target: "meet.session", phase = ?self.phase, "Roster update ignored");
                    return;
                }
                debug!(
                    target: "meet.session",
                    meeting_id = %self.meeting_id,
                    users = users.len(),
                    joining = ?joining_user.map(|u| u.user_id),
                    leaving = ?leaving_user.map(|u| u.user_id),
                    "Roster update"
                );
                self.apply_roster(users);
                for kind in MediaKind::ALL {
                    self.reconcile(kind).await;
                }
            }

            SignalingEvent::Server(ServerEvent::NewMessage(message)) => {
                self.handle_incoming_message(message);
            }

            SignalingEvent::Server(ServerEvent::ServerError { message }) => {
                warn!(target: "meet.session", meeting_id = %self.meeting_id, message = %message, "Server error");
                self.error_message = Some(message);
            }

            SignalingEvent::Server(ServerEvent::MeetingEnded) => {
                self.handle_meeting_ended().await;
            }

            SignalingEvent::Disconnected { reason } => {
                if reason == CLIENT_DISCONNECT_REASON || self.phase != SessionPhase::Joined {
                    return;
                }
                warn!(target: "meet.session", meeting_id = %self.meeting_id, reason = %reason, "Signaling connection lost");
                self.connection_notice = Some(RECONNECTING_NOTICE.to_string());
            }

            SignalingEvent::Reconnected { attempt } => {
                self.handle_reconnected(attempt).await;
            }

            SignalingEvent::ReconnectFailed { attempts } => {
                if self.phase != SessionPhase::Joined {
                    return;
                }
                error!(
                    target: "meet.session",
                    meeting_id = %self.meeting_id,
                    attempts,
                    "Signaling reconnection failed"
                );
                self.connection_lost = true;
                self.connection_notice = Some(CONNECTION_LOST_NOTICE.to_string());
            }

            other => {
                debug!(target: "meet.session", event = ?other.kind(), "Signaling lifecycle event");
            }
        }
    }

    async fn handle_reconnected(&mut self, attempt: u32) {
        if self.phase != SessionPhase::Joined {
            return;
        }
        let Some(connection) = self.connection.clone() else {
            return;
        };
        let Some(socket_id) = connection.socket_id() else {
            warn!(target: "meet.session", "Reconnected without a socket id");
            return;
        };
        let Some(user_id) = self.local_user_id().map(str::to_string) else {
            return;
        };

        info!(
            target: "meet.session",
            meeting_id = %self.meeting_id,
            attempt,
            socket_id = %socket_id,
            "Signaling reconnected, refreshing presence"
        );
        self.socket_id = Some(socket_id.clone());

        match self
            .deps
            .membership
            .register_presence(&self.meeting_id, &user_id, &socket_id)
            .await
        {
            Ok(roster) => {
                self.apply_roster(roster);
                for kind in MediaKind::ALL {
                    self.reconcile(kind).await;
                }
            }
            Err(e) => {
                warn!(target: "meet.session", error = %e, "Presence refresh failed");
                self.error_message = Some(SessionError::from(e).user_message());
            }
        }

        self.announce(&connection);
        self.connection_notice = None;
        self.connection_lost = false;
    }

    fn handle_media_event(&mut self, event: MediaEvent) {
        if self.phase != SessionPhase::Joined {
            debug!(
                target: "meet.session",
                kind = %event.kind(),
                user_id = ?event.user_id(),
                "Media event ignored"
            );
            return;
        }

        match event {
            MediaEvent::StreamAdded {
                kind,
                user_id,
                stream,
            } => {
                debug!(target: "meet.session", kind = %kind, user_id = %user_id, "Remote stream added");
                self.remote_streams
                    .entry(kind)
                    .or_default()
                    .insert(user_id, stream);
            }
            MediaEvent::StreamRemoved { kind, user_id } => {
                debug!(target: "meet.session", kind = %kind, user_id = %user_id, "Remote stream removed");
                if let Some(streams) = self.remote_streams.get_mut(&kind) {
                    streams.remove(&user_id);
                }
            }
            MediaEvent::ChannelClosed { kind, reason } => {
                error!(
                    target: "meet.session",
                    meeting_id = %self.meeting_id,
                    kind = %kind,
                    reason = %reason,
                    "Media channel closed unexpectedly"
                );
                self.media_ready.remove(&kind);
                self.remote_streams.remove(&kind);
                self.error_message = Some(media_lost_notice(kind));
            }
        }
    }

    // ------------------------------------------------------------------
    // Media controls and chat
    // ------------------------------------------------------------------

    async fn handle_set_muted(&self, kind: MediaKind, muted: bool) -> bool {
        if !self.media_ready.contains(&kind) {
            warn!(target: "meet.session", kind = %kind, "No local {} to toggle", kind.device_name());
            return false;
        }

        let handle = self.media(kind);
        match kind {
            MediaKind::Audio => handle.toggle_mic(muted).await,
            MediaKind::Video => handle.toggle_camera(muted).await,
        }
    }

    fn handle_send_message(&mut self, text: &str) -> Result<ChatMessage, SessionError> {
        if self.phase != SessionPhase::Joined {
            return Err(SessionError::NotJoined);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::InvalidInput(
                "Message cannot be empty".to_string(),
            ));
        }
        let (Some(verified), Some(connection)) = (&self.verified, &self.connection) else {
            return Err(SessionError::NotJoined);
        };

        let message = ChatMessage::new(
            &self.meeting_id,
            &verified.user_id,
            verified.display_name.clone(),
            text,
        );
        connection.emit(ClientEvent::SendMessage(message.clone()))?;

        self.sent_ids.insert(message.id.clone());
        self.chat.push(message.clone());

        let store = Arc::clone(&self.deps.chat);
        let stored = message.clone();
        tokio::spawn(async move {
            if let Err(e) = store.store(&stored).await {
                warn!(
                    target: "meet.session",
                    message_id = %stored.id,
                    error = %e,
                    "Failed to persist chat message"
                );
            }
        });

        Ok(message)
    }

    fn handle_incoming_message(&mut self, message: ChatMessage) {
        if self.sent_ids.contains(&message.id) || self.chat.iter().any(|m| m.id == message.id) {
            debug!(target: "meet.session", message_id = %message.id, "Duplicate chat message dropped");
            return;
        }
        self.chat.push(message);
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id))]
    async fn handle_leave(&mut self) -> Result<Route, SessionError> {
        match self.phase {
            SessionPhase::Joining | SessionPhase::Joined | SessionPhase::Degraded => {
                self.teardown("leave", true).await;
            }
            SessionPhase::Idle | SessionPhase::Ended | SessionPhase::Closed => {}
        }

        self.phase = SessionPhase::Closed;
        self.redirect = Some(Route::Dashboard);
        Ok(Route::Dashboard)
    }

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id))]
    async fn handle_end_meeting(&mut self) -> Result<MeetingSummary, SessionError> {
        if self.phase != SessionPhase::Joined {
            return Err(SessionError::NotJoined);
        }
        if !self.is_host {
            warn!(target: "meet.session", meeting_id = %self.meeting_id, "Non-host tried to end the meeting");
            return Err(SessionError::PermissionDenied(
                "Only the meeting host can end the meeting".to_string(),
            ));
        }

        let end_event = ClientEvent::EndMeeting {
            meeting_id: self.meeting_id.clone(),
        };
        let end_event_name = end_event.name();
        let mut broadcast_queued = false;
        if let Some(connection) = &self.connection {
            match connection.emit(end_event) {
                Ok(()) => broadcast_queued = true,
                Err(e) => {
                    warn!(target: "meet.session", error = %e, "Failed to broadcast meeting end");
                }
            }
        }
        self.showing_summary = true;

        let result = match self.deps.membership.finish_meeting(&self.meeting_id).await {
            Ok(summary) => {
                info!(target: "meet.session", meeting_id = %self.meeting_id, "Meeting finished");
                self.summary = Some(summary.clone());
                Ok(summary)
            }
            Err(e) => {
                error!(target: "meet.session", meeting_id = %self.meeting_id, error = %e, "Finishing meeting failed");
                self.showing_summary = false;
                self.error_message = Some(e.user_message());
                Err(SessionError::from(e))
            }
        };

        let undelivered = self
            .teardown("meeting ended", false)
            .await
            .unwrap_or_default();
        if !broadcast_queued || undelivered.contains(&end_event_name) {
            warn!(
                target: "meet.session",
                meeting_id = %self.meeting_id,
                "Meeting end was not broadcast to participants"
            );
            if self.error_message.is_none() {
                self.error_message = Some(END_NOT_BROADCAST_NOTICE.to_string());
            }
        }
        self.phase = SessionPhase::Ended;
        result
    }

    async fn handle_meeting_ended(&mut self) {
        if self.showing_summary || self.is_host {
            debug!(target: "meet.session", meeting_id = %self.meeting_id, "Ignoring own meeting end broadcast");
            return;
        }
        if self.ended_notice.is_some()
            || !matches!(self.phase, SessionPhase::Joined | SessionPhase::Degraded)
        {
            return;
        }

        info!(target: "meet.session", meeting_id = %self.meeting_id, "Meeting ended by host");
        self.teardown("meeting ended by host", false).await;
        self.phase = SessionPhase::Ended;
        self.ended_notice = Some(ENDED_BY_HOST_NOTICE.to_string());
    }

    /// Media, then presence, then signaling. Each step's failure is logged
    /// and the next step still runs. Returns the names of signaling events
    /// that were never sent, or `None` if a teardown is already in progress.
    async fn teardown(
        &mut self,
        reason: &str,
        remove_presence: bool,
    ) -> Option<Vec<&'static str>> {
        if self.is_cleaning_up {
            debug!(target: "meet.session", reason = %reason, "Teardown already in progress");
            return None;
        }
        self.is_cleaning_up = true;
        self.attendance += 1;

        info!(target: "meet.session", meeting_id = %self.meeting_id, reason = %reason, "Tearing down session");

        // Channels may be shared with later sessions; only release our own
        for handle in [&self.deps.audio, &self.deps.video] {
            if let Err(e) = handle.release(&self.media_tx).await {
                warn!(target: "meet.session", kind = %handle.kind(), error = %e, "Media leave failed");
            }
        }

        if remove_presence {
            if let (Some(verified), Some(socket_id)) = (&self.verified, &self.socket_id) {
                if let Err(e) = self
                    .deps
                    .membership
                    .remove_presence(&self.meeting_id, &verified.user_id, socket_id)
                    .await
                {
                    warn!(target: "meet.session", error = %e, "Presence removal failed");
                }
            }
        }

        let undelivered = self.deps.signaling.disconnect().await;

        self.forwarders.cancel();
        self.forwarders = self.cancel_token.child_token();
        self.connection = None;
        self.media_ready.clear();
        self.remote_streams.clear();
        self.roster.clear();
        self.known_peers.clear();

        let events = self.events_tx.clone();
        let settle = self.settings.cleanup_settle;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let _ = events.send(SessionEvent::CleanupSettled);
        });

        Some(undelivered)
    }

    async fn shutdown(&mut self) {
        if matches!(
            self.phase,
            SessionPhase::Joining | SessionPhase::Joined | SessionPhase::Degraded
        ) {
            self.teardown("shutdown", true).await;
            self.phase = SessionPhase::Closed;
        }
        self.forwarders.cancel();
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    async fn snapshot(&self) -> SessionSnapshot {
        let mut peers: BTreeMap<String, PeerLinks> = self
            .known_peers
            .iter()
            .map(|user| {
                (
                    user.clone(),
                    PeerLinks {
                        user_id: user.clone(),
                        audio: None,
                        video: None,
                    },
                )
            })
            .collect();
        let mut mic_enabled = false;
        let mut camera_enabled = false;

        for kind in MediaKind::ALL {
            if !self.media_ready.contains(&kind) {
                continue;
            }
            let Ok(state) = self.media(kind).state().await else {
                continue;
            };

            match kind {
                MediaKind::Audio => mic_enabled = state.local_enabled,
                MediaKind::Video => camera_enabled = state.local_enabled,
            }

            for user in state
                .active_users
                .iter()
                .filter(|user| self.known_peers.contains(*user))
            {
                let status = if state.stream_users.contains(user) {
                    LinkStatus::Connected
                } else {
                    LinkStatus::Connecting
                };
                if let Some(links) = peers.get_mut(user) {
                    match kind {
                        MediaKind::Audio => links.audio = Some(status),
                        MediaKind::Video => links.video = Some(status),
                    }
                }
            }
        }

        let stream_users = |kind: MediaKind| -> Vec<String> {
            self.visible_streams(kind)
                .map(|(user, _)| user.clone())
                .collect()
        };

        SessionSnapshot {
            meeting_id: self.meeting_id.clone(),
            phase: self.phase,
            is_host: self.is_host,
            roster: self.roster.clone(),
            peers: peers.into_values().collect(),
            remote_audio_users: stream_users(MediaKind::Audio),
            remote_video_users: stream_users(MediaKind::Video),
            mic_enabled,
            camera_enabled,
            chat: self.chat.clone(),
            error_message: self.error_message.clone(),
            connection_notice: self.connection_notice.clone(),
            connection_lost: self.connection_lost,
            ended_notice: self.ended_notice.clone(),
            summary: self.summary.clone(),
            showing_summary: self.showing_summary,
            redirect: self.redirect,
        }
    }
}

/// Banner shown when a media channel is lost mid-meeting.
#[must_use]
pub fn media_lost_notice(kind: MediaKind) -> String {
    format!(
        "Your {} is no longer shared with the meeting. Rejoin to restore it",
        kind.device_name()
    )
}

fn spawn_signaling_forwarder(
    mut receiver: mpsc::UnboundedReceiver<SignalingEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel_token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                event = receiver.recv() => {
                    let Some(event) = event else { break };
                    if events.send(SessionEvent::Signaling(event)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
