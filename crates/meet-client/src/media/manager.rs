//! `MediaChannelActor` - one media kind's capture, peer identity and calls.
//!
//! Each channel:
//! - Owns at most one local capture stream
//! - Registers one endpoint on its kind's peer server
//! - Tracks at most one call per remote user
//! - Reports remote stream arrival/removal to its owner
//!
//! Transport callbacks never touch actor state directly. Small forwarder
//! tasks move call and endpoint events into the mailbox, tagged with the
//! connection id (or registration generation) they belong to. An event
//! whose tag no longer matches the registry is dropped, so late events from
//! replaced or torn-down calls are harmless.
//!
//! # Simultaneous calls
//!
//! When two participants call each other at the same time, both sides keep
//! the call placed by the lexicographically smaller user id and close the
//! other.

use super::identity::PeerIdentity;
use super::messages::{
    CallDirection, ChannelMessage, ChannelPhase, ChannelState, LinkStatus, MediaEvent,
    PeerConnectionHandle,
};
use super::stream::{CaptureConstraints, CaptureDevice, MediaStream};
use super::transport::{
    CallChannel, ConnectionEvent, EndpointEvent, MediaConnection, PeerEndpoint, PeerTransport,
};
use crate::config::PeerServerConfig;
use crate::errors::{MediaError, TransportError};
use crate::observability::metrics;

use common::types::MediaKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the media channel mailbox.
const CHANNEL_MAILBOX_BUFFER: usize = 256;

/// Handle to a `MediaChannelActor`.
#[derive(Clone)]
pub struct MediaChannelHandle {
    sender: mpsc::Sender<ChannelMessage>,
    cancel_token: CancellationToken,
    kind: MediaKind,
}

impl MediaChannelHandle {
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ChannelMessage,
    ) -> Result<T, MediaError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| MediaError::ChannelClosed(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MediaError::ChannelClosed(format!("response receive failed: {e}")))
    }

    /// Acquire the local capture and register on the peer server.
    ///
    /// Stream lifecycle events are delivered on `events` until `leave`.
    ///
    /// # Errors
    ///
    /// - `MediaError::AlreadyInitialized` if a local stream is active
    /// - `MediaError::CaptureDevice` if the device refused
    /// - `MediaError::Transport` if registration failed or timed out
    pub async fn init(
        &self,
        meeting_id: &str,
        user_id: &str,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<MediaStream, MediaError> {
        self.request(|respond_to| ChannelMessage::Init {
            meeting_id: meeting_id.to_string(),
            user_id: user_id.to_string(),
            events,
            respond_to,
        })
        .await?
    }

    /// Call `peer` unless a connection to `remote_user_id` is already tracked.
    ///
    /// Returns `Ok(None)` when the channel cannot place calls right now
    /// (not ready, endpoint disconnected, self-call, transport refused).
    ///
    /// # Errors
    ///
    /// Returns `MediaError::ChannelClosed` if the actor is gone.
    pub async fn connect_to_peer(
        &self,
        peer: PeerIdentity,
        remote_user_id: &str,
    ) -> Result<Option<PeerConnectionHandle>, MediaError> {
        self.request(|respond_to| ChannelMessage::ConnectToPeer {
            peer,
            remote_user_id: remote_user_id.to_string(),
            respond_to,
        })
        .await
    }

    /// Enable or disable every local track of this kind.
    ///
    /// Returns the new enabled state, or `false` if there was nothing to toggle.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::ChannelClosed` if the actor is gone.
    pub async fn set_muted(&self, muted: bool) -> Result<bool, MediaError> {
        self.request(|respond_to| ChannelMessage::SetMuted { muted, respond_to })
            .await
    }

    /// Microphone toggle. `false` on any failure.
    pub async fn toggle_mic(&self, mute: bool) -> bool {
        self.toggle_for(MediaKind::Audio, mute).await
    }

    /// Camera toggle. `false` on any failure.
    pub async fn toggle_camera(&self, off: bool) -> bool {
        self.toggle_for(MediaKind::Video, off).await
    }

    async fn toggle_for(&self, expected: MediaKind, muted: bool) -> bool {
        if self.kind != expected {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                expected = %expected,
                "Toggle called on the wrong media channel"
            );
            return false;
        }

        match self.set_muted(muted).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(target: "meet.media.channel", kind = %self.kind, error = %e, "Toggle failed");
                false
            }
        }
    }

    /// Whether the first local track is enabled.
    pub async fn is_enabled(&self) -> bool {
        self.state().await.is_ok_and(|state| state.local_enabled)
    }

    /// Snapshot of the channel.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::ChannelClosed` if the actor is gone.
    pub async fn state(&self) -> Result<ChannelState, MediaError> {
        self.request(|respond_to| ChannelMessage::GetState { respond_to })
            .await
    }

    /// Remote streams by user id, sorted by user id.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::ChannelClosed` if the actor is gone.
    pub async fn remote_streams(&self) -> Result<Vec<(String, MediaStream)>, MediaError> {
        self.request(|respond_to| ChannelMessage::GetRemoteStreams { respond_to })
            .await
    }

    /// # Errors
    ///
    /// Returns `MediaError::ChannelClosed` if the actor is gone.
    pub async fn local_stream(&self) -> Result<Option<MediaStream>, MediaError> {
        self.request(|respond_to| ChannelMessage::GetLocalStream { respond_to })
            .await
    }

    /// Close every call, stop the local capture, unregister. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::ChannelClosed` if the actor is gone.
    pub async fn leave(&self) -> Result<(), MediaError> {
        self.request(|respond_to| ChannelMessage::Leave { respond_to })
            .await
    }

    /// Leave on behalf of the owner that initialized the channel with
    /// `owner` as its event sink. A channel initialized by someone else, or
    /// not initialized at all, is left untouched.
    ///
    /// Returns whether the channel was torn down.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::ChannelClosed` if the actor is gone.
    pub async fn release(
        &self,
        owner: &mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<bool, MediaError> {
        self.request(|respond_to| ChannelMessage::Release {
            owner: owner.clone(),
            respond_to,
        })
        .await
    }

    /// Cancel the actor. Performs a final leave before exiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// State of an initialized channel.
struct ActiveChannel {
    user_id: String,
    identity: PeerIdentity,
    local_stream: MediaStream,
    endpoint: Arc<dyn PeerEndpoint>,
    events: mpsc::UnboundedSender<MediaEvent>,
    /// Parent token of every forwarder for this registration.
    forwarders: CancellationToken,
    generation: u64,
}

struct PeerConnectionEntry {
    connection: Arc<dyn MediaConnection>,
    peer: PeerIdentity,
    direction: CallDirection,
    status: LinkStatus,
}

impl PeerConnectionEntry {
    fn handle(&self, remote_user_id: &str) -> PeerConnectionHandle {
        PeerConnectionHandle {
            connection_id: self.connection.connection_id().to_string(),
            remote_user_id: remote_user_id.to_string(),
            peer: self.peer.clone(),
            direction: self.direction,
        }
    }
}

/// The media channel actor.
pub struct MediaChannelActor {
    kind: MediaKind,
    server: PeerServerConfig,
    capture: Arc<dyn CaptureDevice>,
    transport: Arc<dyn PeerTransport>,
    open_timeout: Duration,
    receiver: mpsc::Receiver<ChannelMessage>,
    /// Weak so forwarders never keep the mailbox open.
    self_sender: mpsc::WeakSender<ChannelMessage>,
    cancel_token: CancellationToken,
    phase: ChannelPhase,
    active: Option<ActiveChannel>,
    /// Remote user id -> call.
    connections: HashMap<String, PeerConnectionEntry>,
    /// Remote user id -> remote media.
    remote_streams: HashMap<String, MediaStream>,
    generation: u64,
}

impl MediaChannelActor {
    /// Spawn a channel actor for `kind` registering on `server`.
    pub fn spawn(
        kind: MediaKind,
        server: PeerServerConfig,
        capture: Arc<dyn CaptureDevice>,
        transport: Arc<dyn PeerTransport>,
        open_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> (MediaChannelHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_MAILBOX_BUFFER);

        let actor = Self {
            kind,
            server,
            capture,
            transport,
            open_timeout,
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            phase: ChannelPhase::Uninitialized,
            active: None,
            connections: HashMap::new(),
            remote_streams: HashMap::new(),
            generation: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MediaChannelHandle {
            sender,
            cancel_token,
            kind,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "meet.media.channel", fields(kind = %self.kind))]
    async fn run(mut self) {
        debug!(
            target: "meet.media.channel",
            kind = %self.kind,
            server = %self.server,
            "MediaChannelActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "meet.media.channel",
                        kind = %self.kind,
                        "MediaChannelActor received cancellation signal"
                    );
                    self.handle_leave("shutdown");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "meet.media.channel",
                                kind = %self.kind,
                                "MediaChannelActor channel closed, exiting"
                            );
                            self.handle_leave("handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        debug!(target: "meet.media.channel", kind = %self.kind, "MediaChannelActor stopped");
    }

    async fn handle_message(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::Init {
                meeting_id,
                user_id,
                events,
                respond_to,
            } => {
                let result = self.handle_init(&meeting_id, user_id, events).await;
                let _ = respond_to.send(result);
            }

            ChannelMessage::ConnectToPeer {
                peer,
                remote_user_id,
                respond_to,
            } => {
                let result = self.handle_connect_to_peer(peer, &remote_user_id);
                let _ = respond_to.send(result);
            }

            ChannelMessage::SetMuted { muted, respond_to } => {
                let _ = respond_to.send(self.handle_set_muted(muted));
            }

            ChannelMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            ChannelMessage::GetRemoteStreams { respond_to } => {
                let mut streams: Vec<(String, MediaStream)> = self
                    .remote_streams
                    .iter()
                    .map(|(user, stream)| (user.clone(), stream.clone()))
                    .collect();
                streams.sort_by(|a, b| a.0.cmp(&b.0));
                let _ = respond_to.send(streams);
            }

            ChannelMessage::GetLocalStream { respond_to } => {
                let stream = self.active.as_ref().map(|a| a.local_stream.clone());
                let _ = respond_to.send(stream);
            }

            ChannelMessage::Leave { respond_to } => {
                self.handle_leave("leave requested");
                let _ = respond_to.send(());
            }

            ChannelMessage::Release { owner, respond_to } => {
                let owned = self
                    .active
                    .as_ref()
                    .is_some_and(|active| active.events.same_channel(&owner));
                if owned {
                    self.handle_leave("released by owner");
                } else {
                    debug!(
                        target: "meet.media.channel",
                        kind = %self.kind,
                        initialized = self.active.is_some(),
                        "Release ignored: channel not owned by caller"
                    );
                }
                let _ = respond_to.send(owned);
            }

            ChannelMessage::Connection {
                connection_id,
                remote_user_id,
                event,
            } => {
                self.handle_connection_event(&connection_id, remote_user_id, event);
            }

            ChannelMessage::Endpoint { generation, event } => {
                self.handle_endpoint_event(generation, event);
            }
        }
    }

    async fn handle_init(
        &mut self,
        meeting_id: &str,
        user_id: String,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<MediaStream, MediaError> {
        if self.phase != ChannelPhase::Uninitialized {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                "Init rejected: channel already initialized"
            );
            return Err(MediaError::AlreadyInitialized(self.kind));
        }

        let constraints = CaptureConstraints::for_kind(self.kind);
        let local_stream = match self.capture.acquire(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    error = %e,
                    "Capture device acquisition failed"
                );
                metrics::record_capture_failure(self.kind, e.reason_label());
                return Err(e.into());
            }
        };

        let identity = PeerIdentity::new(meeting_id, &user_id);
        let registration = tokio::time::timeout(
            self.open_timeout,
            self.transport.register(identity.clone(), &self.server),
        )
        .await;

        let registered = match registration {
            Ok(Ok(registered)) => registered,
            Ok(Err(e)) => {
                error!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    peer_id = %identity,
                    server = %self.server,
                    error = %e,
                    "Peer server registration failed"
                );
                local_stream.stop_all();
                return Err(e.into());
            }
            Err(_) => {
                let timeout_ms = u64::try_from(self.open_timeout.as_millis()).unwrap_or(u64::MAX);
                error!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    peer_id = %identity,
                    server = %self.server,
                    timeout_ms,
                    "Peer server registration timed out"
                );
                local_stream.stop_all();
                return Err(TransportError::Timeout(timeout_ms).into());
            }
        };

        self.generation += 1;
        let forwarders = self.cancel_token.child_token();
        spawn_endpoint_forwarder(
            self.self_sender.clone(),
            forwarders.clone(),
            self.generation,
            registered.events,
        );

        info!(
            target: "meet.media.channel",
            kind = %self.kind,
            peer_id = %identity,
            server = %self.server,
            "Media channel ready"
        );

        self.active = Some(ActiveChannel {
            user_id,
            identity,
            local_stream: local_stream.clone(),
            endpoint: registered.endpoint,
            events,
            forwarders,
            generation: self.generation,
        });
        self.phase = ChannelPhase::Ready;

        Ok(local_stream)
    }

    fn handle_connect_to_peer(
        &mut self,
        peer: PeerIdentity,
        remote_user_id: &str,
    ) -> Option<PeerConnectionHandle> {
        let Some(active) = self
            .active
            .as_ref()
            .filter(|_| self.phase == ChannelPhase::Ready)
        else {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                remote_user_id = %remote_user_id,
                "Cannot connect to peer: channel not initialized"
            );
            return None;
        };

        if active.endpoint.is_disconnected() {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                remote_user_id = %remote_user_id,
                "Cannot connect to peer: endpoint disconnected from peer server"
            );
            return None;
        }

        if remote_user_id == active.user_id {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                "Refusing to call self"
            );
            return None;
        }

        if let Some(entry) = self.connections.get(remote_user_id) {
            debug!(
                target: "meet.media.channel",
                kind = %self.kind,
                remote_user_id = %remote_user_id,
                status = ?entry.status,
                "Connection already tracked"
            );
            return Some(entry.handle(remote_user_id));
        }

        let channel = match active.endpoint.call(&peer, &active.local_stream) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    peer_id = %peer,
                    error = %e,
                    "Outgoing call failed"
                );
                return None;
            }
        };

        Some(self.track_connection(
            remote_user_id.to_string(),
            peer,
            CallDirection::Outbound,
            channel,
        ))
    }

    fn handle_incoming_call(&mut self, channel: CallChannel) {
        let caller = channel.connection.peer().clone();
        let remote_user_id = caller.user_id().to_string();

        let Some(active) = self
            .active
            .as_ref()
            .filter(|_| self.phase == ChannelPhase::Ready)
        else {
            debug!(
                target: "meet.media.channel",
                kind = %self.kind,
                caller = %caller,
                "Incoming call closed: channel not ready"
            );
            channel.connection.close();
            return;
        };

        if remote_user_id.is_empty() || remote_user_id == active.user_id {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                caller = %caller,
                "Incoming call closed: unusable caller identity"
            );
            channel.connection.close();
            return;
        }

        let local_user_id = active.user_id.clone();
        let local_stream = active.local_stream.clone();

        if let Some(existing) = self.connections.get(&remote_user_id) {
            let keep_existing = existing.status == LinkStatus::Connecting
                && existing.direction == CallDirection::Outbound
                && local_user_id < remote_user_id;

            if keep_existing {
                debug!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    remote_user_id = %remote_user_id,
                    "Simultaneous call: keeping our outgoing call"
                );
                channel.connection.close();
                return;
            }

            debug!(
                target: "meet.media.channel",
                kind = %self.kind,
                remote_user_id = %remote_user_id,
                status = ?existing.status,
                direction = existing.direction.as_str(),
                "Replacing tracked connection with incoming call"
            );
            if let Some(old) = self.connections.remove(&remote_user_id) {
                old.connection.close();
                metrics::record_peer_connection_closed(self.kind, "replaced");
            }
        }

        if let Err(e) = channel.connection.answer(&local_stream) {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                caller = %caller,
                error = %e,
                "Failed to answer incoming call"
            );
            channel.connection.close();
            return;
        }

        self.track_connection(remote_user_id, caller, CallDirection::Inbound, channel);
    }

    fn track_connection(
        &mut self,
        remote_user_id: String,
        peer: PeerIdentity,
        direction: CallDirection,
        channel: CallChannel,
    ) -> PeerConnectionHandle {
        let CallChannel { connection, events } = channel;
        let connection_id = connection.connection_id().to_string();

        if let Some(active) = &self.active {
            spawn_connection_forwarder(
                self.self_sender.clone(),
                active.forwarders.child_token(),
                connection_id.clone(),
                remote_user_id.clone(),
                events,
            );
        }

        let entry = PeerConnectionEntry {
            connection,
            peer,
            direction,
            status: LinkStatus::Connecting,
        };
        let handle = entry.handle(&remote_user_id);

        debug!(
            target: "meet.media.channel",
            kind = %self.kind,
            remote_user_id = %remote_user_id,
            connection_id = %connection_id,
            direction = direction.as_str(),
            "Tracking peer connection"
        );

        self.connections.insert(remote_user_id, entry);
        metrics::record_peer_connection_opened(self.kind, direction.as_str());
        metrics::set_peer_connections_active(self.kind, self.connections.len());

        handle
    }

    fn handle_connection_event(
        &mut self,
        connection_id: &str,
        remote_user_id: String,
        event: ConnectionEvent,
    ) {
        let is_current = self
            .connections
            .get(&remote_user_id)
            .is_some_and(|entry| entry.connection.connection_id() == connection_id);

        if !is_current {
            debug!(
                target: "meet.media.channel",
                kind = %self.kind,
                remote_user_id = %remote_user_id,
                connection_id = %connection_id,
                "Ignoring event for untracked connection"
            );
            return;
        }

        match event {
            ConnectionEvent::Stream(stream) => {
                if let Some(entry) = self.connections.get_mut(&remote_user_id) {
                    entry.status = LinkStatus::Connected;
                }
                self.remote_streams
                    .insert(remote_user_id.clone(), stream.clone());

                info!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    remote_user_id = %remote_user_id,
                    "Remote stream added"
                );
                self.emit(MediaEvent::StreamAdded {
                    kind: self.kind,
                    user_id: remote_user_id,
                    stream,
                });
            }
            ConnectionEvent::Closed => {
                self.drop_connection(remote_user_id, "closed");
            }
            ConnectionEvent::Error(reason) => {
                warn!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    remote_user_id = %remote_user_id,
                    error = %reason,
                    "Peer connection error"
                );
                if let Some(entry) = self.connections.get(&remote_user_id) {
                    entry.connection.close();
                }
                self.drop_connection(remote_user_id, "error");
            }
        }
    }

    fn drop_connection(&mut self, remote_user_id: String, reason: &'static str) {
        self.connections.remove(&remote_user_id);
        self.remote_streams.remove(&remote_user_id);
        metrics::record_peer_connection_closed(self.kind, reason);
        metrics::set_peer_connections_active(self.kind, self.connections.len());

        info!(
            target: "meet.media.channel",
            kind = %self.kind,
            remote_user_id = %remote_user_id,
            reason,
            "Peer connection removed"
        );
        self.emit(MediaEvent::StreamRemoved {
            kind: self.kind,
            user_id: remote_user_id,
        });
    }

    fn handle_endpoint_event(&mut self, generation: u64, event: EndpointEvent) {
        let is_current = self
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);

        if !is_current {
            if let EndpointEvent::IncomingCall(channel) = event {
                channel.connection.close();
            }
            debug!(
                target: "meet.media.channel",
                kind = %self.kind,
                generation,
                "Ignoring event from a previous registration"
            );
            return;
        }

        match event {
            EndpointEvent::IncomingCall(channel) => self.handle_incoming_call(channel),
            EndpointEvent::Disconnected => {
                warn!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    "Endpoint disconnected from peer server"
                );
            }
            EndpointEvent::Closed => {
                warn!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    "Endpoint closed, tearing down channel"
                );
                self.teardown("endpoint closed", true);
            }
            EndpointEvent::Error(reason) => {
                error!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    error = %reason,
                    "Endpoint error"
                );
            }
        }
    }

    fn handle_set_muted(&mut self, muted: bool) -> bool {
        let Some(active) = &self.active else {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                "No local stream to toggle"
            );
            return false;
        };

        if active.local_stream.set_enabled(self.kind, !muted) == 0 {
            warn!(
                target: "meet.media.channel",
                kind = %self.kind,
                "Local stream has no track to toggle"
            );
            return false;
        }

        debug!(
            target: "meet.media.channel",
            kind = %self.kind,
            enabled = !muted,
            "Local tracks toggled"
        );
        !muted
    }

    fn handle_leave(&mut self, reason: &'static str) {
        self.teardown(reason, false);
    }

    /// Closes every call, stops the capture and destroys the endpoint.
    ///
    /// With `notify_owner` the owner gets a `StreamRemoved` per remote
    /// stream and a final `ChannelClosed`; a requested leave is silent.
    fn teardown(&mut self, reason: &'static str, notify_owner: bool) {
        let Some(active) = self.active.take() else {
            debug!(
                target: "meet.media.channel",
                kind = %self.kind,
                reason,
                "Leave ignored: channel not initialized"
            );
            return;
        };

        self.phase = ChannelPhase::Leaving;

        // Stop forwarders first so closing calls cannot feed events back in
        active.forwarders.cancel();

        let closed = self.connections.len();
        let mut drained: Vec<String> = Vec::with_capacity(closed);
        for (remote_user_id, entry) in self.connections.drain() {
            entry.connection.close();
            metrics::record_peer_connection_closed(self.kind, "leave");
            drained.push(remote_user_id);
        }
        self.remote_streams.clear();
        metrics::set_peer_connections_active(self.kind, 0);

        if notify_owner {
            drained.sort();
            let events = drained
                .into_iter()
                .map(|user_id| MediaEvent::StreamRemoved {
                    kind: self.kind,
                    user_id,
                })
                .chain(std::iter::once(MediaEvent::ChannelClosed {
                    kind: self.kind,
                    reason: reason.to_string(),
                }));
            for event in events {
                if active.events.send(event).is_err() {
                    debug!(target: "meet.media.channel", kind = %self.kind, "Media event receiver dropped");
                    break;
                }
            }
        }

        let tracks_stopped = active.local_stream.stop_all();
        active.endpoint.destroy();

        self.phase = ChannelPhase::Uninitialized;

        info!(
            target: "meet.media.channel",
            kind = %self.kind,
            peer_id = %active.identity,
            connections_closed = closed,
            tracks_stopped,
            reason,
            "Media channel left"
        );
    }

    fn emit(&self, event: MediaEvent) {
        if let Some(active) = &self.active {
            if active.events.send(event).is_err() {
                debug!(
                    target: "meet.media.channel",
                    kind = %self.kind,
                    "Media event receiver dropped"
                );
            }
        }
    }

    fn snapshot(&self) -> ChannelState {
        let mut active_users: Vec<String> = self.connections.keys().cloned().collect();
        active_users.sort();
        let mut stream_users: Vec<String> = self.remote_streams.keys().cloned().collect();
        stream_users.sort();

        ChannelState {
            kind: self.kind,
            phase: self.phase,
            peer_identity: self.active.as_ref().map(|a| a.identity.clone()),
            local_enabled: self
                .active
                .as_ref()
                .is_some_and(|a| a.local_stream.first_enabled(self.kind)),
            active_users,
            stream_users,
        }
    }
}

/// Moves endpoint events into the actor mailbox.
fn spawn_endpoint_forwarder(
    mailbox: mpsc::WeakSender<ChannelMessage>,
    token: CancellationToken,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<EndpointEvent>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let Some(sender) = mailbox.upgrade() else { break };
                    if sender.send(ChannelMessage::Endpoint { generation, event }).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Moves one call's events into the actor mailbox until the call ends.
///
/// A feed that ends without a terminal event is reported as `Closed`.
fn spawn_connection_forwarder(
    mailbox: mpsc::WeakSender<ChannelMessage>,
    token: CancellationToken,
    connection_id: String,
    remote_user_id: String,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                event = events.recv() => {
                    let event = event.unwrap_or(ConnectionEvent::Closed);
                    let terminal = event.is_terminal();
                    let Some(sender) = mailbox.upgrade() else { break };
                    let message = ChannelMessage::Connection {
                        connection_id: connection_id.clone(),
                        remote_user_id: remote_user_id.clone(),
                        event,
                    };
                    if sender.send(message).await.is_err() || terminal {
                        break;
                    }
                }
            }
        }
    });
}
