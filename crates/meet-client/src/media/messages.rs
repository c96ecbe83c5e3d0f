//! Message and snapshot types for the media channel actor.

use super::identity::PeerIdentity;
use super::stream::MediaStream;
use super::transport::{ConnectionEvent, EndpointEvent};
use crate::errors::MediaError;

use common::types::MediaKind;
use tokio::sync::{mpsc, oneshot};

/// Stream lifecycle notifications sent to the channel's owner.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    StreamAdded {
        kind: MediaKind,
        user_id: String,
        stream: MediaStream,
    },
    StreamRemoved {
        kind: MediaKind,
        user_id: String,
    },
    /// The channel tore itself down without being asked to (endpoint lost).
    /// Sent after a `StreamRemoved` for every remote stream it held.
    ChannelClosed {
        kind: MediaKind,
        reason: String,
    },
}

impl MediaEvent {
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaEvent::StreamAdded { kind, .. }
            | MediaEvent::StreamRemoved { kind, .. }
            | MediaEvent::ChannelClosed { kind, .. } => *kind,
        }
    }

    /// Remote user the event is about; `None` for channel-wide events.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            MediaEvent::StreamAdded { user_id, .. } | MediaEvent::StreamRemoved { user_id, .. } => {
                Some(user_id)
            }
            MediaEvent::ChannelClosed { .. } => None,
        }
    }
}

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Uninitialized,
    Ready,
    /// Only observable while a leave is being processed.
    Leaving,
}

/// Who placed a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outbound,
    Inbound,
}

impl CallDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CallDirection::Outbound => "outbound",
            CallDirection::Inbound => "inbound",
        }
    }
}

/// Link status of one peer connection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Call placed or answered, no remote media yet.
    Connecting,
    /// Remote media flowing.
    Connected,
}

/// Caller-facing view of a tracked peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnectionHandle {
    pub connection_id: String,
    pub remote_user_id: String,
    pub peer: PeerIdentity,
    pub direction: CallDirection,
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub kind: MediaKind,
    pub phase: ChannelPhase,
    pub peer_identity: Option<PeerIdentity>,
    pub local_enabled: bool,
    /// Users with a tracked connection, sorted.
    pub active_users: Vec<String>,
    /// Users whose remote stream is available, sorted.
    pub stream_users: Vec<String>,
}

/// Messages handled by `MediaChannelActor`.
#[derive(Debug)]
pub enum ChannelMessage {
    Init {
        meeting_id: String,
        user_id: String,
        events: mpsc::UnboundedSender<MediaEvent>,
        respond_to: oneshot::Sender<Result<MediaStream, MediaError>>,
    },

    ConnectToPeer {
        peer: PeerIdentity,
        remote_user_id: String,
        respond_to: oneshot::Sender<Option<PeerConnectionHandle>>,
    },

    SetMuted {
        muted: bool,
        respond_to: oneshot::Sender<bool>,
    },

    GetState {
        respond_to: oneshot::Sender<ChannelState>,
    },

    /// Remote streams by user id.
    GetRemoteStreams {
        respond_to: oneshot::Sender<Vec<(String, MediaStream)>>,
    },

    GetLocalStream {
        respond_to: oneshot::Sender<Option<MediaStream>>,
    },

    Leave {
        respond_to: oneshot::Sender<()>,
    },

    /// Leave only if the channel was initialized with `owner` as its event
    /// sink. Replies whether the channel was torn down.
    Release {
        owner: mpsc::UnboundedSender<MediaEvent>,
        respond_to: oneshot::Sender<bool>,
    },

    /// Forwarded from a call's event feed.
    Connection {
        connection_id: String,
        remote_user_id: String,
        event: ConnectionEvent,
    },

    /// Forwarded from the endpoint's event feed. `generation` identifies the
    /// registration the event belongs to.
    Endpoint {
        generation: u64,
        event: EndpointEvent,
    },
}
