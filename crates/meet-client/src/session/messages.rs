//! Message and view types for `MeetingSessionActor`.

use crate::api::MeetingSummary;
use crate::errors::{MediaError, SessionError};
use crate::media::{LinkStatus, MediaStream};
use crate::signaling::{ChatMessage, RosterEntry, SignalingEvent};

use common::types::MediaKind;
use tokio::sync::oneshot;

/// Where the UI should navigate next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dashboard,
    Login,
    Profile,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Joining,
    Joined,
    /// Connection or registration failed; only `leave` is useful.
    Degraded,
    /// Meeting finished (by us or by the host).
    Ended,
    /// Left; the session accepts no further joins.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { participants: usize },
    /// A previous join already ran for this session.
    AlreadyJoined,
    /// The identity is incomplete.
    Redirected(Route),
    /// Connected only partially; `message` is the banner text.
    Degraded { message: String },
}

/// Link state towards one remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLinks {
    pub user_id: String,
    pub audio: Option<LinkStatus>,
    pub video: Option<LinkStatus>,
}

/// Everything the meeting view renders.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub meeting_id: String,
    pub phase: SessionPhase,
    pub is_host: bool,
    pub roster: Vec<RosterEntry>,
    /// One entry per remote roster user, sorted by user id.
    pub peers: Vec<PeerLinks>,
    pub remote_audio_users: Vec<String>,
    pub remote_video_users: Vec<String>,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub chat: Vec<ChatMessage>,
    /// Dismissable error banner.
    pub error_message: Option<String>,
    /// Reconnection banner.
    pub connection_notice: Option<String>,
    pub connection_lost: bool,
    /// "Ended by host" notice for non-hosts.
    pub ended_notice: Option<String>,
    pub summary: Option<MeetingSummary>,
    pub showing_summary: bool,
    pub redirect: Option<Route>,
}

/// Requests handled by `MeetingSessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    Join {
        respond_to: oneshot::Sender<Result<JoinOutcome, SessionError>>,
    },

    Leave {
        respond_to: oneshot::Sender<Result<Route, SessionError>>,
    },

    EndMeeting {
        respond_to: oneshot::Sender<Result<MeetingSummary, SessionError>>,
    },

    SetMuted {
        kind: MediaKind,
        muted: bool,
        respond_to: oneshot::Sender<bool>,
    },

    SendMessage {
        text: String,
        respond_to: oneshot::Sender<Result<ChatMessage, SessionError>>,
    },

    DismissError,

    /// Returns the redirect the first time only.
    AcknowledgeEnded {
        respond_to: oneshot::Sender<Option<Route>>,
    },

    AcknowledgeSummary {
        respond_to: oneshot::Sender<Option<Route>>,
    },

    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    RemoteStreams {
        kind: MediaKind,
        respond_to: oneshot::Sender<Vec<(String, MediaStream)>>,
    },
}

/// Events produced inside the session: forwarded signaling events,
/// background init results and timers.
#[derive(Debug)]
pub enum SessionEvent {
    Signaling(SignalingEvent),
    MediaInitialized {
        kind: MediaKind,
        /// Attendance the init was started for.
        attendance: u64,
        result: Result<MediaStream, MediaError>,
    },
    CleanupSettled,
}
