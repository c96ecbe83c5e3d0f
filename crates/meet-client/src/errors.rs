//! Client core error types.
//!
//! Each layer has its own enum; `SessionError` wraps them for the session
//! controller and knows how to turn any of them into banner text.

use common::types::MediaKind;
use thiserror::Error;

/// Errors surfaced by the meeting session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation requires a joined session.
    #[error("Session not joined")]
    NotJoined,

    /// Session already torn down.
    #[error("Session closed")]
    Closed,

    /// Caller lacks the role for this operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Rejected user input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Actor plumbing failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Text suitable for the dismissable error banner.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NotJoined => "You are not connected to the meeting".to_string(),
            SessionError::Closed => "This meeting session has ended".to_string(),
            SessionError::PermissionDenied(reason) | SessionError::InvalidInput(reason) => {
                reason.clone()
            }
            SessionError::Signaling(_) => {
                "Could not reach the meeting server. Check your connection and try again"
                    .to_string()
            }
            SessionError::Media(e) => e.user_message(),
            SessionError::Request(e) => e.user_message(),
            SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Errors from a media channel manager.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Capture device error: {0}")]
    CaptureDevice(#[from] CaptureDeviceError),

    #[error("Peer transport error: {0}")]
    Transport(#[from] TransportError),

    /// `init` called while a local stream is already active.
    #[error("{0} channel already initialized")]
    AlreadyInitialized(MediaKind),

    /// The manager actor is gone.
    #[error("Media channel closed: {0}")]
    ChannelClosed(String),
}

impl MediaError {
    /// Banner text for this error.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            MediaError::CaptureDevice(e) => e.user_message(),
            MediaError::Transport(_) => {
                "Could not reach the media server. Other participants may not hear or see you"
                    .to_string()
            }
            MediaError::AlreadyInitialized(kind) => {
                format!("The {} is already in use by this meeting", kind.device_name())
            }
            MediaError::ChannelClosed(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Capture device acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureDeviceError {
    /// The user or the platform refused access.
    #[error("{kind} permission denied: {reason}")]
    PermissionDenied { kind: MediaKind, reason: String },

    /// No device present, or it is held by another application.
    #[error("{kind} device unavailable: {reason}")]
    Unavailable { kind: MediaKind, reason: String },

    #[error("{kind} capture failed: {reason}")]
    Other { kind: MediaKind, reason: String },
}

impl CaptureDeviceError {
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            CaptureDeviceError::PermissionDenied { kind, .. }
            | CaptureDeviceError::Unavailable { kind, .. }
            | CaptureDeviceError::Other { kind, .. } => *kind,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn reason_label(&self) -> &'static str {
        match self {
            CaptureDeviceError::PermissionDenied { .. } => "permission_denied",
            CaptureDeviceError::Unavailable { .. } => "unavailable",
            CaptureDeviceError::Other { .. } => "other",
        }
    }

    /// Permission problems tell the user where to fix them; anything else
    /// gets a generic message.
    #[must_use]
    pub fn user_message(&self) -> String {
        let device = self.kind().device_name();
        match self {
            CaptureDeviceError::PermissionDenied { .. } => format!(
                "Access to the {device} was denied. Allow {device} access in your browser settings and rejoin"
            ),
            CaptureDeviceError::Unavailable { .. } => {
                format!("No {device} is available. Check that it is connected and not used by another application")
            }
            CaptureDeviceError::Other { .. } => format!("Could not start the {device}"),
        }
    }
}

/// Peer transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Registration with the peer server failed.
    #[error("Peer server unavailable: {0}")]
    ServerUnavailable(String),

    /// The requested identity is already registered.
    #[error("Peer identity taken: {0}")]
    IdentityTaken(String),

    /// Registration did not complete in time.
    #[error("Peer server registration timed out after {0}ms")]
    Timeout(u64),

    /// A call could not be placed or answered.
    #[error("Call failed: {0}")]
    CallFailed(String),

    /// The local endpoint is destroyed or disconnected.
    #[error("Endpoint closed")]
    EndpointClosed,
}

/// Signaling channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connect timed out after {0}ms")]
    Timeout(u64),

    /// None of the preferred transports is supported.
    #[error("No supported transport in preference list")]
    UnsupportedTransport,

    /// Malformed frame or missing handshake.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection was closed and will not reconnect.
    #[error("Connection closed")]
    Closed,
}

/// HTTP collaborator failures.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport-level failure (DNS, connect, timeout).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-2xx response. `message` comes from the body's `error` field.
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RequestError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            RequestError::Status { message, .. } => message.clone(),
            RequestError::InvalidUrl(_) | RequestError::Decode(_) => {
                "An internal error occurred".to_string()
            }
            RequestError::Http(_) => {
                "Could not reach the meeting service. Check your connection and try again"
                    .to_string()
            }
        }
    }
}
