//! Nexmeet Client Core
//!
//! Peer connection and meeting-session orchestration for the Nexmeet video
//! meeting client:
//!
//! - Persistent signaling connection with reconnection and typed events
//! - One media channel per kind (audio, video), each with its own capture,
//!   peer identity and per-participant calls
//! - Roster reconciliation into peer calls, host-driven meeting end and
//!   ordered teardown
//! - Thin REST collaborators for presence, meeting records and chat
//!
//! # Architecture
//!
//! ```text
//! MeetingClient
//! ├── MediaChannelActor (audio)      -- shared by all sessions
//! ├── MediaChannelActor (video)
//! └── MeetingSessionActor (one per opened session)
//!     ├── SignalingClient -> SignalingConnection -> SignalingTransport
//!     ├── MembershipService (HTTP)
//!     └── ChatStore (HTTP)
//! ```
//!
//! Codec and network transport are out of scope: capture devices and the
//! peer transport are traits ([`media::CaptureDevice`],
//! [`media::PeerTransport`]) supplied by the embedding application.
//!
//! # Modules
//!
//! - [`api`] - HTTP collaborators
//! - [`client`] - `MeetingClient` assembly
//! - [`config`] - configuration from environment
//! - [`errors`] - error types and banner text
//! - [`media`] - media channel actors and transport seams
//! - [`observability`] - tracing setup and metrics
//! - [`session`] - meeting session actor
//! - [`signaling`] - signaling client, event bus, WebSocket transport

pub mod api;
pub mod client;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod session;
pub mod signaling;

pub use client::MeetingClient;
pub use config::Config;
pub use errors::{
    CaptureDeviceError, MediaError, RequestError, SessionError, SignalingError, TransportError,
};
pub use session::{JoinOutcome, LocalIdentity, MeetingSessionHandle, Route, SessionSnapshot};
