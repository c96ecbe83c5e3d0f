//! Meeting session orchestration.
//!
//! ```text
//! MeetingSessionActor
//! ├── SignalingClient (presence, roster, chat, termination)
//! ├── MediaChannelHandle (audio)
//! ├── MediaChannelHandle (video)
//! ├── MembershipService (presence registration, host lookup, finish)
//! └── ChatStore (persistence)
//! ```
//!
//! # Modules
//!
//! - [`identity`] - local identity and its validation
//! - [`messages`] - actor messages, outcomes and the render snapshot
//! - [`controller`] - `MeetingSessionActor` and its handle

pub mod controller;
pub mod identity;
pub mod messages;

pub use controller::{
    media_lost_notice, MeetingSessionActor, MeetingSessionHandle, SessionDeps, SessionSettings,
    CONNECTION_LOST_NOTICE, ENDED_BY_HOST_NOTICE, END_NOT_BROADCAST_NOTICE, RECONNECTING_NOTICE,
    SESSION_EVENT_KINDS,
};
pub use identity::{LocalIdentity, VerifiedIdentity};
pub use messages::{JoinOutcome, PeerLinks, Route, SessionPhase, SessionSnapshot};
