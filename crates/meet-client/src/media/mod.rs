//! Media channels.
//!
//! ```text
//! MediaChannelActor (one per media kind)
//! ├── local capture stream (CaptureDevice)
//! ├── endpoint "{meeting_id}-{user_id}" on the kind's peer server (PeerTransport)
//! └── remote user id -> call, remote stream
//! ```
//!
//! Audio and video are two instances of the same actor with different
//! capture constraints and peer servers. They share no state.
//!
//! # Modules
//!
//! - [`identity`] - deterministic peer identities
//! - [`stream`] - tracks, streams, capture device seam
//! - [`transport`] - peer transport seam
//! - [`messages`] - actor messages, events and snapshots
//! - [`manager`] - `MediaChannelActor` and its handle

pub mod identity;
pub mod manager;
pub mod messages;
pub mod stream;
pub mod transport;

pub use identity::{extract_user_id, PeerIdentity};
pub use manager::{MediaChannelActor, MediaChannelHandle};
pub use messages::{
    CallDirection, ChannelPhase, ChannelState, LinkStatus, MediaEvent, PeerConnectionHandle,
};
pub use stream::{CaptureConstraints, CaptureDevice, FacingMode, MediaStream, MediaTrack};
pub use transport::{
    CallChannel, ConnectionEvent, EndpointEvent, MediaConnection, PeerEndpoint, PeerTransport,
    RegisteredEndpoint,
};
