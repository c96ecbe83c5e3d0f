//! Signaling channel.
//!
//! ```text
//! SignalingClient
//! └── SignalingConnection (cached, lazily started)
//!     ├── connection task: open -> pump -> reconnect with backoff
//!     ├── EventBus (EventKind -> subscribers)
//!     └── SignalingTransport (WebSocketTransport in production)
//! ```
//!
//! # Modules
//!
//! - [`events`] - wire events and bus events
//! - [`bus`] - typed event fan-out
//! - [`client`] - `SignalingClient`, connection lifecycle, transport seam
//! - [`websocket`] - `tokio-tungstenite` transport

pub mod bus;
pub mod client;
pub mod events;
pub mod websocket;

pub use bus::EventBus;
pub use client::{
    ConnectOptions, LinkState, ReconnectPolicy, SignalingClient, SignalingConnection,
    SignalingLink, SignalingTransport, TransportKind, CLIENT_DISCONNECT_REASON,
};
pub use events::{
    ChatMessage, ClientEvent, EventKind, RosterEntry, ServerEvent, SignalingEvent,
    DOMAIN_EVENT_KINDS,
};
pub use websocket::WebSocketTransport;
