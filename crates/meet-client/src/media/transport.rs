//! Peer transport seam.
//!
//! The real-time transport (ICE, codecs, encryption) is a platform black
//! box. These traits cover only what the channel manager needs from it:
//! register under an identity, place and answer calls, and observe call and
//! endpoint events. Events arrive on unbounded mpsc receivers so the
//! manager can forward them into its own mailbox.

use super::identity::PeerIdentity;
use super::stream::MediaStream;
use crate::config::PeerServerConfig;
use crate::errors::TransportError;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events on a single call.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The remote side's media arrived.
    Stream(MediaStream),
    Closed,
    Error(String),
}

impl ConnectionEvent {
    /// `Closed` and `Error` end the call.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnectionEvent::Stream(_))
    }
}

/// One call between two endpoints, seen from the local side.
pub trait MediaConnection: Send + Sync + fmt::Debug {
    /// Unique per call, used to tell a live call from a replaced one.
    fn connection_id(&self) -> &str;

    /// Identity of the remote endpoint.
    fn peer(&self) -> &PeerIdentity;

    /// Accepts an incoming call, offering `stream`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::CallFailed` if the call is already gone.
    fn answer(&self, stream: &MediaStream) -> Result<(), TransportError>;

    fn close(&self);
}

/// A call plus its event feed.
#[derive(Debug)]
pub struct CallChannel {
    pub connection: Arc<dyn MediaConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Events on a registered endpoint.
#[derive(Debug)]
pub enum EndpointEvent {
    IncomingCall(CallChannel),
    /// Lost the peer server; existing calls may survive.
    Disconnected,
    /// The endpoint is gone for good.
    Closed,
    Error(String),
}

/// The local side of a registration.
pub trait PeerEndpoint: Send + Sync + fmt::Debug {
    fn identity(&self) -> &PeerIdentity;

    fn is_disconnected(&self) -> bool;

    /// Places a call to `target`, offering `stream`.
    ///
    /// Success means the call was placed, not that it connected; the
    /// outcome arrives on the returned channel's events.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the endpoint cannot place calls.
    fn call(&self, target: &PeerIdentity, stream: &MediaStream)
        -> Result<CallChannel, TransportError>;

    /// Unregisters and closes every call on this endpoint.
    fn destroy(&self);
}

/// Result of a successful registration.
#[derive(Debug)]
pub struct RegisteredEndpoint {
    pub endpoint: Arc<dyn PeerEndpoint>,
    pub events: mpsc::UnboundedReceiver<EndpointEvent>,
}

/// Factory for endpoints on a peer server.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Registers `identity` on `server`; resolves once the server accepted it.
    async fn register(
        &self,
        identity: PeerIdentity,
        server: &PeerServerConfig,
    ) -> Result<RegisteredEndpoint, TransportError>;
}
