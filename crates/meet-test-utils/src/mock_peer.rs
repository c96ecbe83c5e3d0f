//! In-memory peer network.
//!
//! Endpoints are keyed by peer server authority and peer id, so audio and
//! video registrations of the same user never see each other. A call
//! delivers `IncomingCall` to the target; answering delivers `Stream` to
//! both sides; closing either side delivers `Closed` to both. Calling an
//! unregistered peer yields `Error("peer-unavailable")` on the caller side.

use async_trait::async_trait;
use meet_client::config::PeerServerConfig;
use meet_client::errors::TransportError;
use meet_client::media::{
    CallChannel, ConnectionEvent, EndpointEvent, MediaConnection, MediaStream, PeerEndpoint,
    PeerIdentity, PeerTransport, RegisteredEndpoint,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const PEER_UNAVAILABLE: &str = "peer-unavailable";

type EndpointKey = (String, String);

struct EndpointSlot {
    events: mpsc::UnboundedSender<EndpointEvent>,
    disconnected: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
}

struct CallState {
    server: String,
    caller: PeerIdentity,
    callee: PeerIdentity,
    offer: MediaStream,
    closed: AtomicBool,
    answered: AtomicBool,
    caller_events: mpsc::UnboundedSender<ConnectionEvent>,
    callee_events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl CallState {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.caller_events.send(ConnectionEvent::Closed);
            let _ = self.callee_events.send(ConnectionEvent::Closed);
        }
    }

    fn involves(&self, server: &str, peer_id: &str) -> bool {
        self.server == server && (self.caller.as_str() == peer_id || self.callee.as_str() == peer_id)
    }
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<EndpointKey, EndpointSlot>,
    calls: Vec<Arc<CallState>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    registrations: Vec<EndpointKey>,
    /// (server, caller, target) of every call placed.
    placed: Vec<(String, String, String)>,
}

struct NetworkInner {
    state: Mutex<NetworkState>,
    next_call: AtomicUsize,
}

/// In-memory `PeerTransport`.
#[derive(Clone)]
pub struct MockPeerNetwork {
    inner: Arc<NetworkInner>,
}

impl MockPeerNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(NetworkInner {
                state: Mutex::new(NetworkState::default()),
                next_call: AtomicUsize::new(1),
            }),
        })
    }

    /// Registrations on `authority` fail with `ServerUnavailable`.
    pub fn fail_server(&self, authority: &str) {
        self.inner.state.lock().unwrap().failing.insert(authority.to_string());
    }

    /// Registrations on `authority` never complete.
    pub fn hang_server(&self, authority: &str) {
        self.inner.state.lock().unwrap().hanging.insert(authority.to_string());
    }

    /// Peer ids currently registered on `authority`, sorted.
    pub fn registered(&self, authority: &str) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .endpoints
            .keys()
            .filter(|(server, _)| server == authority)
            .map(|(_, peer)| peer.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Successful registrations on `authority` over the network's lifetime.
    pub fn registration_count(&self, authority: &str) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .registrations
            .iter()
            .filter(|(server, _)| server == authority)
            .count()
    }

    /// Calls placed on `authority`.
    pub fn calls_placed(&self, authority: &str) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .placed
            .iter()
            .filter(|(server, _, _)| server == authority)
            .count()
    }

    /// Calls placed by `caller` on `authority`.
    pub fn calls_from(&self, authority: &str, caller: &str) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .placed
            .iter()
            .filter(|(server, from, _)| server == authority && from == caller)
            .count()
    }

    /// Open calls (answered or not) on `authority`.
    pub fn open_calls(&self, authority: &str) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.server == authority && !call.closed.load(Ordering::SeqCst))
            .count()
    }

    /// The peer server kicks `peer_id`: its registration disappears and the
    /// endpoint observes `Closed`.
    pub fn drop_endpoint(&self, authority: &str, peer_id: &str) {
        let slot = self
            .inner
            .state
            .lock()
            .unwrap()
            .endpoints
            .remove(&(authority.to_string(), peer_id.to_string()));
        if let Some(slot) = slot {
            slot.destroyed.store(true, Ordering::SeqCst);
            let _ = slot.events.send(EndpointEvent::Closed);
        }
    }

    /// The endpoint loses the peer server but keeps its calls.
    pub fn disconnect_endpoint(&self, authority: &str, peer_id: &str) {
        let state = self.inner.state.lock().unwrap();
        if let Some(slot) = state
            .endpoints
            .get(&(authority.to_string(), peer_id.to_string()))
        {
            slot.disconnected.store(true, Ordering::SeqCst);
            let _ = slot.events.send(EndpointEvent::Disconnected);
        }
    }
}

#[async_trait]
impl PeerTransport for MockPeerNetwork {
    async fn register(
        &self,
        identity: PeerIdentity,
        server: &PeerServerConfig,
    ) -> Result<RegisteredEndpoint, TransportError> {
        let authority = server.authority();
        let hang = {
            let state = self.inner.state.lock().unwrap();
            if state.failing.contains(&authority) {
                return Err(TransportError::ServerUnavailable(authority));
            }
            state.hanging.contains(&authority)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let key = (authority.clone(), identity.as_str().to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        let disconnected = Arc::new(AtomicBool::new(false));
        let destroyed = Arc::new(AtomicBool::new(false));

        {
            let mut state = self.inner.state.lock().unwrap();
            if state.endpoints.contains_key(&key) {
                return Err(TransportError::IdentityTaken(identity.to_string()));
            }
            state.endpoints.insert(
                key.clone(),
                EndpointSlot {
                    events: tx,
                    disconnected: Arc::clone(&disconnected),
                    destroyed: Arc::clone(&destroyed),
                },
            );
            state.registrations.push(key);
        }

        let endpoint = MockEndpoint {
            identity,
            server: authority,
            network: Arc::clone(&self.inner),
            disconnected,
            destroyed,
        };

        Ok(RegisteredEndpoint {
            endpoint: Arc::new(endpoint),
            events: rx,
        })
    }
}

struct MockEndpoint {
    identity: PeerIdentity,
    server: String,
    network: Arc<NetworkInner>,
    disconnected: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
}

impl std::fmt::Debug for MockEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEndpoint")
            .field("identity", &self.identity)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl PeerEndpoint for MockEndpoint {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst) || self.destroyed.load(Ordering::SeqCst)
    }

    fn call(
        &self,
        target: &PeerIdentity,
        stream: &MediaStream,
    ) -> Result<CallChannel, TransportError> {
        if self.is_disconnected() {
            return Err(TransportError::EndpointClosed);
        }

        let id = self.network.next_call.fetch_add(1, Ordering::SeqCst);
        let (caller_tx, caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, callee_rx) = mpsc::unbounded_channel();

        let call = Arc::new(CallState {
            server: self.server.clone(),
            caller: self.identity.clone(),
            callee: target.clone(),
            offer: stream.clone(),
            closed: AtomicBool::new(false),
            answered: AtomicBool::new(false),
            caller_events: caller_tx,
            callee_events: callee_tx,
        });

        let outgoing = MockConnection {
            connection_id: format!("mock-call-{id}-out"),
            peer: target.clone(),
            outgoing: true,
            call: Arc::clone(&call),
        };
        let incoming = MockConnection {
            connection_id: format!("mock-call-{id}-in"),
            peer: self.identity.clone(),
            outgoing: false,
            call: Arc::clone(&call),
        };

        let mut state = self.network.state.lock().unwrap();
        state.placed.push((
            self.server.clone(),
            self.identity.as_str().to_string(),
            target.as_str().to_string(),
        ));

        let delivered = state
            .endpoints
            .get(&(self.server.clone(), target.as_str().to_string()))
            .is_some_and(|slot| {
                slot.events
                    .send(EndpointEvent::IncomingCall(CallChannel {
                        connection: Arc::new(incoming),
                        events: callee_rx,
                    }))
                    .is_ok()
            });

        if delivered {
            state.calls.push(Arc::clone(&call));
        } else {
            call.closed.store(true, Ordering::SeqCst);
            let _ = call
                .caller_events
                .send(ConnectionEvent::Error(PEER_UNAVAILABLE.to_string()));
        }

        Ok(CallChannel {
            connection: Arc::new(outgoing),
            events: caller_rx,
        })
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let calls: Vec<Arc<CallState>> = {
            let mut state = self.network.state.lock().unwrap();
            let key = (self.server.clone(), self.identity.as_str().to_string());
            if state
                .endpoints
                .get(&key)
                .is_some_and(|slot| Arc::ptr_eq(&slot.destroyed, &self.destroyed))
            {
                state.endpoints.remove(&key);
            }
            state
                .calls
                .iter()
                .filter(|call| call.involves(&self.server, self.identity.as_str()))
                .cloned()
                .collect()
        };

        for call in calls {
            call.close();
        }
    }
}

struct MockConnection {
    connection_id: String,
    peer: PeerIdentity,
    outgoing: bool,
    call: Arc<CallState>,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("connection_id", &self.connection_id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl MediaConnection for MockConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    fn answer(&self, stream: &MediaStream) -> Result<(), TransportError> {
        if self.outgoing {
            return Err(TransportError::CallFailed(
                "cannot answer an outgoing call".to_string(),
            ));
        }
        if self.call.closed.load(Ordering::SeqCst) {
            return Err(TransportError::CallFailed("call already closed".to_string()));
        }
        if self.call.answered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self
            .call
            .callee_events
            .send(ConnectionEvent::Stream(self.call.offer.clone()));
        let _ = self
            .call
            .caller_events
            .send(ConnectionEvent::Stream(stream.clone()));
        Ok(())
    }

    fn close(&self) {
        self.call.close();
    }
}
