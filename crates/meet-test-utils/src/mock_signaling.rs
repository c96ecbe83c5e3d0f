//! In-memory signaling server.
//!
//! Each successful `open` creates one link with socket id `socket-N`.
//! Everything clients emit is recorded in order.

use async_trait::async_trait;
use meet_client::errors::SignalingError;
use meet_client::signaling::{
    ClientEvent, ConnectOptions, ServerEvent, SignalingLink, SignalingTransport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const LINK_BUFFER: usize = 64;

struct Link {
    socket_id: String,
    to_client: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct ServerState {
    links: Vec<Link>,
    sent: Vec<(String, ClientEvent)>,
    fail_next: usize,
    refuse_all: bool,
    credentials_seen: Vec<bool>,
}

/// In-memory `SignalingTransport`.
#[derive(Clone)]
pub struct MockSignalingServer {
    state: Arc<Mutex<ServerState>>,
    opens: Arc<AtomicUsize>,
}

impl MockSignalingServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(ServerState::default())),
            opens: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The next `count` opens fail with `Connect`.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    /// Every open fails until `accept_opens`.
    pub fn refuse_opens(&self) {
        self.state.lock().unwrap().refuse_all = true;
    }

    pub fn accept_opens(&self) {
        self.state.lock().unwrap().refuse_all = false;
    }

    /// Open attempts, successful or not.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Whether each successful open carried a token.
    pub fn credentials_seen(&self) -> Vec<bool> {
        self.state.lock().unwrap().credentials_seen.clone()
    }

    /// Socket ids of live links.
    pub fn live_links(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .links
            .iter()
            .filter(|link| !link.to_client.is_closed())
            .map(|link| link.socket_id.clone())
            .collect()
    }

    /// Push `event` to every live link.
    pub async fn broadcast(&self, event: ServerEvent) {
        let senders: Vec<mpsc::Sender<ServerEvent>> = self
            .state
            .lock()
            .unwrap()
            .links
            .iter()
            .map(|link| link.to_client.clone())
            .collect();
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    /// Push `event` to one link.
    pub async fn send_to(&self, socket_id: &str, event: ServerEvent) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|link| link.socket_id == socket_id)
            .map(|link| link.to_client.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Server-side close of every link.
    pub fn drop_links(&self) {
        self.state.lock().unwrap().links.clear();
    }

    /// Everything clients emitted, in arrival order.
    pub fn sent_events(&self) -> Vec<ClientEvent> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Wire names of everything clients emitted.
    pub fn sent_event_names(&self) -> Vec<&'static str> {
        self.sent_events().iter().map(ClientEvent::name).collect()
    }

    /// Events emitted over the link with `socket_id`.
    pub fn sent_by(&self, socket_id: &str) -> Vec<ClientEvent> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(from, _)| from == socket_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl SignalingTransport for MockSignalingServer {
    async fn open(
        &self,
        _url: &str,
        options: &ConnectOptions,
    ) -> Result<SignalingLink, SignalingError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut state = self.state.lock().unwrap();
            if state.refuse_all {
                return Err(SignalingError::Connect("connection refused".to_string()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SignalingError::Connect("connection refused".to_string()));
            }
        }

        let socket_id = format!("socket-{n}");
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(LINK_BUFFER);

        {
            let mut state = self.state.lock().unwrap();
            state.links.push(Link {
                socket_id: socket_id.clone(),
                to_client: inbound_tx,
            });
            state
                .credentials_seen
                .push(options.with_credentials && options.credentials.is_some());
        }

        let recorder = Arc::clone(&self.state);
        let from = socket_id.clone();
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                recorder.lock().unwrap().sent.push((from.clone(), event));
            }
        });

        Ok(SignalingLink {
            socket_id,
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
