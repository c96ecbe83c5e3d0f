//! `SignalingClient` - one cached, lazily connected signaling connection.
//!
//! The client holds at most one [`SignalingConnection`]. Creating it does
//! not connect; [`SignalingClient::connect`] starts a background task that
//! opens the transport, pumps frames between the transport and the event
//! bus, and reconnects with exponential backoff up to the configured number
//! of attempts.
//!
//! Emits issued before the link is up are queued and flushed once it is.
//! Nothing is acknowledged: an emit that races a transport loss is lost.
//! Closing flushes the queue into a live link; whatever could not be
//! flushed is reported back by [`SignalingClient::disconnect`].

use super::bus::EventBus;
use super::events::{ClientEvent, EventKind, ServerEvent, SignalingEvent, DOMAIN_EVENT_KINDS};
use crate::config::Config;
use crate::errors::SignalingError;
use crate::observability::metrics;

use async_trait::async_trait;
use common::secret::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long `close` waits for the connection task to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reason reported when the local side closes the connection.
pub const CLIENT_DISCONNECT_REASON: &str = "io client disconnect";

/// Transport flavours, in the order they should be tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a failure before giving up.
    pub attempts: u32,
    pub delay: Duration,
    pub delay_max: Duration,
}

impl ReconnectPolicy {
    /// Delay before the 1-based `attempt`: `delay * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.delay.saturating_mul(1_u32 << shift).min(self.delay_max)
    }
}

/// Options for opening a signaling transport.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub transports: Vec<TransportKind>,
    /// Send credentials with the upgrade request.
    pub with_credentials: bool,
    pub credentials: Option<SecretString>,
    pub reconnection: ReconnectPolicy,
    /// Bound on a single open, handshake included.
    pub timeout: Duration,
}

impl ConnectOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            with_credentials: true,
            credentials: None,
            reconnection: ReconnectPolicy {
                attempts: config.reconnection_attempts,
                delay: config.reconnection_delay,
                delay_max: config.reconnection_delay_max,
            },
            timeout: config.socket_timeout,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.credentials = Some(token);
        self
    }
}

/// An open transport link.
#[derive(Debug)]
pub struct SignalingLink {
    /// Server-assigned id of this connection.
    pub socket_id: String,
    pub outbound: mpsc::Sender<ClientEvent>,
    /// Ends when the transport closes.
    pub inbound: mpsc::Receiver<ServerEvent>,
}

/// Opens signaling links.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Opens a link and completes the server handshake.
    async fn open(&self, url: &str, options: &ConnectOptions)
        -> Result<SignalingLink, SignalingError>;
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, not started.
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Closed locally or out of reconnection attempts.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionStatus {
    state: LinkState,
    socket_id: Option<String>,
}

struct ConnectionInner {
    url: String,
    options: ConnectOptions,
    transport: Arc<dyn SignalingTransport>,
    bus: EventBus,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    /// Taken by the connection task when it starts.
    pending_outbound: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    status: watch::Sender<ConnectionStatus>,
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<Vec<&'static str>>>>,
}

impl ConnectionInner {
    fn set_status(&self, state: LinkState, socket_id: Option<String>) {
        self.status.send_replace(ConnectionStatus { state, socket_id });
    }
}

/// Shared handle to one signaling connection.
#[derive(Clone)]
pub struct SignalingConnection {
    inner: Arc<ConnectionInner>,
}

impl SignalingConnection {
    fn new(url: String, options: ConnectOptions, transport: Arc<dyn SignalingTransport>) -> Self {
        let (outbound, pending) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus {
            state: LinkState::Idle,
            socket_id: None,
        });

        Self {
            inner: Arc::new(ConnectionInner {
                url,
                options,
                transport,
                bus: EventBus::new(),
                outbound,
                pending_outbound: Mutex::new(Some(pending)),
                status,
                cancel_token: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.inner.status.borrow().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Socket id of the current link, if connected.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        self.inner.status.borrow().socket_id.clone()
    }

    pub async fn subscribe(&self, kind: EventKind) -> mpsc::UnboundedReceiver<SignalingEvent> {
        self.inner.bus.subscribe(kind).await
    }

    pub async fn remove_listeners(&self, kind: EventKind) -> usize {
        self.inner.bus.remove_listeners(kind).await
    }

    pub async fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.bus.listener_count(kind).await
    }

    /// Queue an event for the server.
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::Closed` once the connection is closed.
    pub fn emit(&self, event: ClientEvent) -> Result<(), SignalingError> {
        if self.state() == LinkState::Closed {
            return Err(SignalingError::Closed);
        }
        self.inner
            .outbound
            .send(event)
            .map_err(|_| SignalingError::Closed)
    }

    /// Wait until connected and return the socket id.
    ///
    /// # Errors
    ///
    /// - `SignalingError::Timeout` if not connected within `timeout`
    /// - `SignalingError::Closed` if the connection closed first
    pub async fn wait_connected(&self, timeout: Duration) -> Result<String, SignalingError> {
        let mut rx = self.inner.status.subscribe();
        let wait = async {
            rx.wait_for(|s| matches!(s.state, LinkState::Connected | LinkState::Closed))
                .await
                .map(|status| status.clone())
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(ConnectionStatus {
                state: LinkState::Connected,
                socket_id: Some(socket_id),
            })) => Ok(socket_id),
            Ok(_) => Err(SignalingError::Closed),
            Err(_) => Err(SignalingError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    /// Starts the connection task. Returns false if it was already started
    /// or the connection is closed.
    async fn start(&self) -> bool {
        let mut task = self.inner.task.lock().await;
        if task.is_some() || self.inner.cancel_token.is_cancelled() {
            return false;
        }
        let Some(outbound) = self.inner.pending_outbound.lock().await.take() else {
            return false;
        };

        *task = Some(tokio::spawn(run_connection(
            Arc::clone(&self.inner),
            outbound,
        )));
        true
    }

    /// Stops the connection task and returns the names of queued events
    /// that never reached a link.
    async fn close(&self) -> Vec<&'static str> {
        self.inner.cancel_token.cancel();

        let task = self.inner.task.lock().await.take();
        let undelivered = match task {
            Some(task) => match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
                Ok(Ok(undelivered)) => undelivered,
                Ok(Err(e)) => {
                    warn!(target: "meet.signaling", error = %e, "Signaling task failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(
                        target: "meet.signaling",
                        url = %self.inner.url,
                        "Signaling task did not stop in time"
                    );
                    Vec::new()
                }
            },
            // Never started: everything emitted is still queued
            None => match self.inner.pending_outbound.lock().await.take() {
                Some(mut outbound) => drain_names(&mut outbound),
                None => Vec::new(),
            },
        };

        self.inner.set_status(LinkState::Closed, None);
        undelivered
    }
}

enum LinkEnd {
    /// Carries events that could not be flushed.
    ClientClosed(Vec<&'static str>),
    TransportClosed(String),
}

#[instrument(skip_all, name = "meet.signaling.connection", fields(url = %inner.url))]
async fn run_connection(
    inner: Arc<ConnectionInner>,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
) -> Vec<&'static str> {
    let policy = inner.options.reconnection.clone();
    let timeout_ms = u64::try_from(inner.options.timeout.as_millis()).unwrap_or(u64::MAX);
    let mut attempt: u32 = 0;
    let mut ever_connected = false;
    let mut undelivered: Vec<&'static str> = Vec::new();

    loop {
        let state = if attempt == 0 {
            LinkState::Connecting
        } else {
            LinkState::Reconnecting
        };
        inner.set_status(state, None);

        let opened = tokio::select! {
            () = inner.cancel_token.cancelled() => break,
            opened = tokio::time::timeout(
                inner.options.timeout,
                inner.transport.open(&inner.url, &inner.options),
            ) => opened,
        };

        match opened {
            Ok(Ok(link)) => {
                let socket_id = link.socket_id.clone();
                inner.set_status(LinkState::Connected, Some(socket_id.clone()));

                debug!(target: "meet.signaling", socket_id = %socket_id, "Signaling connected");
                inner
                    .bus
                    .publish(SignalingEvent::Connected { socket_id })
                    .await;

                if ever_connected && attempt > 0 {
                    info!(target: "meet.signaling", attempt, "Signaling reconnected");
                    metrics::record_signaling_reconnect("success");
                    inner
                        .bus
                        .publish(SignalingEvent::Reconnected { attempt })
                        .await;
                }
                ever_connected = true;
                attempt = 0;

                match pump(&inner, link, &mut outbound).await {
                    LinkEnd::ClientClosed(lost) => {
                        undelivered.extend(lost);
                        debug!(target: "meet.signaling", "Signaling disconnected by client");
                        inner
                            .bus
                            .publish(SignalingEvent::Disconnected {
                                reason: CLIENT_DISCONNECT_REASON.to_string(),
                            })
                            .await;
                        break;
                    }
                    LinkEnd::TransportClosed(reason) => {
                        warn!(target: "meet.signaling", reason = %reason, "Signaling link lost");
                        inner
                            .bus
                            .publish(SignalingEvent::Disconnected { reason })
                            .await;
                    }
                }
            }
            Ok(Err(e)) => {
                debug!(target: "meet.signaling", error = %e, "Signaling connect error");
                inner
                    .bus
                    .publish(SignalingEvent::ConnectError {
                        message: e.to_string(),
                    })
                    .await;
            }
            Err(_) => {
                let e = SignalingError::Timeout(timeout_ms);
                debug!(target: "meet.signaling", error = %e, "Signaling connect error");
                inner
                    .bus
                    .publish(SignalingEvent::ConnectError {
                        message: e.to_string(),
                    })
                    .await;
            }
        }

        attempt += 1;
        if attempt > policy.attempts {
            warn!(
                target: "meet.signaling",
                attempts = policy.attempts,
                "Signaling reconnection attempts exhausted"
            );
            metrics::record_signaling_reconnect("exhausted");
            inner
                .bus
                .publish(SignalingEvent::ReconnectFailed {
                    attempts: policy.attempts,
                })
                .await;
            break;
        }

        let delay = policy.delay_for(attempt);
        debug!(
            target: "meet.signaling",
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Signaling reconnect attempt"
        );
        metrics::record_signaling_reconnect("attempt");
        inner
            .bus
            .publish(SignalingEvent::ReconnectAttempt { attempt })
            .await;

        tokio::select! {
            () = inner.cancel_token.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_status(LinkState::Closed, None);

    undelivered.extend(drain_names(&mut outbound));
    if !undelivered.is_empty() {
        warn!(
            target: "meet.signaling",
            events = ?undelivered,
            "Queued events dropped: no link at close"
        );
    }
    undelivered
}

/// Empties the queue, returning the wire names of what was in it.
fn drain_names(outbound: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<&'static str> {
    outbound.close();
    let mut names = Vec::new();
    while let Ok(event) = outbound.try_recv() {
        names.push(event.name());
    }
    names
}

/// Hands every queued event to the link before it is dropped. Returns the
/// names of events the link refused.
async fn flush(
    link_tx: &mpsc::Sender<ClientEvent>,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> Vec<&'static str> {
    while let Ok(event) = outbound.try_recv() {
        let name = event.name();
        if link_tx.send(event).await.is_err() {
            warn!(target: "meet.signaling", event = name, "Flush stopped: transport closed");
            let mut lost = vec![name];
            lost.extend(drain_names(outbound));
            return lost;
        }
        debug!(target: "meet.signaling", event = name, "Event flushed on close");
    }
    Vec::new()
}

async fn pump(
    inner: &ConnectionInner,
    link: SignalingLink,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> LinkEnd {
    let SignalingLink {
        outbound: link_tx,
        mut inbound,
        ..
    } = link;

    loop {
        tokio::select! {
            () = inner.cancel_token.cancelled() => {
                return LinkEnd::ClientClosed(flush(&link_tx, outbound).await);
            }

            event = outbound.recv() => {
                let Some(event) = event else {
                    return LinkEnd::ClientClosed(Vec::new());
                };
                let name = event.name();
                if link_tx.send(event).await.is_err() {
                    warn!(target: "meet.signaling", event = name, "Emit lost: transport closed");
                    return LinkEnd::TransportClosed("transport error".to_string());
                }
                debug!(target: "meet.signaling", event = name, "Event emitted");
            }

            frame = inbound.recv() => {
                let Some(event) = frame else {
                    return LinkEnd::TransportClosed("transport close".to_string());
                };
                let event = SignalingEvent::Server(event);
                let event_kind = event.kind();
                let delivered = inner.bus.publish(event).await;
                debug!(
                    target: "meet.signaling",
                    event = ?event_kind,
                    delivered,
                    "Server event dispatched"
                );
            }
        }
    }
}

/// Owner of the cached signaling connection.
pub struct SignalingClient {
    url: String,
    options: ConnectOptions,
    transport: Arc<dyn SignalingTransport>,
    connection: Mutex<Option<SignalingConnection>>,
}

impl SignalingClient {
    pub fn new(
        url: impl Into<String>,
        options: ConnectOptions,
        transport: Arc<dyn SignalingTransport>,
    ) -> Self {
        Self {
            url: url.into(),
            options,
            transport,
            connection: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The cached connection, created (not connected) if absent.
    pub async fn connection(&self) -> SignalingConnection {
        let mut cached = self.connection.lock().await;
        cached
            .get_or_insert_with(|| {
                debug!(target: "meet.signaling", url = %self.url, "Creating signaling connection");
                SignalingConnection::new(
                    self.url.clone(),
                    self.options.clone(),
                    Arc::clone(&self.transport),
                )
            })
            .clone()
    }

    /// Start connecting if not already started. Idempotent.
    pub async fn connect(&self) -> SignalingConnection {
        let connection = self.connection().await;
        if connection.start().await {
            debug!(target: "meet.signaling", url = %self.url, "Signaling connection task started");
        }
        connection
    }

    /// Remove domain listeners, close the transport, forget the connection.
    ///
    /// Queued events are flushed into a live link first. Returns the wire
    /// names of events that never reached one, oldest first.
    pub async fn disconnect(&self) -> Vec<&'static str> {
        let Some(connection) = self.connection.lock().await.take() else {
            debug!(target: "meet.signaling", "Disconnect ignored: no connection");
            return Vec::new();
        };

        for kind in DOMAIN_EVENT_KINDS {
            connection.remove_listeners(kind).await;
        }
        let undelivered = connection.close().await;

        info!(
            target: "meet.signaling",
            url = %self.url,
            undelivered = undelivered.len(),
            "Signaling disconnected"
        );
        undelivered
    }

    /// Close and forget the connection without removing listeners first.
    pub async fn reset(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            let _ = connection.close().await;
        }
    }

    pub async fn has_connection(&self) -> bool {
        self.connection.lock().await.is_some()
    }
}
