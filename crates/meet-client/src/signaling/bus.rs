//! Typed fan-out of signaling events.

use super::events::{EventKind, SignalingEvent};

use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// Per-kind subscriber lists.
///
/// Each published event is delivered at most once to each live subscriber
/// of its kind. Subscribers whose receiver was dropped are pruned on the
/// next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<mpsc::UnboundedSender<SignalingEvent>>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, kind: EventKind) -> mpsc::UnboundedReceiver<SignalingEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().await.entry(kind).or_default().push(tx);
        rx
    }

    /// Drops every subscriber of `kind`; their receivers see end-of-stream.
    /// Returns how many were removed.
    pub async fn remove_listeners(&self, kind: EventKind) -> usize {
        self.listeners
            .write()
            .await
            .remove(&kind)
            .map_or(0, |senders| senders.len())
    }

    /// Returns how many subscribers received the event.
    pub async fn publish(&self, event: SignalingEvent) -> usize {
        let kind = event.kind();
        let mut listeners = self.listeners.write().await;
        let Some(senders) = listeners.get_mut(&kind) else {
            return 0;
        };

        senders.retain(|tx| tx.send(event.clone()).is_ok());
        senders.len()
    }

    /// Live subscribers of `kind`.
    pub async fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .await
            .get(&kind)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signaling::events::ServerEvent;

    fn error_event(message: &str) -> SignalingEvent {
        SignalingEvent::Server(ServerEvent::ServerError {
            message: message.to_string(),
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_each_subscriber_once() {
        let bus = EventBus::new();
        let mut first = bus.subscribe(EventKind::ServerError).await;
        let mut second = bus.subscribe(EventKind::ServerError).await;

        assert_eq!(bus.publish(error_event("boom")).await, 2);

        assert_eq!(first.recv().await.unwrap(), error_event("boom"));
        assert_eq!(second.recv().await.unwrap(), error_event("boom"));
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_only_matching_kind() {
        let bus = EventBus::new();
        let mut roster = bus.subscribe(EventKind::UsersOnline).await;

        assert_eq!(bus.publish(error_event("ignored")).await, 0);
        assert!(roster.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_listeners_ends_streams() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventKind::NewMessage).await;

        assert_eq!(bus.remove_listeners(EventKind::NewMessage).await, 1);
        assert!(rx.recv().await.is_none());
        assert_eq!(bus.listener_count(EventKind::NewMessage).await, 0);
        assert_eq!(bus.remove_listeners(EventKind::NewMessage).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(EventKind::ServerError).await;
        let _kept = bus.subscribe(EventKind::ServerError).await;
        drop(rx);

        assert_eq!(bus.listener_count(EventKind::ServerError).await, 1);
        assert_eq!(bus.publish(error_event("x")).await, 1);
    }
}
