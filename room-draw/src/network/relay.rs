//! Relay Channel
//!
//! Best-effort pub/sub over named topics. A relay forwards each envelope to
//! whoever is subscribed to the topic right now; it keeps no history and
//! never retries.
//!
//! Two implementations ship: [`LocalRelay`] (in-process, backed by a
//! [`LocalHub`]) and `WsRelay` (WebSocket client for the relay server).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::protocol::{Envelope, PeerTag};

/// Identifier of one subscription on one relay handle.
pub type SubscriptionId = u64;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The transport is gone.
    #[error("Relay disconnected")]
    Disconnected,

    /// The subscription was already torn down.
    #[error("Unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// Envelope could not be encoded.
    #[error("Encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Connection setup failed.
    #[error("Connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay closed before greeting.
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Per-subscription options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Deliver this handle's own sends back to it.
    pub echo_self: bool,
}

/// Event observed on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The relay acknowledged the subscription.
    Subscribed,
    /// A message published on the topic.
    Delivery {
        /// Relay tag of the publisher.
        sender: PeerTag,
        /// Message.
        envelope: Envelope,
    },
    /// The transport went away; nothing more will arrive.
    Closed,
}

/// A live subscription. Dropping it stops local delivery.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    /// Wrap a receiver.
    pub fn new(
        id: SubscriptionId,
        topic: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self { id, topic: topic.into(), events }
    }

    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event if one is queued.
    pub fn try_next(&mut self) -> Option<ChannelEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event. `None` once the relay dropped the sender.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

/// A relay channel as seen by one peer.
pub trait RelayChannel: Send {
    /// This handle's tag, as stamped on its outgoing deliveries.
    fn peer(&self) -> PeerTag;

    /// Subscribe to a topic. Acknowledged by a [`ChannelEvent::Subscribed`].
    fn subscribe(&mut self, topic: &str, options: SubscribeOptions) -> Result<Subscription, RelayError>;

    /// Publish on the subscription's topic. Fire-and-forget.
    fn send(&mut self, subscription: &Subscription, envelope: Envelope) -> Result<(), RelayError>;

    /// Stop a subscription. Sends no message to peers.
    fn unsubscribe(&mut self, subscription: Subscription);
}

impl<T: RelayChannel + ?Sized> RelayChannel for Box<T> {
    fn peer(&self) -> PeerTag {
        (**self).peer()
    }

    fn subscribe(&mut self, topic: &str, options: SubscribeOptions) -> Result<Subscription, RelayError> {
        (**self).subscribe(topic, options)
    }

    fn send(&mut self, subscription: &Subscription, envelope: Envelope) -> Result<(), RelayError> {
        (**self).send(subscription, envelope)
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        (**self).unsubscribe(subscription)
    }
}

// =============================================================================
// IN-PROCESS HUB
// =============================================================================

struct HubRoute {
    id: SubscriptionId,
    peer: PeerTag,
    echo_self: bool,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct HubInner {
    next_peer: PeerTag,
    next_subscription: SubscriptionId,
    topics: BTreeMap<String, Vec<HubRoute>>,
    offline: BTreeSet<PeerTag>,
}

/// In-process relay shared by several [`LocalRelay`] handles.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LocalHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new handle with a fresh peer tag.
    pub fn connect(&self) -> LocalRelay {
        let mut inner = self.lock();
        inner.next_peer += 1;
        LocalRelay { hub: self.clone(), peer: inner.next_peer }
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }

    /// Number of subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map(Vec::len).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One peer's handle on a [`LocalHub`].
#[derive(Clone)]
pub struct LocalRelay {
    hub: LocalHub,
    peer: PeerTag,
}

impl LocalRelay {
    /// Simulate losing or regaining the transport.
    ///
    /// Going offline closes every subscription this handle holds.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.hub.lock();
        if online {
            inner.offline.remove(&self.peer);
            return;
        }

        inner.offline.insert(self.peer);
        let peer = self.peer;
        for routes in inner.topics.values_mut() {
            for route in routes.iter().filter(|r| r.peer == peer) {
                let _ = route.tx.send(ChannelEvent::Closed);
            }
            routes.retain(|r| r.peer != peer);
        }
        inner.topics.retain(|_, routes| !routes.is_empty());
        debug!("Local peer {} offline", peer);
    }

    /// Whether this handle can currently reach the hub.
    pub fn is_online(&self) -> bool {
        !self.hub.lock().offline.contains(&self.peer)
    }
}

impl RelayChannel for LocalRelay {
    fn peer(&self) -> PeerTag {
        self.peer
    }

    fn subscribe(&mut self, topic: &str, options: SubscribeOptions) -> Result<Subscription, RelayError> {
        let mut inner = self.hub.lock();
        if inner.offline.contains(&self.peer) {
            return Err(RelayError::Disconnected);
        }

        inner.next_subscription += 1;
        let id = inner.next_subscription;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ChannelEvent::Subscribed);

        inner.topics.entry(topic.to_string()).or_default().push(HubRoute {
            id,
            peer: self.peer,
            echo_self: options.echo_self,
            tx,
        });

        debug!("Local peer {} subscribed to {} ({})", self.peer, topic, id);
        Ok(Subscription::new(id, topic, rx))
    }

    fn send(&mut self, subscription: &Subscription, envelope: Envelope) -> Result<(), RelayError> {
        let inner = self.hub.lock();
        if inner.offline.contains(&self.peer) {
            return Err(RelayError::Disconnected);
        }

        let routes = inner.topics
            .get(subscription.topic())
            .ok_or(RelayError::UnknownSubscription(subscription.id()))?;
        let own = routes
            .iter()
            .find(|r| r.id == subscription.id())
            .ok_or(RelayError::UnknownSubscription(subscription.id()))?;
        let echo_self = own.echo_self;

        for route in routes {
            if route.peer == self.peer && !echo_self {
                continue;
            }
            let _ = route.tx.send(ChannelEvent::Delivery {
                sender: self.peer,
                envelope: envelope.clone(),
            });
        }
        Ok(())
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        let mut inner = self.hub.lock();
        let topic = subscription.topic().to_string();
        if let Some(routes) = inner.topics.get_mut(&topic) {
            routes.retain(|r| r.id != subscription.id());
            if routes.is_empty() {
                inner.topics.remove(&topic);
            }
        }
        debug!("Local peer {} unsubscribed from {}", self.peer, topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(n: u32) -> Envelope {
        Envelope::new("roll", json!({ "ordinal": n, "id": "x" }))
    }

    #[test]
    fn test_subscribe_is_acknowledged() {
        let hub = LocalHub::new();
        let mut relay = hub.connect();

        let mut sub = relay.subscribe("t", SubscribeOptions::default()).unwrap();
        assert_eq!(sub.try_next(), Some(ChannelEvent::Subscribed));
        assert_eq!(sub.try_next(), None);
        assert_eq!(hub.subscriber_count("t"), 1);
    }

    #[test]
    fn test_delivery_skips_sender_without_echo() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();

        let mut sub_a = a.subscribe("t", SubscribeOptions::default()).unwrap();
        let mut sub_b = b.subscribe("t", SubscribeOptions::default()).unwrap();
        sub_a.try_next();
        sub_b.try_next();

        a.send(&sub_a, envelope(1)).unwrap();

        assert_eq!(sub_a.try_next(), None);
        assert_eq!(
            sub_b.try_next(),
            Some(ChannelEvent::Delivery { sender: a.peer(), envelope: envelope(1) })
        );
    }

    #[test]
    fn test_echo_self_delivers_back() {
        let hub = LocalHub::new();
        let mut a = hub.connect();

        let mut sub = a.subscribe("t", SubscribeOptions { echo_self: true }).unwrap();
        sub.try_next();
        a.send(&sub, envelope(2)).unwrap();

        match sub.try_next() {
            Some(ChannelEvent::Delivery { sender, .. }) => assert_eq!(sender, a.peer()),
            other => panic!("Expected echo, got {:?}", other),
        }
    }

    #[test]
    fn test_topics_are_isolated() {
        let hub = LocalHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();

        let sub_a = a.subscribe("one", SubscribeOptions::default()).unwrap();
        let mut sub_b = b.subscribe("two", SubscribeOptions::default()).unwrap();
        sub_b.try_next();

        a.send(&sub_a, envelope(1)).unwrap();
        assert_eq!(sub_b.try_next(), None);
    }

    #[test]
    fn test_unsubscribe_drops_empty_topic() {
        let hub = LocalHub::new();
        let mut a = hub.connect();

        let sub = a.subscribe("t", SubscribeOptions::default()).unwrap();
        assert_eq!(hub.topic_count(), 1);

        a.unsubscribe(sub);
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_offline_closes_and_rejects() {
        let hub = LocalHub::new();
        let mut a = hub.connect();

        let mut sub = a.subscribe("t", SubscribeOptions::default()).unwrap();
        sub.try_next();

        a.set_online(false);
        assert!(!a.is_online());
        assert_eq!(sub.try_next(), Some(ChannelEvent::Closed));
        assert!(matches!(a.send(&sub, envelope(1)), Err(RelayError::Disconnected)));
        assert!(matches!(
            a.subscribe("t", SubscribeOptions::default()),
            Err(RelayError::Disconnected)
        ));

        a.set_online(true);
        assert!(a.subscribe("t", SubscribeOptions::default()).is_ok());
    }

    #[test]
    fn test_boxed_relay_is_a_relay() {
        let hub = LocalHub::new();
        let mut boxed: Box<dyn RelayChannel> = Box::new(hub.connect());
        let mut sub = boxed.subscribe("t", SubscribeOptions::default()).unwrap();
        assert_eq!(sub.try_next(), Some(ChannelEvent::Subscribed));
    }
}
