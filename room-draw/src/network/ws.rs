//! WebSocket Relay Client
//!
//! Speaks the relay frame protocol to a `RelayServer`. One connection
//! carries every topic; a reader task fans deliveries out to the local
//! subscriptions by topic, a writer task drains outgoing frames.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::network::protocol::{
    Envelope, ErrorCode, PeerTag, RelayErrorFrame, RelayNotice, RelayRequest,
};
use crate::network::relay::{
    ChannelEvent, RelayChannel, RelayError, SubscribeOptions, Subscription, SubscriptionId,
};

struct WsRoute {
    id: SubscriptionId,
    acked: bool,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

type Routes = Arc<Mutex<BTreeMap<String, Vec<WsRoute>>>>;

fn lock(routes: &Routes) -> MutexGuard<'_, BTreeMap<String, Vec<WsRoute>>> {
    routes.lock().unwrap_or_else(|e| e.into_inner())
}

/// Relay channel over a WebSocket connection.
pub struct WsRelay {
    peer: PeerTag,
    server_version: String,
    outgoing: mpsc::UnboundedSender<RelayRequest>,
    routes: Routes,
    connected: Arc<AtomicBool>,
    next_subscription: SubscriptionId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsRelay {
    /// Connect and wait for the relay's greeting.
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (peer, server_version) = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match RelayNotice::from_json(&text) {
                    Ok(RelayNotice::Welcome { peer, server_version }) => break (peer, server_version),
                    Ok(other) => {
                        return Err(RelayError::Handshake(format!("unexpected {:?}", other)));
                    }
                    Err(e) => return Err(RelayError::Handshake(e.to_string())),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(RelayError::Handshake("closed before welcome".to_string()));
                }
                Some(Err(e)) => return Err(RelayError::Connect(e)),
                _ => {}
            }
        };
        info!("Connected to relay {} as peer {} (server {})", url, peer, server_version);

        let routes: Routes = Arc::new(Mutex::new(BTreeMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<RelayRequest>();

        let writer_connected = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(request) = outgoing_rx.recv().await {
                let text = match request.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    error!("Failed to send frame: {}", e);
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
            let _ = write.close().await;
        });

        let reader_routes = routes.clone();
        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match RelayNotice::from_json(&text) {
                        Ok(RelayNotice::Shutdown { reason }) => {
                            info!("Relay shutting down: {}", reason);
                            break;
                        }
                        Ok(notice) => Self::dispatch(&reader_routes, notice),
                        Err(e) => warn!("Failed to parse relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Relay closed connection");
                        break;
                    }
                    Err(e) => {
                        error!("Relay read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            reader_connected.store(false, Ordering::SeqCst);
            let mut routes = lock(&reader_routes);
            for route in routes.values().flatten() {
                let _ = route.tx.send(ChannelEvent::Closed);
            }
            routes.clear();
        });

        Ok(Self {
            peer,
            server_version,
            outgoing,
            routes,
            connected,
            next_subscription: 0,
            reader,
            writer,
        })
    }

    /// Version string the relay announced.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn dispatch(routes: &Routes, notice: RelayNotice) {
        match notice {
            RelayNotice::Subscribed { topic } => {
                let mut routes = lock(routes);
                for route in routes.get_mut(&topic).into_iter().flatten() {
                    if !route.acked {
                        route.acked = true;
                        let _ = route.tx.send(ChannelEvent::Subscribed);
                    }
                }
            }
            RelayNotice::Delivery { topic, sender, envelope } => {
                let routes = lock(routes);
                for route in routes.get(&topic).into_iter().flatten() {
                    let _ = route.tx.send(ChannelEvent::Delivery {
                        sender,
                        envelope: envelope.clone(),
                    });
                }
            }
            RelayNotice::Unsubscribed { topic } => debug!("Unsubscribed from {}", topic),
            RelayNotice::Pong { timestamp, server_time } => {
                debug!("Pong {} (server time {})", timestamp, server_time);
            }
            RelayNotice::Error(RelayErrorFrame {
                code: ErrorCode::TooManyTopics,
                message,
                topic: Some(topic),
            }) => {
                warn!("Relay refused subscription to {}: {}", topic, message);
                let mut routes = lock(routes);
                if let Some(entry) = routes.get_mut(&topic) {
                    // Only pending routes were waiting on this subscribe
                    entry.retain(|route| {
                        if !route.acked {
                            let _ = route.tx.send(ChannelEvent::Closed);
                        }
                        route.acked
                    });
                    if entry.is_empty() {
                        routes.remove(&topic);
                    }
                }
            }
            RelayNotice::Error(frame) => warn!("Relay error {:?}: {}", frame.code, frame.message),
            RelayNotice::Welcome { .. } | RelayNotice::Shutdown { .. } => {}
        }
    }

    fn push(&self, request: RelayRequest) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Disconnected);
        }
        self.outgoing.send(request).map_err(|_| RelayError::Disconnected)
    }
}

impl RelayChannel for WsRelay {
    fn peer(&self) -> PeerTag {
        self.peer
    }

    fn subscribe(&mut self, topic: &str, options: SubscribeOptions) -> Result<Subscription, RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Disconnected);
        }

        self.next_subscription += 1;
        let id = self.next_subscription;
        let (tx, rx) = mpsc::unbounded_channel();

        let first = {
            let mut routes = lock(&self.routes);
            let entry = routes.entry(topic.to_string()).or_default();
            let first = entry.is_empty();
            let acked = entry.iter().any(|r| r.acked);
            if acked {
                let _ = tx.send(ChannelEvent::Subscribed);
            }
            entry.push(WsRoute { id, acked, tx });
            first
        };

        if first {
            self.push(RelayRequest::Subscribe {
                topic: topic.to_string(),
                echo_self: options.echo_self,
            })?;
        }
        Ok(Subscription::new(id, topic, rx))
    }

    fn send(&mut self, subscription: &Subscription, envelope: Envelope) -> Result<(), RelayError> {
        let known = lock(&self.routes)
            .get(subscription.topic())
            .map(|routes| routes.iter().any(|r| r.id == subscription.id()))
            .unwrap_or(false);
        if !known {
            return Err(if self.is_connected() {
                RelayError::UnknownSubscription(subscription.id())
            } else {
                RelayError::Disconnected
            });
        }

        self.push(RelayRequest::Publish {
            topic: subscription.topic().to_string(),
            envelope,
        })
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        let topic = subscription.topic().to_string();
        let last = {
            let mut routes = lock(&self.routes);
            match routes.get_mut(&topic) {
                Some(entry) => {
                    entry.retain(|r| r.id != subscription.id());
                    let empty = entry.is_empty();
                    if empty {
                        routes.remove(&topic);
                    }
                    empty
                }
                None => false,
            }
        };

        if last {
            if let Err(e) = self.push(RelayRequest::Unsubscribe { topic }) {
                debug!("Unsubscribe not sent: {}", e);
            }
        }
    }
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
