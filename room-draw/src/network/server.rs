//! WebSocket Relay Server
//!
//! Async WebSocket server that forwards published envelopes to the current
//! subscribers of a topic. Keeps no history and no room state.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::network::protocol::{
    ErrorCode, PeerTag, RelayErrorFrame, RelayNotice, RelayRequest,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum topics one peer may hold.
    pub max_topics_per_peer: usize,
    /// Per-peer outbound queue; deliveries beyond it are dropped.
    pub outbound_buffer: usize,
    /// WebSocket handshake timeout.
    pub handshake_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            max_connections: 1000,
            max_topics_per_peer: 16,
            outbound_buffer: 256,
            handshake_timeout: Duration::from_secs(10),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RelayServerConfig {
    /// Defaults overridden by `RELAY_BIND_ADDR` and `RELAY_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RELAY_BIND_ADDR") {
            match addr.parse() {
                Ok(addr) => config.bind_addr = addr,
                Err(e) => warn!("Ignoring RELAY_BIND_ADDR {:?}: {}", addr, e),
            }
        }
        if let Ok(max) = std::env::var("RELAY_MAX_CONNECTIONS") {
            match max.parse() {
                Ok(max) => config.max_connections = max,
                Err(e) => warn!("Ignoring RELAY_MAX_CONNECTIONS {:?}: {}", max, e),
            }
        }

        config
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Connected peer state.
struct ConnectedPeer {
    /// Remote address.
    addr: SocketAddr,
    /// Subscribed topics and whether each echoes to this peer.
    topics: BTreeMap<String, bool>,
    /// Connection time.
    connected_at: Instant,
    /// Outbound frame queue.
    sender: mpsc::Sender<RelayNotice>,
}

/// Peers and topic membership.
#[derive(Default)]
struct Registry {
    peers: BTreeMap<PeerTag, ConnectedPeer>,
    topics: BTreeMap<String, BTreeSet<PeerTag>>,
}

impl Registry {
    fn unsubscribe(&mut self, peer: PeerTag, topic: &str) -> bool {
        let was = self.peers
            .get_mut(&peer)
            .map(|p| p.topics.remove(topic).is_some())
            .unwrap_or(false);
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(&peer);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
        was
    }

    fn remove_peer(&mut self, peer: PeerTag) -> Option<ConnectedPeer> {
        let topics: Vec<String> = self.peers
            .get(&peer)
            .map(|p| p.topics.keys().cloned().collect())
            .unwrap_or_default();
        for topic in topics {
            self.unsubscribe(peer, &topic);
        }
        self.peers.remove(&peer)
    }
}

/// The relay server.
pub struct RelayServer {
    /// Server configuration.
    config: RelayServerConfig,
    /// Connected peers and topics.
    registry: Arc<RwLock<Registry>>,
    /// Last assigned peer tag.
    next_peer: Arc<AtomicU64>,
    /// One permit per open socket, taken at accept time.
    slots: Arc<Semaphore>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn error_frame(code: ErrorCode, message: &str) -> RelayNotice {
    RelayNotice::Error(RelayErrorFrame { code, message: message.to_string(), topic: None })
}

fn topic_error(code: ErrorCode, topic: &str, message: &str) -> RelayNotice {
    RelayNotice::Error(RelayErrorFrame {
        code,
        message: message.to_string(),
        topic: Some(topic.to_string()),
    })
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: RelayServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let slots = Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS)));

        Self {
            config,
            registry: Arc::new(RwLock::new(Registry::default())),
            next_peer: Arc::new(AtomicU64::new(0)),
            slots,
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &RelayServerConfig {
        &self.config
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, RelayServerError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        info!("Relay server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Handshakes in flight hold a slot too
                            let Ok(slot) = self.slots.clone().try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr, slot);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, slot: OwnedSemaphorePermit) {
        let registry = self.registry.clone();
        let config = self.config.clone();
        let peer = self.next_peer.fetch_add(1, Ordering::SeqCst) + 1;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let ws_stream = match timeout(config.handshake_timeout, accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!("WebSocket handshake timed out for {}", addr);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<RelayNotice>(config.outbound_buffer.max(1));

            // Register peer
            {
                let mut registry = registry.write().await;
                registry.peers.insert(peer, ConnectedPeer {
                    addr,
                    topics: BTreeMap::new(),
                    connected_at: Instant::now(),
                    sender: msg_tx.clone(),
                });
            }

            // Spawn frame sender task
            let sender_task = tokio::spawn(async move {
                while let Some(notice) = msg_rx.recv().await {
                    let text = match notice.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize frame: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let _ = msg_tx.send(RelayNotice::Welcome {
                peer,
                server_version: config.version.clone(),
            }).await;

            // Handle incoming frames
            loop {
                tokio::select! {
                    frame = ws_receiver.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match RelayRequest::from_json(&text) {
                                    Ok(request) => {
                                        if let Some(reply) = Self::handle_request(
                                            peer,
                                            request,
                                            &registry,
                                            &config,
                                        ).await {
                                            let _ = msg_tx.send(reply).await;
                                        }
                                    }
                                    Err(e) => {
                                        debug!("Invalid frame from {}: {}", addr, e);
                                        let _ = msg_tx.send(error_frame(
                                            ErrorCode::InvalidFrame,
                                            "Invalid frame format",
                                        )).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Peer {} disconnected", peer);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(RelayNotice::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Remove peer, then let the sender flush what is queued
            let removed = registry.write().await.remove_peer(peer);
            drop(msg_tx);
            if timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Sender for peer {} did not drain in time", peer);
            }

            if let Some(client) = removed {
                info!(
                    "Peer {} ({}) cleaned up after {:?}",
                    peer,
                    client.addr,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle one request frame. Returns the reply for the requesting peer.
    async fn handle_request(
        peer: PeerTag,
        request: RelayRequest,
        registry: &Arc<RwLock<Registry>>,
        config: &RelayServerConfig,
    ) -> Option<RelayNotice> {
        match request {
            RelayRequest::Subscribe { topic, echo_self } => {
                let mut registry = registry.write().await;
                let Some(client) = registry.peers.get_mut(&peer) else {
                    return None;
                };
                if !client.topics.contains_key(&topic)
                    && client.topics.len() >= config.max_topics_per_peer
                {
                    return Some(topic_error(ErrorCode::TooManyTopics, &topic, "Too many topics"));
                }
                client.topics.insert(topic.clone(), echo_self);
                registry.topics.entry(topic.clone()).or_default().insert(peer);

                debug!("Peer {} subscribed to {} (echo {})", peer, topic, echo_self);
                Some(RelayNotice::Subscribed { topic })
            }
            RelayRequest::Unsubscribe { topic } => {
                registry.write().await.unsubscribe(peer, &topic);
                debug!("Peer {} unsubscribed from {}", peer, topic);
                Some(RelayNotice::Unsubscribed { topic })
            }
            RelayRequest::Publish { topic, envelope } => {
                let registry = registry.read().await;
                let echo_self = match registry.peers.get(&peer).and_then(|p| p.topics.get(&topic)) {
                    Some(echo) => *echo,
                    None => {
                        return Some(topic_error(ErrorCode::NotSubscribed, &topic, "Not subscribed to topic"));
                    }
                };

                let members = registry.topics.get(&topic).into_iter().flatten();
                let mut delivered = 0usize;
                for member in members {
                    if *member == peer && !echo_self {
                        continue;
                    }
                    let Some(target) = registry.peers.get(member) else {
                        continue;
                    };
                    let delivery = RelayNotice::Delivery {
                        topic: topic.clone(),
                        sender: peer,
                        envelope: envelope.clone(),
                    };
                    match target.sender.try_send(delivery) {
                        Ok(()) => delivered += 1,
                        Err(e) => debug!("Dropped delivery to peer {}: {}", member, e),
                    }
                }

                debug!("Peer {} published {} on {} to {} peers", peer, envelope.event, topic, delivered);
                None
            }
            RelayRequest::Ping { timestamp } => Some(RelayNotice::Pong {
                timestamp,
                server_time: now_millis(),
            }),
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.peers.len()
    }

    /// Sockets holding a connection slot, handshakes included.
    pub fn open_sockets(&self) -> usize {
        self.config.max_connections.min(Semaphore::MAX_PERMITS) - self.slots.available_permits()
    }

    /// Get count of topics with subscribers.
    pub async fn topic_count(&self) -> usize {
        self.registry.read().await.topics.len()
    }
}
