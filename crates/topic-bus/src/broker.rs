//! Distribution hub.
//!
//! The hub listens on the distribution endpoint. Every publisher and
//! subscriber in the system connects to it; subscribers register topic
//! prefixes and the hub forwards each published message once to every peer
//! holding a matching prefix. Messages nobody subscribed to are dropped.

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{BusCodec, Packet};
use crate::config::BusConfig;
use crate::error::Result;
use crate::message::TopicMessage;

struct Peer {
    addr: SocketAddr,
    prefixes: Vec<String>,
    tx: mpsc::Sender<TopicMessage>,
}

impl Peer {
    fn wants(&self, topic: &str) -> bool {
        self.prefixes.iter().any(|p| topic.starts_with(p.as_str()))
    }
}

#[derive(Default)]
struct Routes {
    peers: RwLock<HashMap<u64, Peer>>,
}

impl Routes {
    /// Forward to every interested peer. Returns the number of peers reached.
    fn route(&self, message: &TopicMessage) -> usize {
        let peers = self.peers.read();
        let mut delivered = 0;
        for (id, peer) in peers.iter() {
            if !peer.wants(message.topic.as_str()) {
                continue;
            }
            match peer.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer = id, addr = %peer.addr, topic = %message.topic, "Peer queue full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

/// The distribution hub.
pub struct Broker {
    listener: TcpListener,
    config: BusConfig,
    routes: Arc<Routes>,
    next_id: AtomicU64,
}

impl Broker {
    /// Bind the hub to `addr` (use port 0 for an ephemeral port).
    pub async fn bind(addr: &str, config: BusConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Bus hub listening");
        Ok(Self {
            listener,
            config,
            routes: Arc::new(Routes::default()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Bind to the endpoint from the configuration.
    pub async fn from_config(config: BusConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone();
        Self::bind(&endpoint, config).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.routes.peers.read().len()
    }

    /// Accept and serve peers until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut peers = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Bus hub shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept bus peer");
                            continue;
                        }
                    };
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let routes = self.routes.clone();
                    let config = self.config.clone();
                    let token = cancel.child_token();
                    peers.spawn(serve_peer(id, stream, addr, routes, config, token));
                }
                Some(_) = peers.join_next(), if !peers.is_empty() => {}
            }
        }

        peers.shutdown().await;
        Ok(())
    }
}

async fn serve_peer(
    id: u64,
    stream: TcpStream,
    addr: SocketAddr,
    routes: Arc<Routes>,
    config: BusConfig,
    cancel: CancellationToken,
) {
    debug!(peer = id, addr = %addr, "Bus peer connected");
    let _ = stream.set_nodelay(true);
    let codec = BusCodec::new(config.max_frame_size);
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, codec);
    let mut writer = FramedWrite::new(write_half, codec);

    let (tx, mut rx) = mpsc::channel::<TopicMessage>(config.peer_queue.max(1));
    routes.peers.write().insert(
        id,
        Peer {
            addr,
            prefixes: Vec::new(),
            tx,
        },
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(message) = rx.recv() => {
                if let Err(e) = writer.send(Packet::Publish(message)).await {
                    debug!(peer = id, error = %e, "Bus peer write failed");
                    break;
                }
            }
            packet = reader.next() => {
                match packet {
                    Some(Ok(Packet::Subscribe(prefix))) => {
                        trace!(peer = id, prefix = %prefix, "Subscribe");
                        if let Some(peer) = routes.peers.write().get_mut(&id) {
                            peer.prefixes.push(prefix.clone());
                        }
                        if let Err(e) = writer.send(Packet::Subscribed(prefix)).await {
                            debug!(peer = id, error = %e, "Bus peer write failed");
                            break;
                        }
                    }
                    Some(Ok(Packet::Unsubscribe(prefix))) => {
                        trace!(peer = id, prefix = %prefix, "Unsubscribe");
                        if let Some(peer) = routes.peers.write().get_mut(&id)
                            && let Some(pos) = peer.prefixes.iter().position(|p| *p == prefix)
                        {
                            peer.prefixes.remove(pos);
                        }
                        if let Err(e) = writer.send(Packet::Unsubscribed(prefix)).await {
                            debug!(peer = id, error = %e, "Bus peer write failed");
                            break;
                        }
                    }
                    Some(Ok(Packet::Publish(message))) => {
                        let reached = routes.route(&message);
                        trace!(peer = id, topic = %message.topic, reached, "Routed message");
                    }
                    Some(Ok(other)) => {
                        warn!(peer = id, packet = ?other, "Ignoring hub-only packet from peer");
                    }
                    Some(Err(e)) if e.is_disconnect() => break,
                    Some(Err(e)) => {
                        warn!(peer = id, addr = %addr, error = %e, "Dropping misbehaving bus peer");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    routes.peers.write().remove(&id);
    debug!(peer = id, addr = %addr, "Bus peer disconnected");
}
