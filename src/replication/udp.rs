//! UDP replication transport
//!
//! Each broadcast is one JSON datagram per configured peer. Datagrams may be
//! lost or reordered; the bridge's sequence tracking makes that visible.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{MessageHandler, ReplicationChannel, ReplicationError, ReplicationMessage};

/// Largest datagram accepted from peers
const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Replication channel over a single UDP socket
pub struct UdpReplicationChannel {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peers: Vec<SocketAddr>,
    handlers: Arc<RwLock<Vec<MessageHandler>>>,
    rejected: Arc<AtomicU64>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl UdpReplicationChannel {
    /// Bind the replication socket and start receiving
    ///
    /// Peers equal to the bound address are skipped when broadcasting.
    pub async fn bind(bind: SocketAddr, peers: Vec<SocketAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("Failed to bind replication socket on {}", bind))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let peers: Vec<SocketAddr> = peers.into_iter().filter(|p| *p != local_addr).collect();
        let handlers = Arc::new(RwLock::new(Vec::<MessageHandler>::new()));
        let rejected = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(Self::receive_loop(
            socket.clone(),
            handlers.clone(),
            rejected.clone(),
            shutdown_rx,
        ));

        info!(
            "Replication channel on {} with {} peer(s)",
            local_addr,
            peers.len()
        );

        Ok(Self {
            socket,
            local_addr,
            peers,
            handlers,
            rejected,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Number of inbound datagrams that could not be decoded
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    async fn receive_loop(
        socket: Arc<UdpSocket>,
        handlers: Arc<RwLock<Vec<MessageHandler>>>,
        rejected: Arc<AtomicU64>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Replication receive loop shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("Replication receive error: {}", e);
                            continue;
                        }
                    };

                    let message = match ReplicationMessage::decode(&buf[..len]) {
                        Ok(message) => message,
                        Err(e) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("Dropping malformed replication datagram from {}: {}", peer, e);
                            continue;
                        }
                    };

                    let current: Vec<MessageHandler> = handlers.read().clone();
                    for handler in current {
                        handler(message.clone());
                    }
                }
            }
        }
    }

    /// Stop the receive loop
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

#[async_trait]
impl ReplicationChannel for UdpReplicationChannel {
    async fn broadcast(&self, message: &ReplicationMessage) -> Result<(), ReplicationError> {
        let payload = message.encode()?;
        let mut failed = 0;

        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(&payload, peer).await {
                failed += 1;
                let err = ReplicationError::Send {
                    peer: peer.to_string(),
                    source: e,
                };
                warn!("{}", err);
            }
        }

        if failed > 0 {
            return Err(ReplicationError::PartialDelivery {
                failed,
                total: self.peers.len(),
            });
        }
        Ok(())
    }

    fn on_receive(&self, handler: MessageHandler) {
        self.handlers.write().push(handler);
    }
}

impl Drop for UdpReplicationChannel {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}
