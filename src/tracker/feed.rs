//! Background update step for the sample cache
//!
//! Listens for JSON device reports on a UDP socket and merges them into a
//! [`SampleCache`]. The monitor never waits on this task; it only reads what
//! has already been cached.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Pose, SampleCache, TrackerAddress};

/// Largest datagram the feed accepts
const MAX_REPORT_SIZE: usize = 16 * 1024;

/// One sensor pose inside a report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    pub sensor: usize,
    #[serde(flatten)]
    pub pose: Pose,
}

/// Device report as sent by the tracking server bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerReport {
    pub device: TrackerAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analogs: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensors: Vec<SensorReport>,
}

impl TrackerReport {
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// UDP listener feeding a [`SampleCache`]
pub struct TrackerFeed {
    local_addr: SocketAddr,
    rejected: Arc<AtomicU64>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl TrackerFeed {
    /// Bind the feed socket and start the receive loop
    pub async fn start(bind: SocketAddr, cache: Arc<SampleCache>) -> Result<Self> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("Failed to bind tracker feed on {}", bind))?;
        let local_addr = socket.local_addr()?;
        let rejected = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(Self::receive_loop(socket, cache, rejected.clone(), shutdown_rx));
        info!("Tracker feed listening on {}", local_addr);

        Ok(Self {
            local_addr,
            rejected,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of datagrams that could not be decoded
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    async fn receive_loop(
        socket: UdpSocket,
        cache: Arc<SampleCache>,
        rejected: Arc<AtomicU64>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut buf = vec![0u8; MAX_REPORT_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Tracker feed shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("Tracker feed receive error: {}", e);
                            continue;
                        }
                    };

                    match TrackerReport::decode(&buf[..len]) {
                        Ok(report) => {
                            debug!("Tracker report for {} from {}", report.device, peer);
                            cache.update(&report.device, &report);
                        }
                        Err(e) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("Dropping malformed tracker report from {}: {}", peer, e);
                        }
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

impl Drop for TrackerFeed {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}
