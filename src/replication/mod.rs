//! Head-to-follower replication of button transitions
//!
//! The head broadcasts each special-button transition as a
//! [`ReplicationMessage`]; followers apply it to their shadow state. Delivery
//! is fire-and-forget: no acknowledgment, no retry, no resync. Gaps are made
//! observable through sequence numbers and [`ReplicationStats`].

pub mod bridge;
pub mod local;
pub mod udp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub use bridge::{ReplicationBridge, ShadowCallback};
pub use local::{LocalBus, LocalEndpoint};
pub use udp::UdpReplicationChannel;

/// Errors raised by replication transports
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("replication message codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("failed to send to {peer}: {source}")]
    Send {
        peer: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{failed} of {total} peers did not receive the message")]
    PartialDelivery { failed: usize, total: usize },
    #[error("only the head node broadcasts")]
    NotHead,
}

/// Replicated state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicationPayload {
    ButtonEdge { index: usize, pressed: bool },
}

/// Message sent from the head to every other node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationMessage {
    /// Node identity of the sender
    pub sender: String,
    /// Head session; a restarted head starts a new epoch
    pub epoch: i64,
    /// Per-epoch sequence number, starting at 1
    pub seq: u64,
    /// Wall-clock send time (ms since Unix epoch)
    pub sent_at_ms: i64,
    #[serde(flatten)]
    pub payload: ReplicationPayload,
}

impl ReplicationMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ReplicationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReplicationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Callback invoked for every message received from another node
pub type MessageHandler = Arc<dyn Fn(ReplicationMessage) + Send + Sync>;

/// Broadcast transport between cluster nodes
///
/// `broadcast` targets every other node (never the sender).
#[async_trait]
pub trait ReplicationChannel: Send + Sync {
    /// Send a message to all other nodes
    async fn broadcast(&self, message: &ReplicationMessage) -> Result<(), ReplicationError>;

    /// Register a handler for inbound messages
    fn on_receive(&self, handler: MessageHandler);
}

/// Replication counters
#[derive(Debug, Default)]
pub struct ReplicationStats {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
    applied: AtomicU64,
    lost: AtomicU64,
    stale: AtomicU64,
}

/// Point-in-time copy of [`ReplicationStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStatsSnapshot {
    /// Messages broadcast by this node
    pub sent: u64,
    /// Broadcasts that failed for at least one peer
    pub send_failures: u64,
    /// Messages received from other nodes
    pub received: u64,
    /// Transitions applied to the shadow state
    pub applied: u64,
    /// Messages inferred missing from sequence gaps
    pub lost: u64,
    /// Duplicate or out-of-order messages dropped
    pub stale: u64,
}

impl ReplicationStats {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReplicationStatsSnapshot {
        ReplicationStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }
}
