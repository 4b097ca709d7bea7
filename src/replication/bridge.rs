//! Replication bridge between the channel monitor and the cluster transport

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    MessageHandler, ReplicationChannel, ReplicationError, ReplicationMessage, ReplicationPayload,
    ReplicationStats, ReplicationStatsSnapshot,
};
use crate::cluster::ClusterRole;
use crate::monitor::{ButtonEdge, EdgeForwarder};

/// Callback invoked when a shadow button changes: `(index, pressed)`
pub type ShadowCallback = Arc<dyn Fn(usize, bool) + Send + Sync>;

/// Last sequence seen per sender session
#[derive(Debug, Clone, Copy)]
struct SenderCursor {
    epoch: i64,
    seq: u64,
}

/// Forwards transitions from the head and applies them on followers
///
/// Both roles keep a shadow of the replicated button states. On the head the
/// shadow is written by [`forward_edge`](Self::forward_edge); on followers by
/// incoming messages only.
pub struct ReplicationBridge {
    node_id: String,
    role: ClusterRole,
    epoch: i64,
    next_seq: AtomicU64,
    channel: Arc<dyn ReplicationChannel>,
    shadow: RwLock<HashMap<usize, bool>>,
    shadow_listeners: RwLock<Vec<ShadowCallback>>,
    cursors: Mutex<HashMap<String, SenderCursor>>,
    stats: ReplicationStats,
}

impl ReplicationBridge {
    pub fn new(
        node_id: impl Into<String>,
        role: ClusterRole,
        channel: Arc<dyn ReplicationChannel>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.into(),
            role,
            epoch: chrono::Utc::now().timestamp_millis(),
            next_seq: AtomicU64::new(1),
            channel,
            shadow: RwLock::new(HashMap::new()),
            shadow_listeners: RwLock::new(Vec::new()),
            cursors: Mutex::new(HashMap::new()),
            stats: ReplicationStats::default(),
        })
    }

    /// Register this bridge as the channel's receive handler
    pub fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handler: MessageHandler = Arc::new(move |message: ReplicationMessage| {
            if let Some(bridge) = weak.upgrade() {
                bridge.receive(message);
            }
        });
        self.channel.on_receive(handler);
        debug!("Replication bridge attached for {}", self.node_id);
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn role(&self) -> ClusterRole {
        self.role
    }

    /// Record a transition locally and broadcast it to every other node
    ///
    /// Head only. A failed send is counted and returned; it is never retried.
    pub async fn forward_edge(&self, edge: ButtonEdge) -> Result<(), ReplicationError> {
        if !self.role.is_head() {
            return Err(ReplicationError::NotHead);
        }

        self.set_shadow(edge.index, edge.pressed);

        let message = ReplicationMessage {
            sender: self.node_id.clone(),
            epoch: self.epoch,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            sent_at_ms: chrono::Utc::now().timestamp_millis(),
            payload: ReplicationPayload::ButtonEdge {
                index: edge.index,
                pressed: edge.pressed,
            },
        };

        ReplicationStats::bump(&self.stats.sent, 1);
        debug!(
            "Broadcasting button {} {} (seq {})",
            edge.index,
            if edge.pressed { "pressed" } else { "released" },
            message.seq
        );

        self.channel.broadcast(&message).await.inspect_err(|_| {
            ReplicationStats::bump(&self.stats.send_failures, 1);
        })
    }

    /// Apply an incoming transition to the shadow state
    pub fn apply_trigger_edge(&self, index: usize, pressed: bool) {
        self.set_shadow(index, pressed);
        ReplicationStats::bump(&self.stats.applied, 1);
        debug!("Applied replicated button {} -> {}", index, pressed);
    }

    /// Shadow state of a replicated button (`false` until first seen)
    pub fn shadow(&self, index: usize) -> bool {
        self.shadow.read().get(&index).copied().unwrap_or(false)
    }

    /// Subscribe to shadow state changes
    pub fn subscribe_shadow(&self, callback: ShadowCallback) {
        self.shadow_listeners.write().push(callback);
    }

    pub fn stats(&self) -> ReplicationStatsSnapshot {
        self.stats.snapshot()
    }

    fn set_shadow(&self, index: usize, pressed: bool) {
        let changed = self.shadow.write().insert(index, pressed) != Some(pressed);
        if changed {
            for callback in self.shadow_listeners.read().iter() {
                callback(index, pressed);
            }
        }
    }

    /// Handle a message from the transport
    fn receive(&self, message: ReplicationMessage) {
        if message.sender == self.node_id {
            return;
        }
        ReplicationStats::bump(&self.stats.received, 1);

        if !self.accept_sequence(&message) {
            return;
        }

        match message.payload {
            ReplicationPayload::ButtonEdge { index, pressed } => {
                self.apply_trigger_edge(index, pressed);
            }
        }
    }

    /// Track per-sender sequence numbers; false means drop the message
    fn accept_sequence(&self, message: &ReplicationMessage) -> bool {
        let mut cursors = self.cursors.lock();
        let incoming = SenderCursor {
            epoch: message.epoch,
            seq: message.seq,
        };

        match cursors.get(&message.sender).copied() {
            None => {
                info!(
                    "First replication message from {} (epoch {})",
                    message.sender, message.epoch
                );
            }
            Some(last) if message.epoch != last.epoch => {
                // Wall-clock epochs: equality only, a restarted head may read earlier
                info!("{} started a new session (epoch {})", message.sender, message.epoch);
            }
            Some(last) => {
                if message.seq <= last.seq {
                    ReplicationStats::bump(&self.stats.stale, 1);
                    debug!(
                        "Dropping stale message {} from {} (last {})",
                        message.seq, message.sender, last.seq
                    );
                    return false;
                }
                let missing = message.seq - last.seq - 1;
                if missing > 0 {
                    ReplicationStats::bump(&self.stats.lost, missing);
                    warn!(
                        "Lost {} replication message(s) from {}; shadow state may diverge",
                        missing, message.sender
                    );
                }
            }
        }

        cursors.insert(message.sender.clone(), incoming);
        true
    }
}

#[async_trait]
impl EdgeForwarder for ReplicationBridge {
    async fn forward(&self, edge: ButtonEdge) {
        if let Err(e) = self.forward_edge(edge).await {
            warn!("Failed to replicate button {}: {}", edge.index, e);
        }
    }
}
