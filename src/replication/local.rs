//! In-process replication transport
//!
//! Every endpoint created from one [`LocalBus`] sees the broadcasts of every
//! other endpoint. Loss can be injected to exercise follower divergence.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::{MessageHandler, ReplicationChannel, ReplicationError, ReplicationMessage};

type HandlerList = Arc<RwLock<Vec<MessageHandler>>>;

#[derive(Default)]
struct BusInner {
    endpoints: RwLock<Vec<(usize, HandlerList)>>,
    next_id: AtomicUsize,
    drop_next: AtomicUsize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Shared in-process bus
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint attached to this bus
    pub fn endpoint(&self) -> LocalEndpoint {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handlers: HandlerList = Arc::new(RwLock::new(Vec::new()));
        self.inner.endpoints.write().push((id, handlers.clone()));
        LocalEndpoint {
            id,
            bus: self.inner.clone(),
            handlers,
        }
    }

    /// Silently drop the next `count` deliveries
    pub fn drop_next(&self, count: usize) {
        self.inner.drop_next.fetch_add(count, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }
}

/// One node's view of a [`LocalBus`]
pub struct LocalEndpoint {
    id: usize,
    bus: Arc<BusInner>,
    handlers: HandlerList,
}

impl LocalEndpoint {
    fn take_drop(&self) -> bool {
        self.bus
            .drop_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ReplicationChannel for LocalEndpoint {
    async fn broadcast(&self, message: &ReplicationMessage) -> Result<(), ReplicationError> {
        // Snapshot the receivers so no bus lock is held while handlers run
        let receivers: Vec<MessageHandler> = self
            .bus
            .endpoints
            .read()
            .iter()
            .filter(|(id, _)| *id != self.id)
            .flat_map(|(_, handlers)| handlers.read().clone())
            .collect();

        for handler in receivers {
            if self.take_drop() {
                self.bus.dropped.fetch_add(1, Ordering::SeqCst);
                trace!("Local bus dropped message {}", message.seq);
                continue;
            }
            self.bus.delivered.fetch_add(1, Ordering::SeqCst);
            handler(message.clone());
        }

        Ok(())
    }

    fn on_receive(&self, handler: MessageHandler) {
        self.handlers.write().push(handler);
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.bus.endpoints.write().retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::ReplicationPayload;
    use parking_lot::Mutex;

    fn message(seq: u64) -> ReplicationMessage {
        ReplicationMessage {
            sender: "A".to_string(),
            epoch: 1,
            seq,
            sent_at_ms: 0,
            payload: ReplicationPayload::ButtonEdge { index: 5, pressed: true },
        }
    }

    fn recorder(endpoint: &LocalEndpoint) -> Arc<Mutex<Vec<u64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        endpoint.on_receive(Arc::new(move |msg: ReplicationMessage| seen_clone.lock().push(msg.seq)));
        seen
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let bus = LocalBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let c = bus.endpoint();
        let seen_a = recorder(&a);
        let seen_b = recorder(&b);
        let seen_c = recorder(&c);

        a.broadcast(&message(1)).await.unwrap();

        assert!(seen_a.lock().is_empty());
        assert_eq!(*seen_b.lock(), vec![1]);
        assert_eq!(*seen_c.lock(), vec![1]);
        assert_eq!(bus.delivered(), 2);
    }

    #[tokio::test]
    async fn test_injected_loss() {
        let bus = LocalBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let seen_b = recorder(&b);

        bus.drop_next(1);
        a.broadcast(&message(1)).await.unwrap();
        a.broadcast(&message(2)).await.unwrap();

        assert_eq!(*seen_b.lock(), vec![2]);
        assert_eq!(bus.dropped(), 1);
    }

    #[tokio::test]
    async fn test_dropped_endpoint_stops_receiving() {
        let bus = LocalBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let seen_b = recorder(&b);
        drop(b);

        a.broadcast(&message(1)).await.unwrap();
        assert!(seen_b.lock().is_empty());
        assert_eq!(bus.delivered(), 0);
    }
}
