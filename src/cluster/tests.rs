//! Tests for role resolution and head/follower wiring

use super::*;
use crate::motion::PoseAccumulator;
use crate::replication::{LocalBus, LocalEndpoint};
use crate::tracker::Pose;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct FakeTracker {
    buttons: Mutex<Vec<bool>>,
    polls: AtomicUsize,
}

impl FakeTracker {
    fn set_button(&self, index: usize, pressed: bool) {
        let mut buttons = self.buttons.lock();
        if buttons.len() <= index {
            buttons.resize(index + 1, false);
        }
        buttons[index] = pressed;
    }
}

impl TrackerClient for FakeTracker {
    fn poll_button(&self, _address: &TrackerAddress, index: usize) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.buttons.lock().get(index).copied().unwrap_or(false)
    }

    fn poll_analog(&self, _address: &TrackerAddress, _channel: usize) -> f64 {
        self.polls.fetch_add(1, Ordering::SeqCst);
        0.0
    }

    fn poll_pose(&self, _address: &TrackerAddress, _sensor: usize) -> Option<Pose> {
        None
    }
}

fn settings() -> MonitorSettings {
    MonitorSettings {
        address: TrackerAddress::parse("Wand0@NODE-A").unwrap(),
        channel: ChannelConfig::default(),
        movement: MovementConfig::default(),
        sink: Arc::new(PoseAccumulator::new()),
        debug_output: false,
    }
}

fn start_node(
    bus: &LocalBus,
    node: &str,
    tracker: &Arc<FakeTracker>,
    factory_calls: &Arc<AtomicUsize>,
) -> ClusterNode {
    let endpoint: LocalEndpoint = bus.endpoint();
    let tracker = tracker.clone();
    let calls = factory_calls.clone();
    ClusterRoleGate::new(node, "NODE-A").start(Arc::new(endpoint), settings(), move || {
        calls.fetch_add(1, Ordering::SeqCst);
        tracker as Arc<dyn TrackerClient>
    })
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[test]
fn test_resolve_role() {
    assert_eq!(ClusterRole::resolve("NODE-A", "NODE-A"), ClusterRole::Head);
    assert_eq!(ClusterRole::resolve("NODE-B", "NODE-A"), ClusterRole::Follower);
    assert_eq!(ClusterRole::resolve(" NODE-A\n", "NODE-A"), ClusterRole::Head);
    assert_eq!(ClusterRole::resolve("node-a", "NODE-A"), ClusterRole::Follower);
    assert_eq!(ClusterRole::Head.to_string(), "head");
}

#[tokio::test(start_paused = true)]
async fn test_head_polls_the_tracker() {
    let bus = LocalBus::new();
    let tracker = Arc::new(FakeTracker::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let node = start_node(&bus, "NODE-A", &tracker, &calls);
    settle(50).await;

    assert_eq!(node.role(), ClusterRole::Head);
    assert!(node.monitor().is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(tracker.polls.load(Ordering::SeqCst) > 0);
    node.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_follower_never_builds_a_tracker() {
    let bus = LocalBus::new();
    let tracker = Arc::new(FakeTracker::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let node = start_node(&bus, "NODE-B", &tracker, &calls);
    settle(500).await;

    assert_eq!(node.role(), ClusterRole::Follower);
    assert!(node.monitor().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_replicates_to_followers() {
    let bus = LocalBus::new();
    let tracker = Arc::new(FakeTracker::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let head = start_node(&bus, "NODE-A", &tracker, &calls);
    let b = start_node(&bus, "NODE-B", &tracker, &calls);
    let c = start_node(&bus, "NODE-C", &tracker, &calls);

    tracker.set_button(5, true);
    settle(50).await;
    assert!(head.bridge().shadow(5));
    assert!(b.bridge().shadow(5));
    assert!(c.bridge().shadow(5));

    // The head sits out its debounce window before scanning again
    tracker.set_button(5, false);
    settle(300).await;
    for node in [&head, &b, &c] {
        assert!(!node.bridge().shadow(5));
    }

    assert_eq!(head.bridge().stats().sent, 2);
    assert_eq!(b.bridge().stats().applied, 2);
    assert_eq!(c.bridge().stats().lost, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_message_diverges_until_next_transition() {
    let bus = LocalBus::new();
    let tracker = Arc::new(FakeTracker::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let head = start_node(&bus, "NODE-A", &tracker, &calls);
    let b = start_node(&bus, "NODE-B", &tracker, &calls);
    let c = start_node(&bus, "NODE-C", &tracker, &calls);

    tracker.set_button(5, true);
    settle(50).await;
    tracker.set_button(5, false);
    settle(300).await;

    bus.drop_next(1);
    tracker.set_button(5, true);
    settle(50).await;

    assert!(head.bridge().shadow(5));
    let caught_up = [b.bridge().shadow(5), c.bridge().shadow(5)]
        .iter()
        .filter(|pressed| **pressed)
        .count();
    assert_eq!(caught_up, 1);

    tracker.set_button(5, false);
    settle(300).await;

    assert!(!b.bridge().shadow(5));
    assert!(!c.bridge().shadow(5));
    let lost = b.bridge().stats().lost + c.bridge().stats().lost;
    assert_eq!(lost, 1);
    assert_eq!(bus.dropped(), 1);
}

#[tokio::test]
async fn test_injected_role_skips_resolution() {
    let bus = LocalBus::new();
    let gate = ClusterRoleGate::from_role("NODE-A", ClusterRole::Follower);
    assert_eq!(gate.node_id(), "NODE-A");

    let node = gate.start(Arc::new(bus.endpoint()), settings(), || {
        panic!("tracker built on a follower")
    });
    assert_eq!(node.role(), ClusterRole::Follower);
    assert_eq!(node.bridge().node_id(), "NODE-A");
}
