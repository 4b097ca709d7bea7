//! Tracker Relay
//!
//! Polls a tracking-server device on the head node of a display cluster,
//! turns button and analog readings into presses and movement, and replicates
//! trigger transitions to every other node.

pub mod cluster;
pub mod config;
pub mod monitor;
pub mod motion;
pub mod replication;
pub mod tracker;

pub use cluster::{ClusterNode, ClusterRole, ClusterRoleGate, MonitorSettings};
pub use config::AppConfig;
pub use monitor::ChannelMonitor;
pub use replication::{ReplicationBridge, ReplicationChannel};
pub use tracker::{TrackerAddress, TrackerClient};
