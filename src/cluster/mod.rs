//! Cluster role gate
//!
//! Exactly one machine (the head) polls the tracker. The role is resolved once
//! at startup from injected identities and never re-evaluated. On followers
//! the tracker and monitor are never built.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::config::{ChannelConfig, MovementConfig};
use crate::monitor::ChannelMonitor;
use crate::motion::MotionSink;
use crate::replication::{ReplicationBridge, ReplicationChannel};
use crate::tracker::{TrackerAddress, TrackerClient};

/// Role of this process in the display cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    /// Polls the tracker and broadcasts transitions
    Head,
    /// Receives replicated state only
    Follower,
}

impl ClusterRole {
    /// Compare this machine's identity with the configured head identity
    ///
    /// Surrounding whitespace is ignored; otherwise the match is exact.
    pub fn resolve(local_identity: &str, head_identity: &str) -> Self {
        if local_identity.trim() == head_identity.trim() {
            ClusterRole::Head
        } else {
            ClusterRole::Follower
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, ClusterRole::Head)
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRole::Head => write!(f, "head"),
            ClusterRole::Follower => write!(f, "follower"),
        }
    }
}

/// Everything the head needs to build its monitor
pub struct MonitorSettings {
    pub address: TrackerAddress,
    pub channel: ChannelConfig,
    pub movement: MovementConfig,
    pub sink: Arc<dyn MotionSink>,
    pub debug_output: bool,
}

/// One-time startup decision of what runs on this node
pub struct ClusterRoleGate {
    node_id: String,
    role: ClusterRole,
}

impl ClusterRoleGate {
    /// Resolve the role of `local_identity` against `head_identity`
    pub fn new(local_identity: &str, head_identity: &str) -> Self {
        let role = ClusterRole::resolve(local_identity, head_identity);
        if role.is_head() {
            info!("{} is the head node; tracker polling enabled", local_identity);
        } else {
            info!(
                "Removing tracker polling from {} (head node is {})",
                local_identity, head_identity
            );
        }
        Self {
            node_id: local_identity.trim().to_string(),
            role,
        }
    }

    /// Use an already decided role
    pub fn from_role(node_id: impl Into<String>, role: ClusterRole) -> Self {
        Self {
            node_id: node_id.into(),
            role,
        }
    }

    pub fn role(&self) -> ClusterRole {
        self.role
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Build and start the node for this role
    ///
    /// `tracker` is only invoked on the head. Followers attach the bridge to
    /// the channel and do nothing else.
    pub fn start<F>(
        self,
        channel: Arc<dyn ReplicationChannel>,
        settings: MonitorSettings,
        tracker: F,
    ) -> ClusterNode
    where
        F: FnOnce() -> Arc<dyn TrackerClient>,
    {
        let bridge = ReplicationBridge::new(self.node_id, self.role, channel);

        match self.role {
            ClusterRole::Follower => {
                bridge.attach();
                ClusterNode::Follower { bridge }
            }
            ClusterRole::Head => {
                let monitor = ChannelMonitor::new(
                    settings.address,
                    settings.channel,
                    settings.movement,
                    tracker(),
                    bridge.clone(),
                    settings.sink,
                    settings.debug_output,
                );
                monitor.start();
                ClusterNode::Head { monitor, bridge }
            }
        }
    }
}

/// Running node, head or follower
pub enum ClusterNode {
    Head {
        monitor: ChannelMonitor,
        bridge: Arc<ReplicationBridge>,
    },
    Follower {
        bridge: Arc<ReplicationBridge>,
    },
}

impl ClusterNode {
    pub fn role(&self) -> ClusterRole {
        match self {
            ClusterNode::Head { .. } => ClusterRole::Head,
            ClusterNode::Follower { .. } => ClusterRole::Follower,
        }
    }

    pub fn bridge(&self) -> &Arc<ReplicationBridge> {
        match self {
            ClusterNode::Head { bridge, .. } | ClusterNode::Follower { bridge } => bridge,
        }
    }

    /// The monitor, present on the head only
    pub fn monitor(&self) -> Option<&ChannelMonitor> {
        match self {
            ClusterNode::Head { monitor, .. } => Some(monitor),
            ClusterNode::Follower { .. } => None,
        }
    }

    /// Stop polling (head) and release the node
    pub fn shutdown(self) {
        if let ClusterNode::Head { monitor, .. } = &self {
            monitor.stop();
        }
        info!("{} node stopped", self.role());
    }
}

#[cfg(test)]
mod tests;
