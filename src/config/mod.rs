//! Configuration management for Tracker Relay
//!
//! Handles loading, validating, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::fs;

use glam::DQuat;
use crate::tracker::TrackerAddress;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tracking server connection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Device endpoint, e.g. `Wand0@C6_V1_HEAD`
    pub address: TrackerAddress,
    /// Where the report feed listens
    #[serde(default = "default_feed_bind")]
    pub feed_bind: SocketAddr,
    /// Samples older than this read as "no data"; `null` disables staleness
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: Option<u64>,
}

impl TrackerConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_ms.map(Duration::from_millis)
    }
}

/// Per-channel polling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Analog channel read by the analog loop
    #[serde(default = "default_channel_index")]
    pub channel_index: usize,
    /// Buttons scanned each tick (indices `0..button_count`)
    #[serde(default = "default_button_count")]
    pub button_count: usize,
    #[serde(default = "default_dead_zone")]
    pub dead_zone: f64,
    #[serde(default = "default_true")]
    pub track_button: bool,
    #[serde(default = "default_true")]
    pub track_analog: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Length of one scheduler tick
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Buttons whose transitions are replicated to followers
    #[serde(default = "default_special_indices")]
    pub special_indices: Vec<SpecialIndex>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_index: default_channel_index(),
            button_count: default_button_count(),
            dead_zone: default_dead_zone(),
            track_button: true,
            track_analog: true,
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            special_indices: default_special_indices(),
        }
    }
}

impl ChannelConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A button index with replication semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SpecialIndex {
    pub index: usize,
    #[serde(default)]
    pub mode: EdgeMode,
}

/// Which transitions of a special index get replicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Press and release
    #[default]
    AnyChange,
    /// Press only
    Rising,
}

/// Analog locomotion configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MovementConfig {
    #[serde(default = "default_movement_speed")]
    pub speed: f64,
    #[serde(default = "default_true")]
    pub restrict_vertical: bool,
    #[serde(default)]
    pub reference: ReferenceFrame,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: default_movement_speed(),
            restrict_vertical: true,
            reference: ReferenceFrame::None,
        }
    }
}

/// Orientation that rotates the forward movement vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferenceFrame {
    /// Plain forward vector
    #[default]
    None,
    /// Orientation of a tracked sensor on the same device (e.g. the wand)
    Sensor { sensor: usize },
    /// Constant orientation
    Fixed { orientation: DQuat },
}

/// Cluster membership
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Machine identity of the node that polls the tracker
    pub head_node: String,
    /// Replication socket bind address
    #[serde(default = "default_replication_bind")]
    pub bind: SocketAddr,
    /// Replication endpoints of the other nodes
    #[serde(default)]
    pub peers: Vec<SocketAddr>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log every detected press and movement at info level
    #[serde(default)]
    pub debug_output: bool,
    /// Optional directory for daily rolling log files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        self.channel.validate().context("Invalid channel section")?;
        self.movement.validate().context("Invalid movement section")?;

        if self.cluster.head_node.trim().is_empty() {
            anyhow::bail!("cluster.head_node cannot be empty");
        }

        let mut seen = HashSet::new();
        for peer in &self.cluster.peers {
            if !seen.insert(peer) {
                anyhow::bail!("cluster.peers lists {} more than once", peer);
            }
        }

        Ok(())
    }
}

impl ChannelConfig {
    /// Validate ranges and special index bounds
    pub fn validate(&self) -> Result<()> {
        if !self.dead_zone.is_finite() || self.dead_zone < 0.0 {
            anyhow::bail!("dead_zone must be a non-negative number, got {}", self.dead_zone);
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be at least 1");
        }
        if self.track_button && self.button_count == 0 {
            anyhow::bail!("button_count must be at least 1 when track_button is enabled");
        }

        let mut seen = HashSet::new();
        for special in &self.special_indices {
            if special.index >= self.button_count {
                anyhow::bail!(
                    "special index {} is out of range (button_count is {})",
                    special.index,
                    self.button_count
                );
            }
            if !seen.insert(special.index) {
                anyhow::bail!("special index {} is listed more than once", special.index);
            }
        }

        Ok(())
    }
}

impl MovementConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() {
            anyhow::bail!("movement speed must be finite");
        }
        Ok(())
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_feed_bind() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 3883)) }
fn default_stale_after_ms() -> Option<u64> { Some(1000) }
fn default_channel_index() -> usize { 1 }
fn default_button_count() -> usize { 6 }
fn default_dead_zone() -> f64 { 0.5 }
fn default_debounce_ms() -> u64 { 200 }
fn default_poll_interval_ms() -> u64 { 11 }
fn default_special_indices() -> Vec<SpecialIndex> {
    vec![SpecialIndex { index: 5, mode: EdgeMode::AnyChange }]
}
fn default_movement_speed() -> f64 { 0.01 }
fn default_replication_bind() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 7455)) }
