//! Tracker sample access
//!
//! A [`TrackerClient`] answers button, analog and pose reads from the most
//! recent sample cached for a device. Reads never touch the network; the cache
//! is filled by a background update step ([`feed::TrackerFeed`]).

pub mod cache;
pub mod feed;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use glam::{DQuat, DVec3};

pub use cache::SampleCache;
pub use feed::{TrackerFeed, TrackerReport};

/// Errors raised while parsing a tracker address
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("tracker address '{0}' must have the form device@host")]
    MissingSeparator(String),
    #[error("tracker address '{0}' has an empty device name")]
    EmptyDevice(String),
    #[error("tracker address '{0}' has an empty host")]
    EmptyHost(String),
}

/// Device endpoint on the tracking server (e.g. `Wand0@C6_V1_HEAD`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackerAddress {
    device: String,
    host: String,
}

impl TrackerAddress {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        let (device, host) = raw
            .split_once('@')
            .ok_or_else(|| AddressError::MissingSeparator(raw.to_string()))?;

        if device.is_empty() {
            return Err(AddressError::EmptyDevice(raw.to_string()));
        }
        if host.is_empty() || host.contains('@') {
            return Err(AddressError::EmptyHost(raw.to_string()));
        }

        Ok(Self {
            device: device.to_string(),
            host: host.to_string(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for TrackerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.device, self.host)
    }
}

impl FromStr for TrackerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TrackerAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TrackerAddress> for String {
    fn from(value: TrackerAddress) -> Self {
        value.to_string()
    }
}

/// Position and orientation of one tracked sensor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    #[serde(default)]
    pub position: DVec3,
    #[serde(default)]
    pub orientation: DQuat,
}

/// Best-effort, non-blocking reads against cached tracker samples
///
/// Every method returns a neutral value (`false`, `0.0`, `None`) when the
/// device is unknown, the index is out of range, or the connection is down.
pub trait TrackerClient: Send + Sync {
    /// Pressed state of button `index`
    fn poll_button(&self, address: &TrackerAddress, index: usize) -> bool;

    /// Value of analog `channel` in the device's native range
    fn poll_analog(&self, address: &TrackerAddress, channel: usize) -> f64;

    /// Pose of tracker `sensor`
    fn poll_pose(&self, address: &TrackerAddress, sensor: usize) -> Option<Pose>;
}
