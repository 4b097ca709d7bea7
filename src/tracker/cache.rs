//! Concurrent cache of the latest sample per tracker device

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use super::feed::TrackerReport;
use super::{Pose, TrackerAddress, TrackerClient};

/// Latest known state of one device
#[derive(Debug, Clone)]
struct DeviceSample {
    buttons: Vec<bool>,
    analogs: Vec<f64>,
    sensors: Vec<Option<Pose>>,
    updated_at: Instant,
}

impl DeviceSample {
    fn empty(now: Instant) -> Self {
        Self {
            buttons: Vec::new(),
            analogs: Vec::new(),
            sensors: Vec::new(),
            updated_at: now,
        }
    }
}

/// Sample cache shared between the feed (writer) and the monitor (reader)
///
/// Reports may carry any subset of buttons, analogs and sensors; missing
/// sections keep their previous values. A device whose last report is older
/// than `stale_after` reads as disconnected.
pub struct SampleCache {
    devices: DashMap<TrackerAddress, DeviceSample>,
    stale_after: Option<Duration>,
}

impl SampleCache {
    /// Create a cache; `stale_after = None` keeps samples valid forever
    pub fn new(stale_after: Option<Duration>) -> Self {
        Self {
            devices: DashMap::new(),
            stale_after,
        }
    }

    /// Merge a device report into the cache
    pub fn update(&self, address: &TrackerAddress, report: &TrackerReport) {
        let now = Instant::now();
        let mut entry = self
            .devices
            .entry(address.clone())
            .or_insert_with(|| DeviceSample::empty(now));

        if let Some(buttons) = &report.buttons {
            entry.buttons.clone_from(buttons);
        }
        if let Some(analogs) = &report.analogs {
            entry.analogs.clone_from(analogs);
        }
        for sensor in &report.sensors {
            if entry.sensors.len() <= sensor.sensor {
                entry.sensors.resize(sensor.sensor + 1, None);
            }
            entry.sensors[sensor.sensor] = Some(sensor.pose);
        }
        entry.updated_at = now;

        trace!(
            "Cached sample for {}: {} buttons, {} analogs",
            address,
            entry.buttons.len(),
            entry.analogs.len()
        );
    }

    /// Whether the device has reported within the staleness window
    pub fn is_live(&self, address: &TrackerAddress) -> bool {
        self.devices
            .get(address)
            .map(|sample| self.fresh(&sample))
            .unwrap_or(false)
    }

    /// Forget a device (its reads become neutral)
    pub fn remove(&self, address: &TrackerAddress) {
        self.devices.remove(address);
    }

    fn fresh(&self, sample: &DeviceSample) -> bool {
        match self.stale_after {
            Some(limit) => sample.updated_at.elapsed() <= limit,
            None => true,
        }
    }

    fn read<T>(&self, address: &TrackerAddress, f: impl FnOnce(&DeviceSample) -> Option<T>) -> Option<T> {
        let sample = self.devices.get(address)?;
        if !self.fresh(&sample) {
            return None;
        }
        f(&sample)
    }
}

impl TrackerClient for SampleCache {
    fn poll_button(&self, address: &TrackerAddress, index: usize) -> bool {
        self.read(address, |s| s.buttons.get(index).copied())
            .unwrap_or(false)
    }

    fn poll_analog(&self, address: &TrackerAddress, channel: usize) -> f64 {
        self.read(address, |s| s.analogs.get(channel).copied())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    fn poll_pose(&self, address: &TrackerAddress, sensor: usize) -> Option<Pose> {
        self.read(address, |s| s.sensors.get(sensor).copied().flatten())
    }
}
