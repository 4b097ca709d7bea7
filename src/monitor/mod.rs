//! Channel monitor: button and analog polling loops
//!
//! Each loop is a tokio task that yields at every tick (and, for buttons, at
//! debounce boundaries). At most one task per loop kind exists; enabling a
//! loop aborts the previous instance before spawning the new one.

pub mod analog;
pub mod buttons;

use anyhow::Result;
use async_trait::async_trait;
use glam::{DQuat, DVec3};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{ChannelConfig, MovementConfig, ReferenceFrame};
use crate::motion::MotionSink;
use crate::tracker::{TrackerAddress, TrackerClient};

pub use buttons::{ButtonEdge, ButtonScanner, ScanStep, Suspend};

/// Observation emitted by the monitor
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Rising edge on a button
    ButtonPressed { index: usize },
    /// Analog input outside the deadzone moved the holder
    Moved { channel: usize, value: f64, delta: DVec3 },
}

/// Callback type for monitor events
pub type EventCallback = Arc<dyn Fn(MonitorEvent) + Send + Sync>;

/// Receiver of special-button transitions (the replication bridge on the head)
#[async_trait]
pub trait EdgeForwarder: Send + Sync {
    async fn forward(&self, edge: ButtonEdge);
}

/// State shared by the monitor and its loop tasks
struct Shared {
    address: TrackerAddress,
    tracker: Arc<dyn TrackerClient>,
    forwarder: Arc<dyn EdgeForwarder>,
    sink: Arc<dyn MotionSink>,
    config: RwLock<ChannelConfig>,
    movement: RwLock<MovementConfig>,
    scanner: Mutex<ButtonScanner>,
    listeners: RwLock<Vec<EventCallback>>,
    debug_output: bool,
}

impl Shared {
    fn emit(&self, event: MonitorEvent) {
        for callback in self.listeners.read().iter() {
            callback(event.clone());
        }
    }

    fn reference_orientation(&self, reference: ReferenceFrame) -> Option<DQuat> {
        match reference {
            ReferenceFrame::None => None,
            ReferenceFrame::Sensor { sensor } => self
                .tracker
                .poll_pose(&self.address, sensor)
                .map(|pose| pose.orientation),
            ReferenceFrame::Fixed { orientation } => Some(orientation),
        }
    }
}

/// Polls one tracker device and reports presses, trigger transitions, and
/// analog movement
pub struct ChannelMonitor {
    shared: Arc<Shared>,
    button_task: Mutex<Option<JoinHandle<()>>>,
    analog_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelMonitor {
    /// Create a monitor; no loop runs until [`start`](Self::start)
    pub fn new(
        address: TrackerAddress,
        config: ChannelConfig,
        movement: MovementConfig,
        tracker: Arc<dyn TrackerClient>,
        forwarder: Arc<dyn EdgeForwarder>,
        sink: Arc<dyn MotionSink>,
        debug_output: bool,
    ) -> Self {
        let scanner = ButtonScanner::new(&config);
        Self {
            shared: Arc::new(Shared {
                address,
                tracker,
                forwarder,
                sink,
                config: RwLock::new(config),
                movement: RwLock::new(movement),
                scanner: Mutex::new(scanner),
                listeners: RwLock::new(Vec::new()),
                debug_output,
            }),
            button_task: Mutex::new(None),
            analog_task: Mutex::new(None),
        }
    }

    /// Start the loops enabled in the current config
    pub fn start(&self) {
        let (track_button, track_analog) = {
            let config = self.shared.config.read();
            (config.track_button, config.track_analog)
        };
        self.restart_button_loop(track_button);
        self.restart_analog_loop(track_analog);
        info!(
            "Monitoring {} (buttons: {}, analog: {})",
            self.shared.address, track_button, track_analog
        );
    }

    /// Subscribe to monitor events
    pub fn subscribe(&self, callback: EventCallback) {
        self.shared.listeners.write().push(callback);
    }

    pub fn address(&self) -> &TrackerAddress {
        &self.shared.address
    }

    pub fn channel_config(&self) -> ChannelConfig {
        self.shared.config.read().clone()
    }

    /// Enable or disable the button loop
    ///
    /// Any running instance is cancelled first; enabling starts a fresh one.
    pub fn set_track_button(&self, enabled: bool) {
        self.shared.config.write().track_button = enabled;
        self.restart_button_loop(enabled);
    }

    /// Enable or disable the analog loop
    ///
    /// Any running instance is cancelled first; enabling starts a fresh one.
    pub fn set_track_analog(&self, enabled: bool) {
        self.shared.config.write().track_analog = enabled;
        self.restart_analog_loop(enabled);
    }

    /// Replace the channel config
    ///
    /// Cancels both loops, applies the config, then restarts the loops its
    /// flags enable. Button edge state of indices still in range is kept.
    pub fn set_channel_config(&self, config: ChannelConfig) -> Result<()> {
        config.validate()?;

        self.restart_button_loop(false);
        self.restart_analog_loop(false);

        self.shared.scanner.lock().reconfigure(&config);
        let (track_button, track_analog) = (config.track_button, config.track_analog);
        *self.shared.config.write() = config;

        self.restart_button_loop(track_button);
        self.restart_analog_loop(track_analog);
        debug!("Channel config applied for {}", self.shared.address);
        Ok(())
    }

    /// Replace the movement config (picked up on the next analog tick)
    pub fn set_movement_config(&self, movement: MovementConfig) -> Result<()> {
        movement.validate()?;
        *self.shared.movement.write() = movement;
        Ok(())
    }

    pub fn is_button_loop_running(&self) -> bool {
        Self::running(&self.button_task)
    }

    pub fn is_analog_loop_running(&self) -> bool {
        Self::running(&self.analog_task)
    }

    /// Last accepted pressed state of a button
    pub fn is_pressed(&self, index: usize) -> bool {
        self.shared.scanner.lock().is_pressed(index)
    }

    /// Cancel both loops
    pub fn stop(&self) {
        self.restart_button_loop(false);
        self.restart_analog_loop(false);
    }

    fn running(slot: &Mutex<Option<JoinHandle<()>>>) -> bool {
        slot.lock().as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    fn restart_button_loop(&self, enabled: bool) {
        let mut slot = self.button_task.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        if enabled {
            self.shared.scanner.lock().restart();
            *slot = Some(tokio::spawn(button_loop(self.shared.clone())));
        }
    }

    fn restart_analog_loop(&self, enabled: bool) {
        let mut slot = self.analog_task.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        if enabled {
            *slot = Some(tokio::spawn(analog_loop(self.shared.clone())));
        }
    }
}

impl Drop for ChannelMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn button_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.read().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // One scan; may suspend several times on debounce
        loop {
            let step = {
                let mut scanner = shared.scanner.lock();
                scanner.step(Instant::now(), |index| {
                    shared.tracker.poll_button(&shared.address, index)
                })
            };

            for index in step.presses {
                if shared.debug_output {
                    info!("Button {} pressed on {}", index, shared.address);
                } else {
                    debug!("Button {} pressed on {}", index, shared.address);
                }
                shared.emit(MonitorEvent::ButtonPressed { index });
            }

            for edge in step.forwards {
                shared.forwarder.forward(edge).await;
                shared.scanner.lock().commit_forward(edge);
            }

            match step.suspend {
                Suspend::Debounce(delay) => tokio::time::sleep(delay).await,
                Suspend::NextTick => break,
            }
        }
    }
}

async fn analog_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.read().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let (channel, dead_zone) = {
            let config = shared.config.read();
            (config.channel_index, config.dead_zone)
        };
        let movement = shared.movement.read().clone();

        let value = shared.tracker.poll_analog(&shared.address, channel);
        let orientation = shared.reference_orientation(movement.reference);

        let Some(delta) = analog::movement_vector(value, dead_zone, &movement, orientation) else {
            continue;
        };

        if shared.debug_output {
            info!("Analog input value {:.3} on channel {}", value, channel);
        }
        shared.sink.translate(delta);
        shared.emit(MonitorEvent::Moved { channel, value, delta });
    }
}
