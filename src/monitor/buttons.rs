//! Button scan state machine
//!
//! One scan visits indices `0..button_count`. A rising edge suspends the scan
//! for the debounce interval; the next [`ButtonScanner::step`] call resumes at
//! the following index. Special indices forward every qualifying transition,
//! independent of debounce.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::config::{ChannelConfig, EdgeMode, SpecialIndex};

/// State transition of a special button, handed to replication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEdge {
    pub index: usize,
    pub pressed: bool,
}

/// Where the scan suspends after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspend {
    /// Scan finished; wait for the next tick
    NextTick,
    /// Rising edge found; wait this long, then resume mid-scan
    Debounce(Duration),
}

/// Outcome of one [`ButtonScanner::step`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStep {
    /// Indices with a detected rising edge
    pub presses: Vec<usize>,
    /// Special-index transitions to replicate
    pub forwards: Vec<ButtonEdge>,
    pub suspend: Suspend,
}

/// Per-index edge detection with debounce windows
///
/// State survives loop restarts, so re-enabling the button loop with an
/// unchanged device never reports an edge twice.
#[derive(Debug)]
pub struct ButtonScanner {
    button_count: usize,
    debounce: Duration,
    special: Vec<SpecialIndex>,
    previous: Vec<bool>,
    debounce_until: Vec<Option<Instant>>,
    forwarded: HashMap<usize, bool>,
    cursor: usize,
}

impl ButtonScanner {
    pub fn new(config: &ChannelConfig) -> Self {
        let mut scanner = Self {
            button_count: 0,
            debounce: config.debounce(),
            special: Vec::new(),
            previous: Vec::new(),
            debounce_until: Vec::new(),
            forwarded: HashMap::new(),
            cursor: 0,
        };
        scanner.reconfigure(config);
        scanner
    }

    /// Apply a new channel config, keeping state of indices still in range
    pub fn reconfigure(&mut self, config: &ChannelConfig) {
        self.button_count = config.button_count;
        self.debounce = config.debounce();
        self.previous.resize(config.button_count, false);
        self.debounce_until.resize(config.button_count, None);

        self.special = config
            .special_indices
            .iter()
            .copied()
            .filter(|s| {
                let in_range = s.index < config.button_count;
                if !in_range {
                    warn!(
                        "Ignoring special index {} (only {} buttons scanned)",
                        s.index, config.button_count
                    );
                }
                in_range
            })
            .collect();

        let special = &self.special;
        self.forwarded
            .retain(|index, _| special.iter().any(|s| s.index == *index));
        self.cursor = 0;
    }

    /// Start the next step from index 0 (a fresh loop instance)
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Last accepted pressed state of `index`
    pub fn is_pressed(&self, index: usize) -> bool {
        self.previous.get(index).copied().unwrap_or(false)
    }

    /// Last forwarded state of a special index
    pub fn forwarded_state(&self, index: usize) -> Option<bool> {
        self.forwarded.get(&index).copied()
    }

    /// Record that `edge` reached the forwarder
    ///
    /// Until then the transition is offered again by every later scan, so a
    /// loop cancelled mid-forward never loses it.
    pub fn commit_forward(&mut self, edge: ButtonEdge) {
        if self.special_mode(edge.index).is_some() {
            self.forwarded.insert(edge.index, edge.pressed);
        }
    }

    fn special_mode(&self, index: usize) -> Option<EdgeMode> {
        self.special.iter().find(|s| s.index == index).map(|s| s.mode)
    }

    fn debouncing(&self, index: usize, now: Instant) -> bool {
        matches!(self.debounce_until[index], Some(until) if now < until)
    }

    /// Scan from the cursor until a rising edge or the end of the scan
    pub fn step(&mut self, now: Instant, mut read: impl FnMut(usize) -> bool) -> ScanStep {
        let mut forwards = Vec::new();

        while self.cursor < self.button_count {
            let index = self.cursor;
            self.cursor += 1;
            let raw = read(index);

            if let Some(mode) = self.special_mode(index) {
                let last = self.forwarded_state(index).unwrap_or(false);
                if raw != last {
                    if raw || mode == EdgeMode::AnyChange {
                        // Stays pending until the forward is committed
                        forwards.push(ButtonEdge { index, pressed: raw });
                    } else {
                        self.forwarded.insert(index, raw);
                    }
                }
            }

            if self.debouncing(index, now) {
                continue;
            }

            let was_pressed = std::mem::replace(&mut self.previous[index], raw);
            if raw && !was_pressed {
                self.debounce_until[index] = Some(now + self.debounce);
                return ScanStep {
                    presses: vec![index],
                    forwards,
                    suspend: Suspend::Debounce(self.debounce),
                };
            }
        }

        self.cursor = 0;
        ScanStep {
            presses: Vec::new(),
            forwards,
            suspend: Suspend::NextTick,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(button_count: usize) -> ChannelConfig {
        ChannelConfig {
            button_count,
            ..ChannelConfig::default()
        }
    }

    /// Run steps until the scan ends, advancing the clock across debounces
    fn full_scan(scanner: &mut ButtonScanner, now: &mut Instant, raw: &[bool]) -> (Vec<usize>, Vec<ButtonEdge>) {
        let mut presses = Vec::new();
        let mut forwards = Vec::new();
        loop {
            let step = scanner.step(*now, |i| raw.get(i).copied().unwrap_or(false));
            presses.extend(step.presses);
            for edge in step.forwards {
                scanner.commit_forward(edge);
                forwards.push(edge);
            }
            match step.suspend {
                Suspend::NextTick => return (presses, forwards),
                Suspend::Debounce(d) => *now += d,
            }
        }
    }

    fn only(index: usize, pressed: bool, count: usize) -> Vec<bool> {
        let mut raw = vec![false; count];
        raw[index] = pressed;
        raw
    }

    #[test]
    fn test_trigger_sequence_forwards_press_and_release() {
        let mut scanner = ButtonScanner::new(&config(6));
        let mut now = Instant::now();
        let mut forwards = Vec::new();

        for pressed in [false, true, true, false] {
            let (_, f) = full_scan(&mut scanner, &mut now, &only(5, pressed, 6));
            forwards.extend(f);
            now += Duration::from_millis(11);
        }

        assert_eq!(
            forwards,
            vec![
                ButtonEdge { index: 5, pressed: true },
                ButtonEdge { index: 5, pressed: false },
            ]
        );
    }

    #[test]
    fn test_press_release_reports_one_rising_edge_per_index() {
        for index in 0..6 {
            let mut scanner = ButtonScanner::new(&config(6));
            let mut now = Instant::now();

            let (presses, fwd_press) = full_scan(&mut scanner, &mut now, &only(index, true, 6));
            now += Duration::from_millis(11);
            let (releases, fwd_release) = full_scan(&mut scanner, &mut now, &only(index, false, 6));

            assert_eq!(presses, vec![index]);
            assert!(releases.is_empty());

            if index == 5 {
                assert_eq!(fwd_press, vec![ButtonEdge { index, pressed: true }]);
                assert_eq!(fwd_release, vec![ButtonEdge { index, pressed: false }]);
            } else {
                assert!(fwd_press.is_empty());
                assert!(fwd_release.is_empty());
            }
        }
    }

    #[test]
    fn test_rising_edge_suspends_and_resumes_mid_scan() {
        let mut scanner = ButtonScanner::new(&config(6));
        let now = Instant::now();
        let raw = [false, true, false, true, false, false];
        let mut visited = Vec::new();

        let step = scanner.step(now, |i| {
            visited.push(i);
            raw[i]
        });
        assert_eq!(step.presses, vec![1]);
        assert_eq!(step.suspend, Suspend::Debounce(Duration::from_millis(200)));
        assert_eq!(visited, vec![0, 1]);

        visited.clear();
        let later = now + Duration::from_millis(200);
        let step = scanner.step(later, |i| {
            visited.push(i);
            raw[i]
        });
        assert_eq!(step.presses, vec![3]);
        assert_eq!(visited, vec![2, 3]);

        visited.clear();
        let step = scanner.step(later + Duration::from_millis(200), |i| {
            visited.push(i);
            raw[i]
        });
        assert!(step.presses.is_empty());
        assert_eq!(step.suspend, Suspend::NextTick);
        assert_eq!(visited, vec![4, 5]);
    }

    #[test]
    fn test_flicker_inside_debounce_window_is_ignored() {
        let mut scanner = ButtonScanner::new(&config(3));
        let start = Instant::now();

        let step = scanner.step(start, |i| i == 0);
        assert_eq!(step.presses, vec![0]);

        // Raw signal drops and returns while the window is open
        for (offset_ms, raw) in [(50, false), (100, true), (150, false), (190, true)] {
            scanner.restart();
            let step = scanner.step(start + Duration::from_millis(offset_ms), |i| i == 0 && raw);
            assert!(step.presses.is_empty(), "edge reported at +{}ms", offset_ms);
        }

        // Held through the window: still no new edge afterwards
        scanner.restart();
        let step = scanner.step(start + Duration::from_millis(250), |i| i == 0);
        assert!(step.presses.is_empty());

        // Release then press after the window is a fresh edge
        scanner.restart();
        scanner.step(start + Duration::from_millis(300), |_| false);
        let step = scanner.step(start + Duration::from_millis(320), |i| i == 0);
        assert_eq!(step.presses, vec![0]);
    }

    #[test]
    fn test_trigger_release_forwarded_during_debounce() {
        let mut scanner = ButtonScanner::new(&config(6));
        let start = Instant::now();

        let step = scanner.step(start, |i| i == 5);
        assert_eq!(step.presses, vec![5]);
        assert_eq!(step.forwards, vec![ButtonEdge { index: 5, pressed: true }]);
        scanner.commit_forward(step.forwards[0]);

        scanner.restart();
        let step = scanner.step(start + Duration::from_millis(20), |_| false);
        assert_eq!(step.forwards, vec![ButtonEdge { index: 5, pressed: false }]);
    }

    #[test]
    fn test_rising_mode_forwards_presses_only() {
        let cfg = ChannelConfig {
            special_indices: vec![SpecialIndex { index: 2, mode: EdgeMode::Rising }],
            ..config(4)
        };
        let mut scanner = ButtonScanner::new(&cfg);
        let mut now = Instant::now();

        let (_, pressed) = full_scan(&mut scanner, &mut now, &only(2, true, 4));
        now += Duration::from_millis(11);
        let (_, released) = full_scan(&mut scanner, &mut now, &only(2, false, 4));

        assert_eq!(pressed, vec![ButtonEdge { index: 2, pressed: true }]);
        assert!(released.is_empty());
        assert_eq!(scanner.forwarded_state(2), Some(false));
    }

    #[test]
    fn test_out_of_range_special_index_is_ignored() {
        // Three buttons scanned, trigger index 5 never read
        let mut scanner = ButtonScanner::new(&config(3));
        let mut now = Instant::now();
        let mut reads = Vec::new();

        let step = scanner.step(now, |i| {
            reads.push(i);
            false
        });
        now += Duration::from_millis(11);

        assert!(step.forwards.is_empty());
        assert_eq!(reads, vec![0, 1, 2]);
        assert_eq!(scanner.forwarded_state(5), None);
        let (_, forwards) = full_scan(&mut scanner, &mut now, &[true, true, true, true, true, true]);
        assert!(forwards.is_empty());
    }

    #[test]
    fn test_restart_does_not_repeat_edges() {
        let mut scanner = ButtonScanner::new(&config(6));
        let mut now = Instant::now();
        let held = [true, false, false, false, false, true];

        let (presses, forwards) = full_scan(&mut scanner, &mut now, &held);
        assert_eq!(presses, vec![0, 5]);
        assert_eq!(forwards.len(), 1);

        // Loop toggled off and on with the same raw state
        scanner.restart();
        now += Duration::from_secs(1);
        let (presses, forwards) = full_scan(&mut scanner, &mut now, &held);
        assert!(presses.is_empty());
        assert!(forwards.is_empty());
    }

    #[test]
    fn test_reconfigure_keeps_state_in_range() {
        let mut scanner = ButtonScanner::new(&config(6));
        let mut now = Instant::now();
        full_scan(&mut scanner, &mut now, &[true, false, false, false, false, true]);
        assert!(scanner.is_pressed(0));

        scanner.reconfigure(&ChannelConfig {
            special_indices: vec![],
            ..config(2)
        });
        assert!(scanner.is_pressed(0));
        assert!(!scanner.is_pressed(5));
        assert_eq!(scanner.forwarded_state(5), None);
    }

    #[test]
    fn test_uncommitted_forward_is_offered_again() {
        let mut scanner = ButtonScanner::new(&config(6));
        let start = Instant::now();

        let step = scanner.step(start, |i| i == 5);
        assert_eq!(step.forwards, vec![ButtonEdge { index: 5, pressed: true }]);
        assert_eq!(scanner.forwarded_state(5), None);

        // Loop cancelled before the forward finished
        scanner.restart();
        let step = scanner.step(start + Duration::from_millis(20), |i| i == 5);
        assert!(step.presses.is_empty());
        assert_eq!(step.forwards, vec![ButtonEdge { index: 5, pressed: true }]);

        scanner.commit_forward(step.forwards[0]);
        assert_eq!(scanner.forwarded_state(5), Some(true));
        scanner.restart();
        let step = scanner.step(start + Duration::from_millis(40), |i| i == 5);
        assert!(step.forwards.is_empty());
    }
}
