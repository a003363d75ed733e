use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rdev::{simulate, EventType, Key};

use super::keys::Keybind;
use crate::error::ActuationError;

/// Pause between pressing the modifiers of a chord and its main key
const MODIFIER_SETTLE: Duration = Duration::from_millis(20);

/// Low-level key event injection
pub trait KeySimulator: Send {
    fn key_down(&mut self, key: Key) -> Result<(), ActuationError>;
    fn key_up(&mut self, key: Key) -> Result<(), ActuationError>;
}

/// Injects key events through the OS input API
///
/// # Platform notes
/// - macOS: the process needs Accessibility permission or events are dropped
/// - Windows: events cannot reach windows of elevated processes unless this
///   process is elevated too
/// - Linux: X11 only (XTest)
#[derive(Debug, Default)]
pub struct RdevSimulator;

impl RdevSimulator {
    fn send(&self, event: EventType, key: Key) -> Result<(), ActuationError> {
        simulate(&event).map_err(|e| ActuationError::Rejected {
            key: format!("{:?}", key),
            reason: format!("{:?}", e),
        })
    }
}

impl KeySimulator for RdevSimulator {
    fn key_down(&mut self, key: Key) -> Result<(), ActuationError> {
        self.send(EventType::KeyPress(key), key)
    }

    fn key_up(&mut self, key: Key) -> Result<(), ActuationError> {
        self.send(EventType::KeyRelease(key), key)
    }
}

/// A key event seen by [`RecordingSimulator`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    Down(Key),
    Up(Key),
}

/// Records key events instead of injecting them; used for dry runs and tests
#[derive(Debug, Clone, Default)]
pub struct RecordingSimulator {
    actions: Arc<Mutex<VecDeque<(KeyAction, Instant)>>>,
    reject: Option<Key>,
    /// Oldest events are dropped past this many
    limit: Option<usize>,
}

impl RecordingSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the most recent `limit` events, for long dry runs
    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Reject every key-down of `key`, as a privilege-less OS would
    pub fn rejecting(key: Key) -> Self {
        Self {
            reject: Some(key),
            ..Self::default()
        }
    }

    pub fn actions(&self) -> Vec<KeyAction> {
        self.actions.lock().iter().map(|(a, _)| *a).collect()
    }

    pub fn timed_actions(&self) -> Vec<(KeyAction, Instant)> {
        self.actions.lock().iter().copied().collect()
    }

    fn record(&self, action: KeyAction) {
        let mut actions = self.actions.lock();
        actions.push_back((action, Instant::now()));
        if let Some(limit) = self.limit {
            while actions.len() > limit {
                actions.pop_front();
            }
        }
    }

    /// Number of key-down events for `key`
    pub fn presses_of(&self, key: Key) -> usize {
        self.actions
            .lock()
            .iter()
            .filter(|(a, _)| *a == KeyAction::Down(key))
            .count()
    }
}

impl KeySimulator for RecordingSimulator {
    fn key_down(&mut self, key: Key) -> Result<(), ActuationError> {
        if self.reject == Some(key) {
            return Err(ActuationError::Rejected {
                key: format!("{:?}", key),
                reason: "rejected by recorder".to_string(),
            });
        }
        self.record(KeyAction::Down(key));
        Ok(())
    }

    fn key_up(&mut self, key: Key) -> Result<(), ActuationError> {
        self.record(KeyAction::Up(key));
        Ok(())
    }
}

/// Presses keybinds: down, hold, up
///
/// Each press is a bounded blocking call lasting roughly the hold duration
/// (plus the modifier settle time for chords, plus any wait imposed by the
/// minimum press interval).
pub struct InputDispatcher {
    simulator: Box<dyn KeySimulator>,
    min_interval: Duration,
    last_press: Option<Instant>,
}

impl InputDispatcher {
    pub fn new(simulator: Box<dyn KeySimulator>, min_interval: Duration) -> Self {
        Self {
            simulator,
            min_interval,
            last_press: None,
        }
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    /// Worst-case time `press` blocks for this keybind, excluding the interval wait
    pub fn budget(&self, keybind: &Keybind) -> Duration {
        if keybind.chord.modifiers().is_empty() {
            keybind.hold
        } else {
            keybind.hold + MODIFIER_SETTLE
        }
    }

    /// Press the keybind's chord. Keys already pressed are released again if
    /// any step fails, so nothing is left stuck down.
    pub fn press(&mut self, keybind: &Keybind) -> Result<(), ActuationError> {
        if let Some(last) = self.last_press {
            let since = last.elapsed();
            if since < self.min_interval {
                thread::sleep(self.min_interval - since);
            }
        }
        self.last_press = Some(Instant::now());

        let keys = keybind.chord.press_order();
        let mut pressed: Vec<Key> = Vec::with_capacity(keys.len());

        for (i, key) in keys.iter().enumerate() {
            if let Err(e) = self.simulator.key_down(*key) {
                self.release(&pressed);
                return Err(e);
            }
            pressed.push(*key);

            let is_last = i + 1 == keys.len();
            if !is_last {
                thread::sleep(MODIFIER_SETTLE);
            }
        }

        thread::sleep(keybind.hold);

        match self.release(&pressed) {
            Some(e) => Err(e),
            None => {
                tracing::debug!("Pressed {} for {:?}", keybind.chord, keybind.hold);
                Ok(())
            }
        }
    }

    /// Release keys in reverse press order; returns the first failure
    fn release(&mut self, pressed: &[Key]) -> Option<ActuationError> {
        let mut first_error = None;
        for key in pressed.iter().rev() {
            if let Err(e) = self.simulator.key_up(*key) {
                tracing::warn!("Failed to release {:?}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        first_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(recorder: &RecordingSimulator, min_interval_ms: u64) -> InputDispatcher {
        InputDispatcher::new(Box::new(recorder.clone()), Duration::from_millis(min_interval_ms))
    }

    #[test]
    fn test_single_key_press() {
        let recorder = RecordingSimulator::new();
        let mut dispatcher = dispatcher(&recorder, 0);

        let bind = Keybind::parse("N5", "1", 5).unwrap();
        let started = Instant::now();
        dispatcher.press(&bind).unwrap();

        assert!(started.elapsed() >= Duration::from_millis(5));
        assert_eq!(
            recorder.actions(),
            vec![KeyAction::Down(Key::Num1), KeyAction::Up(Key::Num1)]
        );
    }

    #[test]
    fn test_chord_releases_in_reverse_order() {
        let recorder = RecordingSimulator::new();
        let mut dispatcher = dispatcher(&recorder, 0);

        dispatcher.press(&Keybind::parse("N1", "ctrl+alt+3", 0).unwrap()).unwrap();
        assert_eq!(
            recorder.actions(),
            vec![
                KeyAction::Down(Key::ControlLeft),
                KeyAction::Down(Key::Alt),
                KeyAction::Down(Key::Num3),
                KeyAction::Up(Key::Num3),
                KeyAction::Up(Key::Alt),
                KeyAction::Up(Key::ControlLeft),
            ]
        );
    }

    #[test]
    fn test_rejected_key_releases_pressed_modifiers() {
        let recorder = RecordingSimulator::rejecting(Key::Num3);
        let mut dispatcher = dispatcher(&recorder, 0);

        let err = dispatcher
            .press(&Keybind::parse("N1", "alt+3", 0).unwrap())
            .unwrap_err();
        assert!(matches!(err, ActuationError::Rejected { .. }));
        assert_eq!(
            recorder.actions(),
            vec![KeyAction::Down(Key::Alt), KeyAction::Up(Key::Alt)]
        );
    }

    #[test]
    fn test_minimum_interval_between_presses() {
        let recorder = RecordingSimulator::new();
        let mut dispatcher = dispatcher(&recorder, 30);
        let bind = Keybind::parse("N5", "1", 0).unwrap();

        dispatcher.press(&bind).unwrap();
        dispatcher.press(&bind).unwrap();

        let downs: Vec<Instant> = recorder
            .timed_actions()
            .into_iter()
            .filter(|(a, _)| matches!(a, KeyAction::Down(_)))
            .map(|(_, at)| at)
            .collect();
        assert_eq!(downs.len(), 2);
        assert!(downs[1] - downs[0] >= Duration::from_millis(30));
    }

    #[test]
    fn test_bounded_recorder_keeps_latest_events() {
        let recorder = RecordingSimulator::bounded(4);
        let mut dispatcher = dispatcher(&recorder, 0);

        for key in ["1", "2", "3"] {
            dispatcher.press(&Keybind::parse("N5", key, 0).unwrap()).unwrap();
        }
        assert_eq!(
            recorder.actions(),
            vec![
                KeyAction::Down(Key::Num2),
                KeyAction::Up(Key::Num2),
                KeyAction::Down(Key::Num3),
                KeyAction::Up(Key::Num3),
            ]
        );
        assert_eq!(recorder.presses_of(Key::Num1), 0);
    }

    #[test]
    fn test_budget_includes_settle_for_chords() {
        let dispatcher = dispatcher(&RecordingSimulator::new(), 0);
        let plain = Keybind::parse("A", "1", 50).unwrap();
        let chord = Keybind::parse("B", "alt+1", 50).unwrap();
        assert_eq!(dispatcher.budget(&plain), Duration::from_millis(50));
        assert!(dispatcher.budget(&chord) > Duration::from_millis(50));
    }
}
