//! Global hotkeys
//!
//! Listens to system-wide key events so casting can be toggled while the game
//! has focus. Signals are forwarded as commands into the detection loop's queue
//! (toggle) or as events on the bus (visibility); nothing here touches the
//! state machine directly.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use rdev::{listen, Event as InputEvent, EventType, Key};

use crate::config::HotkeySettings;
use crate::error::ActuationError;
use crate::input::KeyChord;
use crate::messaging::{Command, Event, EventBus};

/// What a hotkey asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    ToggleCasting,
    ToggleVisibility,
}

impl Signal {
    pub fn description(&self) -> &'static str {
        match self {
            Signal::ToggleCasting => "Toggle casting",
            Signal::ToggleVisibility => "Show/hide window",
        }
    }
}

/// Treat left/right variants of a modifier as the same key
fn canonical(key: Key) -> Key {
    match key {
        Key::ControlRight => Key::ControlLeft,
        Key::ShiftRight => Key::ShiftLeft,
        Key::MetaRight => Key::MetaLeft,
        Key::AltGr => Key::Alt,
        other => other,
    }
}

/// Turns raw key events into signals
///
/// Holding a key produces a stream of presses from the OS; only the first
/// press of a held key counts.
pub struct HotkeyMatcher {
    bindings: Vec<(KeyChord, Signal)>,
    held: Vec<Key>,
}

impl HotkeyMatcher {
    pub fn new(bindings: Vec<(KeyChord, Signal)>) -> Self {
        Self {
            bindings,
            held: Vec::new(),
        }
    }

    /// Parse the configured hotkeys
    pub fn from_settings(settings: &HotkeySettings) -> Result<Self, ActuationError> {
        Ok(Self::new(vec![
            (settings.toggle.parse()?, Signal::ToggleCasting),
            (settings.visibility.parse()?, Signal::ToggleVisibility),
        ]))
    }

    pub fn bindings(&self) -> &[(KeyChord, Signal)] {
        &self.bindings
    }

    pub fn on_event(&mut self, event: &EventType) -> Option<Signal> {
        match event {
            EventType::KeyPress(key) => {
                let key = canonical(*key);
                if self.held.contains(&key) {
                    return None;
                }
                self.held.push(key);

                self.bindings
                    .iter()
                    .find(|(chord, _)| {
                        canonical(chord.key()) == key
                            && chord
                                .modifiers()
                                .iter()
                                .all(|m| self.held.contains(&canonical(*m)))
                    })
                    .map(|(_, signal)| *signal)
            }
            EventType::KeyRelease(key) => {
                let key = canonical(*key);
                self.held.retain(|k| *k != key);
                None
            }
            _ => None,
        }
    }
}

/// Spawn the listener thread
///
/// The OS hook blocks for the life of the process, so the thread is detached.
pub fn start_hotkey_listener(
    mut matcher: HotkeyMatcher,
    commands: Sender<Command>,
    bus: EventBus,
) -> Result<()> {
    for (chord, signal) in matcher.bindings() {
        tracing::info!("  {} - {}", chord, signal.description());
    }

    std::thread::Builder::new()
        .name("hotkey-listener".to_string())
        .spawn(move || {
            let callback = move |event: InputEvent| {
                let Some(signal) = matcher.on_event(&event.event_type) else {
                    return;
                };
                tracing::debug!("Hotkey: {}", signal.description());
                match signal {
                    Signal::ToggleCasting => {
                        if commands.send(Command::Toggle).is_err() {
                            tracing::warn!("Toggle hotkey ignored: detection loop has shut down");
                        }
                    }
                    Signal::ToggleVisibility => {
                        bus.publish(Event::VisibilityToggled);
                    }
                }
            };

            if let Err(e) = listen(callback) {
                tracing::error!("Error setting up keyboard listener: {:?}", e);
            }
        })
        .context("Failed to spawn hotkey listener thread")?;

    tracing::info!("✓ Global hotkey listener started");
    Ok(())
}
