/// Event types broadcast by the detection loop and the hotkey listener
///
/// Events represent things that have happened (past tense).
/// They are broadcast to all subscribers.
use std::time::Instant;

use crate::state::CastingState;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Casting state machine moved between states
    StateChanged { from: CastingState, to: CastingState },

    /// A keybind was pressed for a matched template
    Actuated {
        template: String,
        key: String,
        confidence: f32,
        timestamp: Instant,
    },

    /// Key simulation was rejected; the state still moved to cooling
    ActuationFailed { template: String, message: String },

    /// A tick was skipped because the region could not be captured
    CaptureFailed { message: String, consecutive: u32 },

    /// Detection stopped itself after repeated capture failures
    Halted { reason: String },

    /// A reload was refused and the previous configuration kept
    ConfigurationRejected { message: String },

    /// A reload was applied between ticks
    ConfigurationReloaded { templates: usize },

    /// The visibility hotkey was pressed
    VisibilityToggled,

    /// The detection loop has exited
    Shutdown,
}

impl Event {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            Event::StateChanged { from, to } => format!("State: {} -> {}", from, to),
            Event::Actuated {
                template,
                key,
                confidence,
                ..
            } => format!("Cast {} ({}) at {:.3}", template, key, confidence),
            Event::ActuationFailed { template, message } => {
                format!("Failed to cast {}: {}", template, message)
            }
            Event::CaptureFailed {
                message,
                consecutive,
            } => format!("Capture failed ({} in a row): {}", consecutive, message),
            Event::Halted { reason } => format!("Detection halted: {}", reason),
            Event::ConfigurationRejected { message } => {
                format!("Configuration rejected: {}", message)
            }
            Event::ConfigurationReloaded { templates } => {
                format!("Configuration reloaded ({} templates)", templates)
            }
            Event::VisibilityToggled => "Visibility toggled".to_string(),
            Event::Shutdown => "Shutting down".to_string(),
        }
    }
}
