//! Watches a screen region for spell icons and presses the bound key when one
//! appears.
//!
//! Per tick: capture the region, score it against every template, let the
//! casting state machine decide, and press the keybind of the winner.

pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod hotkeys;
pub mod input;
pub mod matcher;
pub mod messaging;
pub mod state;
pub mod telemetry;
pub mod templates;

pub use capture::{CaptureSource, Frame, Region, ReplayCapture, ScreenCapture};
pub use config::{AppConfig, ConfigSource, DetectionSettings, ResolvedConfig, Tuning};
pub use detection::{DetectionCore, DetectionHandle, DetectionLoop};
pub use error::{ActuationError, CaptureError, ConfigurationError, DetectionError, MatchError};
pub use input::{InputDispatcher, KeyChord, Keybind};
pub use matcher::{AbsDiff, MatchMethod, MatchResult, MatchStrategy, Matcher, Zncc};
pub use messaging::{Command, Event, EventBus};
pub use state::{CastingState, CastingStateMachine, CooldownScope};
pub use telemetry::{Telemetry, TelemetrySnapshot};
pub use templates::{Template, TemplatePlan, TemplateSet, TemplateStore};
