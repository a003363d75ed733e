//! Domain errors for the detection core, using thiserror for structured error handling.
//!
//! Only `ConfigurationError` is fatal (to `start()`); every per-tick error is
//! logged by the loop and the next tick proceeds.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture region {0} is outside every display")]
    OutOfBounds(crate::capture::Region),

    #[error("Target window '{0}' is minimized")]
    TargetMinimized(String),

    #[error("Target window '{0}' not found")]
    TargetNotFound(String),

    #[error("No displays found")]
    NoDisplays,

    #[error("Display capture API unavailable: {0}")]
    Unavailable(String),

    #[error("Captured frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("Template '{0}' has a zero-size reference image")]
    EmptyImage(String),

    #[error("Template '{name}' ({width}x{height}) does not fit inside the {region_width}x{region_height} region")]
    DoesNotFit {
        name: String,
        width: u32,
        height: u32,
        region_width: u32,
        region_height: u32,
    },

    #[error("Template name must not be empty")]
    EmptyName,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuationError {
    #[error("Input simulation rejected {key}: {reason}")]
    Rejected { key: String, reason: String },

    #[error("Unknown key name: {0}")]
    UnknownKey(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Invalid capture region: {0} (width and height must be > 0)")]
    EmptyRegion(crate::capture::Region),

    #[error("Capture region {0} is outside the display bounds")]
    RegionOutOfBounds(crate::capture::Region),

    #[error("Keybind references unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("Template '{0}' has more than one keybind")]
    DuplicateKeybind(String),

    #[error("Duplicate template name '{0}'")]
    DuplicateTemplate(String),

    #[error("Threshold for '{name}' is {value} (must be 0.0-1.0)")]
    ThresholdOutOfRange { name: String, value: f32 },

    #[error("Detection frequency {0} Hz is invalid (must be within 0.01..=1000)")]
    InvalidFrequency(f64),

    #[error("Template set is empty")]
    NoTemplates,

    #[error(transparent)]
    Template(#[from] MatchError),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Detection loop has shut down")]
    LoopClosed,

    #[error("Failed to start detection thread")]
    ThreadSpawnFailed(#[source] std::io::Error),
}
