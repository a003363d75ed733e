/// Detection module
///
/// The tick pipeline and the thread that runs it.
///
/// ## Architecture
///
/// ```text
/// DetectionLoop (thread, command queue, TickSchedule)
///   └── DetectionCore
///       ├── CaptureSource   region -> frame
///       ├── Matcher         frame -> match result
///       ├── CastingStateMachine   result -> actuation?
///       └── InputDispatcher actuation -> key events
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// let core = DetectionCore::new(source, Box::new(ScreenCapture::new()), Matcher::default(), dispatcher, bus);
/// let handle = DetectionLoop::spawn(core)?;
/// handle.start()?;
/// ```

pub mod core;
pub mod runner;
pub mod schedule;

// Re-export commonly used types
pub use self::core::{DetectionCore, TickReport};
pub use runner::{DetectionHandle, DetectionLoop};
pub use schedule::TickSchedule;
