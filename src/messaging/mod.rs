/// Messaging module for Event/Command architecture
///
/// - **Commands**: requests into the detection loop (imperative, queued)
/// - **Events**: notifications out of it (past tense, broadcast)
///
/// ## Architecture
///
/// ```text
/// ┌──────────┐   Command    ┌────────────────┐    Event     ┌───────────┐
/// │ Hotkeys  │ ───────────> │ Detection loop │ ───────────> │ Event Bus │
/// │ / UI     │   (queue)    │ (tick thread)  │              │           │
/// └──────────┘              └────────────────┘              └───────────┘
///                                                                 │
///                                                                 ▼
///                                                           ┌──────────┐
///                                                           │ Loggers, │
///                                                           │ UI, etc. │
///                                                           └──────────┘
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// let bus = EventBus::new();
/// let (rx, _id) = bus.subscribe();
///
/// let core = DetectionCore::new(source, capture, matcher, dispatcher, bus.clone());
/// let handle = DetectionLoop::spawn(core)?;
/// handle.toggle()?;
///
/// while let Ok(event) = rx.recv() {
///     match event {
///         Event::Actuated { template, .. } => { /* ... */ }
///         _ => {}
///     }
/// }
/// ```

pub mod bus;
pub mod commands;
pub mod events;

// Re-export commonly used types
pub use bus::{EventBus, SubscriberId};
pub use commands::Command;
pub use events::Event;
