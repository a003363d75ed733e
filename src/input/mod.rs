/// Keyboard actuation
///
/// Turns a matched template's keybind into simulated key events.

pub mod dispatcher;
pub mod keys;

pub use dispatcher::{InputDispatcher, KeyAction, KeySimulator, RdevSimulator, RecordingSimulator};
pub use keys::{key_from_name, KeyChord, Keybind};
