/// State management module
///
/// The casting state machine and the session it owns. Only the detection loop
/// mutates these; everyone else sees copies.

pub mod casting;
pub mod session;

// Re-export commonly used types
pub use casting::{Actuation, CastingState, CastingStateMachine, Decision, StateChange};
pub use session::{CastingParams, CooldownScope, SessionSnapshot};
