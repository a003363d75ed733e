/// Commands accepted by the detection loop
///
/// Commands represent requests to perform actions (imperative). They are
/// queued and applied by the loop thread between ticks, never mid-tick.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enable casting (`Idle -> Armed`); no-op when already running
    Start,

    /// Disable casting and cancel any cooldown
    Stop,

    /// `Idle -> Armed`, otherwise `-> Idle`
    Toggle,

    /// Re-read templates and settings, applied at the next tick boundary
    Reload,

    /// Exit the loop thread
    Shutdown,
}

impl Command {
    /// Get a human-readable description of the command
    pub fn description(&self) -> &'static str {
        match self {
            Command::Start => "Start casting",
            Command::Stop => "Stop casting",
            Command::Toggle => "Toggle casting",
            Command::Reload => "Reload configuration",
            Command::Shutdown => "Shut down detection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_description() {
        assert_eq!(Command::Stop.description(), "Stop casting");
        assert_eq!(Command::Reload.description(), "Reload configuration");
    }
}
