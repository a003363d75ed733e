use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::core::DetectionCore;
use super::schedule::TickSchedule;
use crate::capture::Region;
use crate::config::ConfigSource;
use crate::error::DetectionError;
use crate::messaging::Command;
use crate::telemetry::Telemetry;

/// Runs a [`DetectionCore`] on its own thread
pub struct DetectionLoop;

impl DetectionLoop {
    /// Start the loop thread. Casting starts `Idle`; call `start()` on the
    /// returned handle to arm it.
    pub fn spawn(core: DetectionCore) -> Result<DetectionHandle, DetectionError> {
        let (tx, rx) = unbounded();
        let telemetry = core.telemetry();
        let source = core.config_source().clone();
        let displays = core.displays().to_vec();

        let thread = thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || run(core, rx))
            .map_err(DetectionError::ThreadSpawnFailed)?;

        info!("Detection loop started");
        Ok(DetectionHandle {
            commands: tx,
            telemetry,
            source,
            displays,
            thread: Some(thread),
        })
    }
}

fn run(mut core: DetectionCore, commands: Receiver<Command>) {
    let mut schedule: Option<TickSchedule> = None;

    loop {
        if core.is_shut_down() {
            break;
        }

        // Idle: nothing to capture, wait for a command
        if !core.is_running() {
            schedule = None;
            match commands.recv() {
                Ok(command) => {
                    // Rejections are already logged and published by the core
                    let _ = core.apply(command);
                }
                Err(_) => break,
            }
            continue;
        }

        let deadline = schedule
            .get_or_insert_with(|| TickSchedule::new(core.interval(), Instant::now()))
            .next_deadline();

        // Commands are only applied here, between ticks
        match commands.recv_deadline(deadline) {
            Ok(command) => {
                let reschedule = command == Command::Reload;
                let _ = core.apply(command);
                if reschedule {
                    schedule = None;
                }
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let report = core.tick(Instant::now());
        if report.halted {
            continue;
        }

        if let Some(schedule) = schedule.as_mut() {
            let skipped = schedule.advance(Instant::now());
            core.record_skipped(skipped);
        }
    }

    // Handle dropped without an explicit shutdown
    let _ = core.apply(Command::Shutdown);
    debug!("Detection thread exiting");
}

/// Control surface for a running detection loop
///
/// Every operation enqueues a command; the loop applies it at the next tick
/// boundary. Dropping the handle shuts the loop down.
pub struct DetectionHandle {
    commands: Sender<Command>,
    telemetry: Telemetry,
    source: ConfigSource,
    displays: Vec<Region>,
    thread: Option<JoinHandle<()>>,
}

impl DetectionHandle {
    /// Arm casting. Fails immediately with a configuration error when the
    /// current templates and settings do not resolve.
    pub fn start(&self) -> Result<(), DetectionError> {
        self.source.resolve(&self.displays)?;
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<(), DetectionError> {
        self.send(Command::Stop)
    }

    pub fn toggle(&self) -> Result<(), DetectionError> {
        self.send(Command::Toggle)
    }

    /// Re-read templates and settings between ticks
    pub fn reload(&self) -> Result<(), DetectionError> {
        self.send(Command::Reload)
    }

    /// True while casting is `Armed` or `Cooling`, as of the last applied command
    pub fn is_running(&self) -> bool {
        self.telemetry.snapshot().state.is_running()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn config_source(&self) -> &ConfigSource {
        &self.source
    }

    /// Sender for other signal sources (hotkeys, UI) to feed the queue
    pub fn commands(&self) -> Sender<Command> {
        self.commands.clone()
    }

    /// Stop the loop thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.join();
    }

    fn send(&self, command: Command) -> Result<(), DetectionError> {
        self.commands
            .send(command)
            .map_err(|_| DetectionError::LoopClosed)
    }

    fn join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if thread.join().is_err() {
            warn!("Detection thread panicked");
        }
    }
}

impl Drop for DetectionHandle {
    fn drop(&mut self) {
        self.join();
    }
}
