//! One detection step at a time: commands and ticks.
//!
//! `DetectionCore` owns every piece of per-run state (capture source, matcher,
//! dispatcher, state machine, resolved config). The loop thread drives it; tests
//! drive it directly with synthetic instants.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::capture::{CaptureSource, Region};
use crate::config::{ConfigSource, ResolvedConfig};
use crate::error::{ActuationError, CaptureError, ConfigurationError};
use crate::input::InputDispatcher;
use crate::matcher::{MatchResult, Matcher, ThresholdPolicy};
use crate::messaging::{Command, Event, EventBus};
use crate::state::{Actuation, CastingState, CastingStateMachine, StateChange};
use crate::telemetry::{IterationTiming, LatencyStats, LoopStatus, Telemetry, TelemetryRecorder};

/// Tick interval used before any configuration has been resolved
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    /// `None` when the tick did not get as far as matching
    pub result: Option<MatchResult>,
    pub actuation: Option<Actuation>,
    pub actuation_error: Option<ActuationError>,
    pub capture_error: Option<CaptureError>,
    /// Detection halted itself during this tick
    pub halted: bool,
    pub timing: IterationTiming,
}

pub struct DetectionCore {
    capture: Box<dyn CaptureSource>,
    matcher: Matcher,
    dispatcher: InputDispatcher,
    machine: CastingStateMachine,
    source: ConfigSource,
    config: Option<ResolvedConfig>,
    policy: ThresholdPolicy,
    displays: Vec<Region>,
    bus: EventBus,
    recorder: TelemetryRecorder,
    consecutive_failures: u32,
    slow_matches: u64,
    shut_down: bool,
}

impl DetectionCore {
    pub fn new(
        source: ConfigSource,
        capture: Box<dyn CaptureSource>,
        matcher: Matcher,
        dispatcher: InputDispatcher,
        bus: EventBus,
    ) -> Self {
        let displays = capture.display_bounds();
        let params = source.settings().tuning.casting_params();
        Self {
            capture,
            matcher,
            dispatcher,
            machine: CastingStateMachine::new(params, Vec::new()),
            source,
            config: None,
            policy: ThresholdPolicy::default(),
            displays,
            bus,
            recorder: TelemetryRecorder::new(),
            consecutive_failures: 0,
            slow_matches: 0,
            shut_down: false,
        }
    }

    pub fn state(&self) -> &CastingState {
        self.machine.state()
    }

    pub fn is_running(&self) -> bool {
        self.machine.is_running()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn telemetry(&self) -> Telemetry {
        self.recorder.telemetry()
    }

    pub fn config_source(&self) -> &ConfigSource {
        &self.source
    }

    /// Display rectangles used for region validation
    pub fn displays(&self) -> &[Region] {
        &self.displays
    }

    pub fn config(&self) -> Option<&ResolvedConfig> {
        self.config.as_ref()
    }

    pub fn interval(&self) -> Duration {
        self.config
            .as_ref()
            .map(ResolvedConfig::interval)
            .unwrap_or(DEFAULT_INTERVAL)
    }

    /// Apply one queued command. Only a start that cannot resolve its
    /// configuration fails; the state machine then stays `Idle`.
    pub fn apply(&mut self, command: Command) -> Result<(), ConfigurationError> {
        debug!("Command: {}", command.description());
        match command {
            Command::Start => self.start(),
            Command::Stop => {
                self.stop();
                Ok(())
            }
            Command::Toggle => {
                if self.machine.is_running() {
                    self.stop();
                    Ok(())
                } else {
                    self.start()
                }
            }
            Command::Reload => {
                self.reload();
                Ok(())
            }
            Command::Shutdown => {
                self.shutdown();
                Ok(())
            }
        }
    }

    fn start(&mut self) -> Result<(), ConfigurationError> {
        if self.machine.is_running() {
            return Ok(());
        }

        let config = match self.source.resolve(&self.displays) {
            Ok(config) => config,
            Err(e) => {
                warn!("Refusing to start: {}", e);
                self.recorder.record_error(e.to_string());
                self.bus.publish(Event::ConfigurationRejected {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.install(config);
        self.consecutive_failures = 0;
        self.recorder.set_status(LoopStatus::Running);

        let change = self.machine.start();
        self.publish_change(change);
        Ok(())
    }

    fn stop(&mut self) {
        let change = self.machine.stop();
        if change.is_some() {
            self.recorder.set_status(LoopStatus::Idle);
        }
        self.publish_change(change);
    }

    fn reload(&mut self) {
        match self.source.resolve(&self.displays) {
            Ok(config) => {
                let templates = config.templates().len();
                self.install(config);
                self.recorder.clear_confidences();
                info!("Configuration reloaded: {} templates", templates);
                self.bus.publish(Event::ConfigurationReloaded { templates });
            }
            Err(e) => {
                warn!("Reload rejected, keeping previous configuration: {}", e);
                self.recorder.record_error(e.to_string());
                self.bus.publish(Event::ConfigurationRejected {
                    message: e.to_string(),
                });
            }
        }
    }

    fn install(&mut self, config: ResolvedConfig) {
        self.machine
            .configure(config.casting_params(), config.keybinds().iter().cloned());
        self.dispatcher
            .set_min_interval(Duration::from_millis(config.tuning().min_press_interval_ms));
        self.policy = config.threshold_policy();
        info!(
            "Detecting {} templates in {} at {} Hz with {} ({:?} cooldown, {:?} scope)",
            config.templates().len(),
            config.region(),
            config.tuning().frequency_hz,
            self.matcher.strategy_name(),
            config.casting_params().cooldown,
            config.tuning().cooldown_scope
        );
        self.config = Some(config);
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        let change = self.machine.stop();
        self.publish_change(change);
        self.shut_down = true;
        self.recorder.set_status(LoopStatus::ShutDown);
        self.bus.publish(Event::Shutdown);
        info!("Detection loop shut down");
    }

    /// Count slots dropped by the scheduler
    pub fn record_skipped(&self, slots: u64) {
        if slots > 0 {
            debug!("Skipped {} stale tick(s)", slots);
        }
        self.recorder.record_skipped(slots);
    }

    /// One tick: capture, match, decide, maybe press. Does nothing while `Idle`.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        if !self.machine.is_running() {
            return report;
        }
        let Some(config) = self.config.as_ref() else {
            return report;
        };

        let tick_start = Instant::now();
        let region = *config.region();

        let frame = match self.capture.capture(&region) {
            Ok(frame) => frame,
            Err(e) => {
                report.timing.capture_us = tick_start.elapsed().as_micros() as f64;
                let change = self.machine.expire(now);
                self.publish_change(change);
                report.halted = self.capture_failed(&e);
                report.capture_error = Some(e);
                return report;
            }
        };
        self.consecutive_failures = 0;
        report.timing.capture_us = tick_start.elapsed().as_micros() as f64;

        let match_start = Instant::now();
        let result = self.matcher.match_with(&frame, config.templates(), &self.policy);
        let match_elapsed = match_start.elapsed();
        report.timing.match_us = match_elapsed.as_micros() as f64;

        let budget = config.interval() / 2;
        if match_elapsed > budget {
            self.slow_matches += 1;
            if self.slow_matches % 100 == 1 {
                warn!(
                    "Match pass took {:?}, over the {:?} budget ({} slow passes so far)",
                    match_elapsed, budget, self.slow_matches
                );
            }
        }

        debug!(
            "Tick: best={} confidence={:.3} scores={:?}",
            result.label(),
            result.confidence,
            result.scores.iter().map(|s| (&s.name, s.score)).collect::<Vec<_>>()
        );

        let decide_start = Instant::now();
        let decision = self.machine.tick(&result, now);
        report.timing.decide_us = decide_start.elapsed().as_micros() as f64;
        self.publish_change(decision.change);

        self.recorder
            .record_tick(&result, tick_start.elapsed(), now);

        if let Some(actuation) = decision.actuation {
            let dispatch_start = Instant::now();
            match self.dispatcher.press(&actuation.keybind) {
                Ok(()) => {
                    info!(
                        "Cast {} -> {} (confidence {:.3})",
                        actuation.template, actuation.keybind.chord, actuation.confidence
                    );
                    self.recorder.record_actuation(now);
                    self.bus.publish(Event::Actuated {
                        template: actuation.template.clone(),
                        key: actuation.keybind.chord.to_string(),
                        confidence: actuation.confidence,
                        timestamp: now,
                    });
                }
                Err(e) => {
                    warn!("Failed to cast {}: {}", actuation.template, e);
                    self.recorder.record_error(e.to_string());
                    self.bus.publish(Event::ActuationFailed {
                        template: actuation.template.clone(),
                        message: e.to_string(),
                    });
                    report.actuation_error = Some(e);
                }
            }
            report.timing.dispatch_us = dispatch_start.elapsed().as_micros() as f64;
            report.actuation = Some(actuation);
        }

        report.timing.total_us = tick_start.elapsed().as_micros() as f64;
        report.result = Some(result);
        report
    }

    /// Returns true when the failure halted detection
    fn capture_failed(&mut self, e: &CaptureError) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let consecutive = self.consecutive_failures;
        warn!("Capture failed ({} in a row): {}", consecutive, e);
        self.recorder.record_capture_failure(e.to_string());
        self.bus.publish(Event::CaptureFailed {
            message: e.to_string(),
            consecutive,
        });

        let limit = self
            .config
            .as_ref()
            .map(|c| c.tuning().max_capture_failures)
            .unwrap_or(0);
        if consecutive <= limit {
            return false;
        }

        let reason = format!("{} consecutive capture failures, last: {}", consecutive, e);
        error!("Halting detection: {}", reason);
        let change = self.machine.stop();
        self.publish_change(change);
        self.consecutive_failures = 0;
        self.recorder.set_status(LoopStatus::Halted(reason.clone()));
        self.bus.publish(Event::Halted { reason });
        true
    }

    fn publish_change(&self, change: Option<StateChange>) {
        let Some(StateChange { from, to }) = change else {
            return;
        };
        info!("State: {} -> {}", from, to);
        self.recorder.set_state(&to);
        self.bus.publish(Event::StateChanged { from, to });
    }

    /// Capture and match `frames` times without touching the state machine
    /// or the keyboard, collecting per-stage latency
    pub fn bench(&mut self, frames: usize) -> Result<LatencyStats, ConfigurationError> {
        let config = self.source.resolve(&self.displays)?;
        let policy = config.threshold_policy();
        let mut stats = LatencyStats::with_capacity(frames);

        for i in 0..frames {
            let tick_start = Instant::now();
            let frame = match self.capture.capture(config.region()) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Bench capture {} failed: {}", i, e);
                    continue;
                }
            };
            let capture_us = tick_start.elapsed().as_micros() as f64;

            let match_start = Instant::now();
            let result = self.matcher.match_with(&frame, config.templates(), &policy);
            let match_us = match_start.elapsed().as_micros() as f64;

            debug!("Bench frame {}: {} ({:.3})", i, result.label(), result.confidence);
            stats.add(IterationTiming {
                capture_us,
                match_us,
                total_us: tick_start.elapsed().as_micros() as f64,
                ..IterationTiming::default()
            });
        }

        Ok(stats)
    }
}
