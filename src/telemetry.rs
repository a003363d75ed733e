use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::matcher::MatchResult;
use crate::state::CastingState;

/// Window over which the actuation rate is computed
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Lifecycle of the loop thread as seen by the UI
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoopStatus {
    /// Not started yet, or stopped on request
    #[default]
    Idle,
    Running,
    /// Stopped itself after repeated capture failures; a new start is allowed
    Halted(String),
    ShutDown,
}

/// Copy-on-read view of the loop's counters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub state: CastingState,
    pub status: LoopStatus,
    /// Last confidence per template, in priority order
    pub confidences: Vec<(String, f32)>,
    /// Actuations during the last minute
    pub actuations_per_minute: usize,
    pub actuations_total: u64,
    pub ticks: u64,
    pub ticks_skipped: u64,
    pub capture_failures: u64,
    /// Capture-to-decision time of the last completed tick
    pub last_latency: Option<Duration>,
    pub last_error: Option<String>,
}

impl TelemetrySnapshot {
    pub fn confidence(&self, template: &str) -> Option<f32> {
        self.confidences
            .iter()
            .find(|(name, _)| name == template)
            .map(|(_, c)| *c)
    }
}

/// Read side, cheap to clone and share with UI threads
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    inner: Arc<RwLock<TelemetrySnapshot>>,
}

impl Telemetry {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner.read().clone()
    }
}

/// Write side, owned by the detection loop
#[derive(Debug, Default)]
pub struct TelemetryRecorder {
    shared: Telemetry,
    actuations: VecDeque<Instant>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for readers
    pub fn telemetry(&self) -> Telemetry {
        self.shared.clone()
    }

    pub fn set_state(&self, state: &CastingState) {
        self.shared.inner.write().state = state.clone();
    }

    pub fn set_status(&self, status: LoopStatus) {
        self.shared.inner.write().status = status;
    }

    /// Record a completed tick
    pub fn record_tick(&mut self, result: &MatchResult, latency: Duration, now: Instant) {
        self.prune(now);
        let mut snapshot = self.shared.inner.write();
        snapshot.ticks += 1;
        snapshot.last_latency = Some(latency);
        snapshot.confidences = result
            .scores
            .iter()
            .map(|s| (s.name.clone(), s.score))
            .collect();
        snapshot.actuations_per_minute = self.actuations.len();
    }

    pub fn record_skipped(&self, slots: u64) {
        if slots > 0 {
            self.shared.inner.write().ticks_skipped += slots;
        }
    }

    pub fn record_actuation(&mut self, at: Instant) {
        self.actuations.push_back(at);
        self.prune(at);
        let mut snapshot = self.shared.inner.write();
        snapshot.actuations_total += 1;
        snapshot.actuations_per_minute = self.actuations.len();
    }

    pub fn record_capture_failure(&self, message: String) {
        let mut snapshot = self.shared.inner.write();
        snapshot.capture_failures += 1;
        snapshot.last_error = Some(message);
    }

    pub fn record_error(&self, message: String) {
        self.shared.inner.write().last_error = Some(message);
    }

    /// Forget per-template confidences, e.g. after the template set changed
    pub fn clear_confidences(&self) {
        self.shared.inner.write().confidences.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.actuations.front() {
            if now.saturating_duration_since(*front) >= RATE_WINDOW {
                self.actuations.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Timing measurements for a single tick
#[derive(Debug, Clone, Copy, Default)]
pub struct IterationTiming {
    pub capture_us: f64,
    pub match_us: f64,
    pub decide_us: f64,
    pub dispatch_us: f64,
    pub total_us: f64,
}

impl IterationTiming {
    pub fn total_ms(&self) -> f64 {
        self.total_us / 1000.0
    }
}

/// Mean and percentiles of one stage, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StageStats {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Statistics collector for latency measurements
#[derive(Debug, Default)]
pub struct LatencyStats {
    timings: Vec<IterationTiming>,
}

impl LatencyStats {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timings: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, timing: IterationTiming) {
        self.timings.push(timing);
    }

    pub fn len(&self) -> usize {
        self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    /// Calculate percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx]
    }

    pub fn stage_stats(&self, extract: impl Fn(&IterationTiming) -> f64) -> StageStats {
        if self.timings.is_empty() {
            return StageStats::default();
        }

        let mut values: Vec<f64> = self.timings.iter().map(&extract).collect();
        values.sort_by(|a, b| a.total_cmp(b));

        StageStats {
            mean: values.iter().sum::<f64>() / values.len() as f64,
            p50: Self::percentile(&values, 50.0),
            p95: Self::percentile(&values, 95.0),
            p99: Self::percentile(&values, 99.0),
        }
    }

    /// Log a benchmark report; `budget` is the per-tick target (interval / 2)
    pub fn print_report(&self, budget: Duration) {
        if self.timings.is_empty() {
            tracing::info!("No timing data collected");
            return;
        }

        tracing::info!("Latency benchmark: {} iterations", self.timings.len());

        let stages = [
            ("Capture", self.stage_stats(|t| t.capture_us)),
            ("Match", self.stage_stats(|t| t.match_us)),
            ("Decide", self.stage_stats(|t| t.decide_us)),
            ("Dispatch", self.stage_stats(|t| t.dispatch_us)),
        ];
        let total = self.stage_stats(|t| t.total_us);

        tracing::info!("{:<10} {:>10} {:>10} {:>10} {:>10}", "Stage", "Mean", "p50", "p95", "p99");
        for (name, stats) in &stages {
            Self::print_row(name, stats);
        }
        Self::print_row("TOTAL", &total);

        let p95_ms = total.p95 / 1000.0;
        let budget_ms = budget.as_secs_f64() * 1000.0;
        if p95_ms < budget_ms {
            tracing::info!("Tick budget met: p95 {:.2} ms < {:.2} ms", p95_ms, budget_ms);
        } else {
            tracing::warn!("Tick budget missed: p95 {:.2} ms >= {:.2} ms", p95_ms, budget_ms);
        }

        if let Some((name, stats)) = stages.iter().max_by(|a, b| a.1.p95.total_cmp(&b.1.p95)) {
            tracing::info!("Bottleneck: {} ({:.0} µs p95)", name, stats.p95);
        }
    }

    fn print_row(name: &str, stats: &StageStats) {
        tracing::info!(
            "{:<10} {:>7.0} µs {:>7.0} µs {:>7.0} µs {:>7.0} µs",
            name,
            stats.mean,
            stats.p50,
            stats.p95,
            stats.p99
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::TemplateScore;

    fn result_with(scores: &[(&str, f32)]) -> MatchResult {
        let mut result = MatchResult::none(0.0, Instant::now());
        result.scores = scores
            .iter()
            .map(|(name, score)| TemplateScore {
                name: name.to_string(),
                score: *score,
                location: (0, 0),
            })
            .collect();
        result
    }

    #[test]
    fn test_snapshot_is_copy_on_read() {
        let mut recorder = TelemetryRecorder::new();
        let telemetry = recorder.telemetry();

        let before = telemetry.snapshot();
        recorder.record_tick(&result_with(&[("N5", 0.42)]), Duration::from_millis(3), Instant::now());

        assert_eq!(before.ticks, 0);
        let after = telemetry.snapshot();
        assert_eq!(after.ticks, 1);
        assert_eq!(after.confidence("N5"), Some(0.42));
        assert_eq!(after.last_latency, Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_actuation_rate_uses_sliding_minute() {
        let mut recorder = TelemetryRecorder::new();
        let t0 = Instant::now();

        recorder.record_actuation(t0);
        recorder.record_actuation(t0 + Duration::from_secs(30));
        assert_eq!(recorder.telemetry().snapshot().actuations_per_minute, 2);

        recorder.record_tick(&result_with(&[]), Duration::ZERO, t0 + Duration::from_secs(61));
        let snapshot = recorder.telemetry().snapshot();
        assert_eq!(snapshot.actuations_per_minute, 1);
        assert_eq!(snapshot.actuations_total, 2);
    }

    #[test]
    fn test_counters() {
        let recorder = TelemetryRecorder::new();
        assert_eq!(recorder.telemetry().snapshot().status, LoopStatus::Idle);
        recorder.record_skipped(0);
        recorder.record_skipped(3);
        recorder.record_capture_failure("minimized".to_string());
        recorder.set_status(LoopStatus::Halted("gone".to_string()));

        let snapshot = recorder.telemetry().snapshot();
        assert_eq!(snapshot.ticks_skipped, 3);
        assert_eq!(snapshot.capture_failures, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("minimized"));
        assert_eq!(snapshot.status, LoopStatus::Halted("gone".to_string()));
    }

    #[test]
    fn test_iteration_timing_total_ms() {
        let timing = IterationTiming {
            total_us: 50000.0,
            ..IterationTiming::default()
        };
        assert_eq!(timing.total_ms(), 50.0);
    }

    #[test]
    fn test_latency_stats_percentiles() {
        let mut stats = LatencyStats::with_capacity(100);
        assert!(stats.is_empty());

        for i in 1..=100 {
            stats.add(IterationTiming {
                total_us: i as f64,
                ..IterationTiming::default()
            });
        }
        assert_eq!(stats.len(), 100);

        let total = stats.stage_stats(|t| t.total_us);
        assert_eq!(total.mean, 50.5);
        assert_eq!(total.p50, 51.0);
        assert_eq!(total.p99, 99.0);
    }
}
