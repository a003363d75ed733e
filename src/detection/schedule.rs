use std::time::{Duration, Instant};

/// Fixed-rate tick slots
///
/// Slots are `start + k * interval`. When a tick overruns, every slot whose
/// time has already passed is dropped and counted instead of being run late,
/// so the loop never builds a backlog and never drifts off its phase.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    interval: Duration,
    next: Instant,
}

impl TickSchedule {
    /// First slot is at `start`
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval: interval.max(Duration::from_micros(1)),
            next: start,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next tick should run
    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    /// Move past the slot that just ran. `now` is when the tick finished.
    /// Returns the number of slots skipped because they were already stale.
    pub fn advance(&mut self, now: Instant) -> u64 {
        self.next += self.interval;
        if now <= self.next {
            return 0;
        }

        let interval = self.interval.as_nanos();
        let behind = (now - self.next).as_nanos();
        let skipped = behind / interval + 1;

        // Next slot strictly after `now`, keeping the phase
        let until_next = interval - behind % interval;
        self.next = now + Duration::from_nanos(until_next as u64);
        u64::try_from(skipped).unwrap_or(u64::MAX)
    }
}
