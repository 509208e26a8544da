//! # Tick Loop
//!
//! Paces the control loop at a fixed rate. Time owed to missed ticks
//! accumulates, so a stalled loop runs back-to-back ticks until it has
//! caught up rather than drifting. Overruns are counted, not corrected.

use std::time::{Duration, Instant};

use crate::DEFAULT_TICK_RATE;

/// Fixed-rate pacing for [`super::SyncApp`].
pub struct TickLoop {
    /// Budget per tick.
    tick_duration: Duration,
    /// When `owed` last caught up with the clock.
    last_poll: Instant,
    /// Elapsed time not yet spent on ticks.
    owed: Duration,
    /// Ticks begun.
    tick_count: u64,
    stats: TickStats,
}

/// How long ticks took, in microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Fastest tick.
    pub min_tick_us: u64,
    /// Slowest tick.
    pub max_tick_us: u64,
    /// Exponential average, 1/16 weight per sample.
    pub avg_tick_us: u64,
    /// Ticks over budget.
    pub late_ticks: u64,
    /// Ticks timed.
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(budget),
            late_ticks: 0,
            total_ticks: 0,
        }
    }

    fn record(&mut self, took_us: u64, late: bool) {
        self.total_ticks += 1;
        self.min_tick_us = self.min_tick_us.min(took_us);
        self.max_tick_us = self.max_tick_us.max(took_us);
        self.avg_tick_us = (self.avg_tick_us * 15 + took_us) / 16;
        self.late_ticks += u64::from(late);
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// Creates a tick loop running at `tick_rate` Hz (at least 1).
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            last_poll: Instant::now(),
            owed: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Returns true while ticks are owed.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.owed += now.duration_since(self.last_poll);
        self.last_poll = now;
        self.owed >= self.tick_duration
    }

    /// Marks the start of a tick. Returns the start time for
    /// [`TickLoop::end_tick`].
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.owed = self.owed.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Records how long the tick begun at `start` took.
    pub fn end_tick(&mut self, start: Instant) {
        let took = start.elapsed();
        self.stats.record(duration_us(took), took > self.tick_duration);
    }

    /// Sleeps off the remainder of the current budget.
    pub fn wait_for_next_tick(&self) {
        let elapsed = self.last_poll.elapsed() + self.owed;
        if elapsed < self.tick_duration {
            std::thread::sleep(self.tick_duration - elapsed);
        }
    }

    /// Ticks begun so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing so far.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Budget per tick.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Starts timing afresh; the tick count is kept.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.tick_duration);
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_loop_creation() {
        let pacer = TickLoop::new(60);
        assert_eq!(pacer.tick_count(), 0);
        assert_eq!(pacer.tick_duration(), Duration::from_micros(16666));
        assert_eq!(TickLoop::new(0).tick_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_tick_execution() {
        let mut pacer = TickLoop::new(1000);
        std::thread::sleep(Duration::from_millis(5));

        assert!(pacer.should_tick());
        let start = pacer.begin_tick();
        pacer.end_tick(start);

        assert_eq!(pacer.tick_count(), 1);
        assert_eq!(pacer.stats().total_ticks, 1);
    }

    #[test]
    fn test_catches_up_after_stall() {
        let mut pacer = TickLoop::new(1000);
        std::thread::sleep(Duration::from_millis(10));

        let mut ran = 0;
        while pacer.should_tick() && ran < 100 {
            let start = pacer.begin_tick();
            pacer.end_tick(start);
            ran += 1;
        }
        assert!(ran >= 5, "ran {ran}");
    }

    #[test]
    fn test_late_ticks_counted() {
        let mut pacer = TickLoop::new(1000);
        let start = pacer.begin_tick();
        std::thread::sleep(Duration::from_millis(3));
        pacer.end_tick(start);

        assert_eq!(pacer.stats().late_ticks, 1);
        pacer.reset_stats();
        assert_eq!(pacer.stats().total_ticks, 0);
    }
}
