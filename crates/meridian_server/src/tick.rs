//! # Tick Scheduler
//!
//! Fixed-timestep driver for the simulation, with clamped delta time and
//! lag statistics. The loop itself lives in the harness; this type owns the
//! timing arithmetic so it stays testable without sleeping.

use std::time::{Duration, Instant};

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Minimum tick duration observed, in microseconds.
    pub min_tick_us: u64,
    /// Maximum tick duration observed, in microseconds.
    pub max_tick_us: u64,
    /// Rolling average tick duration, in microseconds.
    pub avg_tick_us: u64,
    /// Ticks that overran their budget.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

/// Fixed-timestep tick scheduler.
pub struct TickScheduler {
    tick_interval: Duration,
    max_delta: Duration,
    last_tick: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

impl TickScheduler {
    /// Creates a scheduler for a target rate with a delta-time clamp.
    #[must_use]
    pub fn new(target_fps: u32, max_delta: Duration) -> Self {
        let tick_interval = Duration::from_micros(1_000_000 / u64::from(target_fps.max(1)));
        Self {
            tick_interval,
            max_delta,
            last_tick: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats {
                min_tick_us: u64::MAX,
                ..TickStats::default()
            },
        }
    }

    /// Whether enough time has accumulated for a tick.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_tick);
        self.last_tick = now;
        self.accumulator >= self.tick_interval
    }

    /// Starts a tick and returns the clamped delta time in seconds.
    ///
    /// The wall-clock delta is bounded by the configured maximum so a long
    /// stall cannot explode the integrators.
    #[must_use]
    pub fn begin_tick(&mut self) -> (Instant, f64) {
        let dt = self.accumulator.min(self.max_delta);
        self.accumulator = self.accumulator.saturating_sub(self.tick_interval);
        // A stall longer than the clamp is simply forfeited.
        if self.accumulator > self.max_delta {
            self.accumulator = self.max_delta;
        }
        self.tick_count += 1;
        (Instant::now(), dt.as_secs_f64())
    }

    /// Ends a tick, recording its duration.
    pub fn end_tick(&mut self, started: Instant) {
        let duration_us = started.elapsed().as_micros() as u64;
        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;
        if started.elapsed() > self.tick_interval {
            self.stats.late_ticks += 1;
            tracing::trace!(duration_us, "late tick");
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let elapsed = self.last_tick.elapsed();
        if elapsed < self.tick_interval {
            std::thread::sleep(self.tick_interval - elapsed);
        }
    }

    /// Ticks executed so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// The configured tick interval.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}
