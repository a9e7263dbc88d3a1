use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

/// A monotonic time source. Every time-driven structure in the engine (timers, the tile cache)
/// reads time through a clock so that tests and replays can drive it by hand.
pub trait Clock: Send + Sync {
    /// The time elapsed since this clock's epoch.
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`. The epoch is the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time, so a test can hand one
/// copy to the structure under test and advance another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Construct a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.nanos
            .fetch_add(delta.as_nanos() as u64, Ordering::AcqRel);
    }

    /// Jump to an absolute time. Going backwards is allowed but structures reading the clock
    /// treat a negative delta as zero.
    pub fn set(&self, time: Duration) {
        self.nanos.store(time.as_nanos() as u64, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

/// Fixed time step accumulator. Elapsed time is measured in (fractional) ticks of `step`;
/// each whole tick can then be consumed one at a time, which gives catch-up semantics when a
/// frame runs long.
#[derive(Debug, Clone, Copy)]
pub struct FixedStep {
    step: Duration,
    /// Accumulated time not yet consumed as ticks.
    accumulator: Duration,
}

impl FixedStep {
    /// Construct an accumulator for a given step. A zero step is clamped to one nanosecond.
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::from_nanos(1)),
            accumulator: Duration::ZERO,
        }
    }

    /// The configured step.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Add elapsed time to the accumulator.
    pub fn accumulate(&mut self, elapsed: Duration) {
        self.accumulator += elapsed;
    }

    /// Consume one whole tick if one is available.
    pub fn take_tick(&mut self) -> bool {
        if self.accumulator >= self.step {
            self.accumulator -= self.step;
            true
        } else {
            false
        }
    }

    /// Number of whole ticks currently accumulated.
    pub fn whole_ticks(&self) -> u64 {
        (self.accumulator.as_nanos() / self.step.as_nanos()) as u64
    }

    /// Drop everything accumulated, including the fractional remainder.
    pub fn clear(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_shares_time_between_clones() {
        // Given
        let clock = ManualClock::new();
        let other = clock.clone();

        // When
        clock.advance(Duration::from_millis(250));

        // Then
        assert_eq!(other.now(), Duration::from_millis(250));

        other.set(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn fixed_step_accumulates_whole_and_fractional_ticks() {
        // Given
        let mut step = FixedStep::new(Duration::from_millis(100));

        // When - two and a half steps elapse
        step.accumulate(Duration::from_millis(250));

        // Then
        assert_eq!(step.whole_ticks(), 2);
        assert!(step.take_tick());
        assert!(step.take_tick());
        assert!(!step.take_tick());

        // When - the remaining half combines with the next delta
        step.accumulate(Duration::from_millis(50));

        // Then
        assert!(step.take_tick());
        assert!(!step.take_tick());
    }

    #[test]
    fn fixed_step_clear_drops_remainder() {
        let mut step = FixedStep::new(Duration::from_millis(10));
        step.accumulate(Duration::from_millis(35));
        step.clear();
        assert_eq!(step.whole_ticks(), 0);
        step.accumulate(Duration::from_millis(5));
        assert!(!step.take_tick());
    }

    #[test]
    fn fixed_step_zero_step_is_clamped() {
        let step = FixedStep::new(Duration::ZERO);
        assert_eq!(step.step(), Duration::from_nanos(1));
    }
}
