//! Fixed-timestep clock.
//!
//! Wall-clock time is fed into an accumulator once per outer loop
//! iteration; every whole tick it holds becomes one simulation step. Step
//! size is therefore constant no matter how irregular the frame or poll
//! cadence is, and the accumulator works in whole nanoseconds so no
//! floating-point drift builds up over a long session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for the simulation tick loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
    /// Upper bound on steps run for a single `advance`. Time beyond it is
    /// dropped. `None` never drops time.
    pub max_steps_per_advance: Option<u32>,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
            max_steps_per_advance: None,
        }
    }
}

impl TickConfig {
    /// Set the target ticks per second.
    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Stop after `max_ticks` ticks (0 = unlimited).
    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Cap the steps run for a single `advance`.
    #[must_use]
    pub fn with_max_steps_per_advance(mut self, max_steps: u32) -> Self {
        self.max_steps_per_advance = Some(max_steps);
        self
    }

    /// Returns `true` if `tick_rate` describes a usable tick length.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.tick_rate.is_finite()
            && self.tick_rate > 0.0
            && Duration::try_from_secs_f64(1.0 / self.tick_rate).is_ok_and(|d| !d.is_zero())
    }

    /// Length of one tick. Falls back to the default rate if `tick_rate`
    /// is not [valid](Self::is_valid).
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        if self.is_valid() {
            Duration::from_secs_f64(1.0 / self.tick_rate)
        } else {
            Duration::from_secs_f64(1.0 / Self::default().tick_rate)
        }
    }

    /// Returns `true` once `ticks` reaches a nonzero `max_ticks`.
    #[must_use]
    pub fn is_finished(&self, ticks: u64) -> bool {
        self.max_ticks > 0 && ticks >= self.max_ticks
    }
}

/// Accumulates elapsed time and hands it out in whole ticks.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick: Duration,
    accumulator: Duration,
    max_steps: Option<u32>,
    steps: u64,
    dropped: Duration,
}

impl FixedTimestep {
    /// Panics if `tick` is zero.
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        assert!(!tick.is_zero(), "tick length must be nonzero");
        Self {
            tick,
            accumulator: Duration::ZERO,
            max_steps: None,
            steps: 0,
            dropped: Duration::ZERO,
        }
    }

    /// A clock with the configured tick length and step clamp.
    #[must_use]
    pub fn from_config(config: &TickConfig) -> Self {
        let timestep = Self::new(config.tick_duration());
        match config.max_steps_per_advance {
            Some(max_steps) => timestep.with_max_steps(max_steps),
            None => timestep,
        }
    }

    /// Clamp the backlog to `max_steps` ticks per [`accumulate`](Self::accumulate).
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps.max(1));
        self
    }

    /// Length of one tick.
    #[must_use]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Tick length in seconds, as handed to systems.
    #[must_use]
    pub fn tick_secs(&self) -> f32 {
        self.tick.as_secs_f32()
    }

    /// Time waiting to be consumed.
    #[must_use]
    pub fn accumulated(&self) -> Duration {
        self.accumulator
    }

    /// Steps consumed so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Total time discarded by the step clamp.
    #[must_use]
    pub fn dropped(&self) -> Duration {
        self.dropped
    }

    /// Time left until the accumulator holds a whole tick.
    #[must_use]
    pub fn until_next_tick(&self) -> Duration {
        self.tick.saturating_sub(self.accumulator)
    }

    /// How far the clock is into the next tick, in `[0, 1)`.
    #[must_use]
    pub fn alpha(&self) -> f32 {
        (self.accumulator.as_secs_f64() / self.tick.as_secs_f64()) as f32
    }

    /// Add elapsed wall-clock time. Returns the time discarded by the step
    /// clamp, which is zero unless one is configured.
    pub fn accumulate(&mut self, dt: Duration) -> Duration {
        self.accumulator = self.accumulator.saturating_add(dt);
        let Some(max_steps) = self.max_steps else {
            return Duration::ZERO;
        };
        let cap = self.tick.saturating_mul(max_steps);
        if self.accumulator <= cap {
            return Duration::ZERO;
        }
        // Keep the fractional part so alpha stays meaningful.
        let fraction = Duration::from_nanos((self.accumulator.as_nanos() % self.tick.as_nanos()) as u64);
        let kept = cap + fraction;
        let excess = self.accumulator - kept;
        self.accumulator = kept;
        self.dropped += excess;
        warn!(
            dropped_ms = excess.as_millis() as u64,
            max_steps,
            "simulation fell behind, dropping time"
        );
        excess
    }

    /// Take one tick from the accumulator if it holds one.
    pub fn consume(&mut self) -> bool {
        if self.accumulator >= self.tick {
            self.accumulator -= self.tick;
            self.steps += 1;
            true
        } else {
            false
        }
    }

    /// Accumulate `dt` and consume every whole tick. Returns the number of
    /// steps the caller should run.
    pub fn advance(&mut self, dt: Duration) -> u32 {
        self.accumulate(dt);
        let mut steps = 0;
        while self.consume() {
            steps += 1;
        }
        steps
    }
}
