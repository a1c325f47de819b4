//! Counter clock: an affine map from the host's free-running hardware
//! counter onto NTP wall time.
//!
//! The model is `time_at(index) = time0 + (index - index0) / frequency`.
//! Corrections are split into three orthogonal operations:
//! - `adjust_origin` moves the numeric pivot without changing the map,
//! - `adjust_offset` shifts `time0` by a duration,
//! - `adjust_frequency` scales `frequency` by `(1 - adj)`.
//!
//! Each operation preserves the invariants of the other two, which lets the
//! discipline step compose them freely.

use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::time::{Delta, Time};
use crate::traits::{CounterSource, WallClock};

/// Consecutive reads taken to estimate counter granularity.
const PRECISION_PROBES: usize = 32;

/// Fallback when the calibration probe is degenerate (zero elapsed time).
const DEFAULT_FREQUENCY: f64 = 1_000_000_000.0;

/// A signed reading of the hardware counter at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct ClockIndex(pub i64);

/// Difference between two counter readings, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClockDiff(pub i64);

impl ClockDiff {
    pub const ZERO: ClockDiff = ClockDiff(0);

    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Integer halving, truncating toward zero.
    pub const fn half(self) -> ClockDiff {
        ClockDiff(self.0 / 2)
    }
}

impl std::ops::Sub for ClockIndex {
    type Output = ClockDiff;

    fn sub(self, rhs: ClockIndex) -> ClockDiff {
        ClockDiff(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Add<ClockDiff> for ClockIndex {
    type Output = ClockIndex;

    fn add(self, rhs: ClockDiff) -> ClockIndex {
        ClockIndex(self.0.wrapping_add(rhs.0))
    }
}

impl std::ops::Sub for ClockDiff {
    type Output = ClockDiff;

    fn sub(self, rhs: ClockDiff) -> ClockDiff {
        ClockDiff(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Add for ClockDiff {
    type Output = ClockDiff;

    fn add(self, rhs: ClockDiff) -> ClockDiff {
        ClockDiff(self.0.wrapping_add(rhs.0))
    }
}

/// Affine counter-to-wall-time model. One per monitored server, plus the
/// freshly calibrated copy every server starts from.
#[derive(Debug, Clone)]
pub struct Clock {
    time0: Time,
    index0: ClockIndex,
    frequency: f64,
    precision: u64,
}

impl Clock {
    pub fn new(time0: Time, index0: ClockIndex, frequency: f64) -> Self {
        Clock {
            time0,
            index0,
            frequency,
            precision: 0,
        }
    }

    /// Probe the counter against the wall clock to estimate its frequency,
    /// then capture the model origin. The origin pair is read back-to-back
    /// so `time0` really is the wall time at `index0`.
    pub fn calibrate(
        counter: &dyn CounterSource,
        wall: &dyn WallClock,
        probe: Duration,
    ) -> Clock {
        let idx_a = counter.now();
        let wall_a = wall.now();
        if !probe.is_zero() {
            thread::sleep(probe);
        }
        let index0 = counter.now();
        let time0 = wall.now();

        let ticks = (index0 - idx_a).ticks() as f64;
        let secs = (time0 - wall_a).as_seconds();
        let frequency = if ticks > 0.0 && secs > 0.0 {
            ticks / secs
        } else {
            DEFAULT_FREQUENCY
        };

        // Granularity burst: smallest non-zero step between consecutive reads.
        let mut precision = u64::MAX;
        let mut prev = counter.now();
        for _ in 0..PRECISION_PROBES {
            let cur = counter.now();
            let step = (cur - prev).ticks();
            if step > 0 {
                precision = precision.min(step as u64);
            }
            prev = cur;
        }
        if precision == u64::MAX {
            precision = 0;
        }

        Clock {
            time0,
            index0,
            frequency,
            precision,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn precision(&self) -> u64 {
        self.precision
    }

    pub fn time_at(&self, index: ClockIndex) -> Time {
        self.time0 + Delta::from_seconds(self.diff_seconds(index - self.index0))
    }

    /// Inverse affine map, rounded to the nearest tick.
    pub fn index_at(&self, time: Time) -> ClockIndex {
        let ticks = ((time - self.time0).as_seconds() * self.frequency).round() as i64;
        self.index0 + ClockDiff(ticks)
    }

    pub fn diff_seconds(&self, diff: ClockDiff) -> f64 {
        diff.ticks() as f64 / self.frequency
    }

    /// Move the origin to `index` while leaving the map unchanged there.
    /// Keeps `index - index0` small so the f64 conversion stays exact.
    pub fn adjust_origin(&mut self, index: ClockIndex) {
        self.time0 = self.time_at(index);
        self.index0 = index;
    }

    /// Shift the whole map forward by `offset`.
    pub fn adjust_offset(&mut self, offset: Delta) {
        self.time0 = self.time0 + offset;
    }

    /// Scale the tick rate by `(1 - adj)`. A positive `adj` (local clock
    /// gaining on the remote) slows the map down. `time0` and `index0` are
    /// untouched, so the map pivots at the current origin.
    pub fn adjust_frequency(&mut self, adj: f64) {
        self.frequency *= 1.0 - adj;
    }

    /// Direct override, for calibration and tests. Corrections must go
    /// through `adjust_frequency` so they compose with the sign convention.
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }
}

/// Hardware counter reader. On Unix this is `CLOCK_MONOTONIC_RAW`, which
/// the kernel never slews, so our frequency estimate measures the real
/// oscillator. Elsewhere it falls back to `Instant` ticks.
pub struct RawCounter {
    fallback: Instant,
}

impl RawCounter {
    pub fn new() -> Self {
        RawCounter {
            fallback: Instant::now(),
        }
    }
}

impl Default for RawCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for RawCounter {
    fn now(&self) -> ClockIndex {
        #[cfg(unix)]
        if let Ok(ts) = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC_RAW) {
            let nanos = (ts.tv_sec() as i64)
                .wrapping_mul(1_000_000_000)
                .wrapping_add(ts.tv_nsec() as i64);
            return ClockIndex(nanos);
        }
        ClockIndex(self.fallback.elapsed().as_nanos() as i64)
    }
}

pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> Time {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Time::from_unix(d.as_secs(), d.subsec_nanos()),
            // Host clock before 1970; report the era origin rather than panic.
            Err(_) => Time::from_bits(0),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
