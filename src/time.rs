//! NTP fixed-point time arithmetic.
//!
//! `Time` is a 64-bit unsigned count of NTP seconds since 1900-01-01:
//! high 32 bits whole seconds, low 32 bits fraction (~233 ps resolution).
//! `Delta` is a signed difference in the same units. All arithmetic is
//! wrapping, so `t + (t2 - t)` reproduces `t2` exactly for any pair whose
//! difference fits in an i64.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Seconds between the NTP era origin (1900-01-01) and the Unix epoch.
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// One second in raw fixed-point units (2^32).
const UNIT: f64 = 4_294_967_296.0;

/// An absolute instant in NTP 32.32 fixed-point format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Time(u64);

/// A signed span between two `Time` values, same 32.32 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Delta(i64);

impl Time {
    pub const fn from_bits(bits: u64) -> Self {
        Time(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn new(seconds: u32, fraction: u32) -> Self {
        Time(((seconds as u64) << 32) | fraction as u64)
    }

    pub const fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn fraction(self) -> u32 {
        self.0 as u32
    }

    /// Build from a Unix timestamp (seconds + subsecond nanoseconds).
    pub fn from_unix(secs: u64, nanos: u32) -> Self {
        let whole = secs + NTP_UNIX_OFFSET;
        let frac = ((nanos as u64) << 32) / 1_000_000_000;
        Time((whole << 32) | frac)
    }

    /// Unix seconds as a float, fractional part included.
    pub fn to_unix_seconds(self) -> f64 {
        let secs = self.seconds() as i64 - NTP_UNIX_OFFSET as i64;
        secs as f64 + self.fraction() as f64 / UNIT
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = self.seconds() as i64 - NTP_UNIX_OFFSET as i64;
        let nanos = ((self.fraction() as u64 * 1_000_000_000) >> 32) as u32;
        Utc.timestamp_opt(secs, nanos).single()
    }

    /// ISO-8601 with nanosecond precision, or None outside chrono's range.
    pub fn to_iso8601(self) -> Option<String> {
        self.to_datetime()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    /// Midpoint of `self` and `other`, rounding like `Delta::half`.
    pub fn mid(self, other: Time) -> Time {
        self + (other - self).half()
    }
}

impl std::ops::Add<Delta> for Time {
    type Output = Time;

    fn add(self, rhs: Delta) -> Time {
        Time(self.0.wrapping_add(rhs.0 as u64))
    }
}

impl std::ops::Sub for Time {
    type Output = Delta;

    fn sub(self, rhs: Time) -> Delta {
        Delta(self.0.wrapping_sub(rhs.0) as i64)
    }
}

impl Delta {
    pub const ZERO: Delta = Delta(0);

    pub const fn from_bits(bits: i64) -> Self {
        Delta(bits)
    }

    pub const fn bits(self) -> i64 {
        self.0
    }

    pub fn from_seconds(secs: f64) -> Self {
        Delta((secs * UNIT).round() as i64)
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / UNIT
    }

    /// Integer halving, truncating toward zero.
    pub const fn half(self) -> Delta {
        Delta(self.0 / 2)
    }
}

impl std::ops::Add for Delta {
    type Output = Delta;

    fn add(self, rhs: Delta) -> Delta {
        Delta(self.0.wrapping_add(rhs.0))
    }
}

impl std::ops::Sub for Delta {
    type Output = Delta;

    fn sub(self, rhs: Delta) -> Delta {
        Delta(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Neg for Delta {
    type Output = Delta;

    fn neg(self) -> Delta {
        Delta(self.0.wrapping_neg())
    }
}

// ============================================================================
// TESTS
// ============================================================================
