use crate::clock::ClockIndex;
use crate::time::Time;

/// Free-running hardware counter. Readings are signed so an index may
/// legally fall on either side of a clock's origin after re-anchoring.
#[cfg_attr(test, mockall::automock)]
pub trait CounterSource: Send + Sync {
    fn now(&self) -> ClockIndex;
}

/// System wall clock, read only during calibration.
#[cfg_attr(test, mockall::automock)]
pub trait WallClock {
    fn now(&self) -> Time;
}
