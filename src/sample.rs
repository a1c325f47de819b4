//! One NTP round trip, pinned by four timestamps: host counter at send
//! (`t1`), server receive/transmit wall times (`t2`, `t3`), host counter at
//! arrival (`t4`).

use crate::clock::{Clock, ClockDiff, ClockIndex};
use crate::time::{Delta, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub t1: ClockIndex,
    pub t2: Time,
    pub t3: Time,
    pub t4: ClockIndex,
}

impl Sample {
    /// Total host-counter time elapsed for the request/reply. Non-negative
    /// for any sample the transport produces, since `t4` is read after `t1`
    /// on the same counter.
    pub fn roundtrip(&self) -> ClockDiff {
        self.t4 - self.t1
    }

    /// Time the server spent holding the request.
    pub fn server_delay(&self) -> Delta {
        self.t3 - self.t2
    }

    /// Midpoint of the server's receive and transmit stamps.
    pub fn remote_time(&self) -> Time {
        self.t2.mid(self.t3)
    }

    /// Counter reading at the midpoint of the round trip.
    pub fn local_index(&self) -> ClockIndex {
        self.t1 + (self.t4 - self.t1).half()
    }

    /// Local wall time at the round-trip midpoint, under `clock`.
    pub fn local_time(&self, clock: &Clock) -> Time {
        clock.time_at(self.local_index())
    }

    /// Remote minus local at the midpoint: positive when the server's clock
    /// is ahead of our model.
    pub fn offset(&self, clock: &Clock) -> Delta {
        self.remote_time() - self.local_time(clock)
    }

    pub fn offset_seconds(&self, clock: &Clock) -> f64 {
        self.offset(clock).as_seconds()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midpoint_offset() {
        // t1=100, t4=200 counter ticks; server stamps 150 s and 160 s;
        // identity clock (1 tick = 1 s, origin at the era start)
        let sample = Sample {
            t1: ClockIndex(100),
            t2: Time::new(150, 0),
            t3: Time::new(160, 0),
            t4: ClockIndex(200),
        };
        let clock = Clock::new(Time::new(0, 0), ClockIndex(0), 1.0);

        assert_eq!(sample.roundtrip(), ClockDiff(100));
        assert_eq!(sample.remote_time(), Time::new(155, 0));
        assert_eq!(sample.local_index(), ClockIndex(150));
        assert_eq!(sample.local_time(&clock), Time::new(150, 0));
        assert!((sample.offset_seconds(&clock) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_offset() {
        // server behind the local model
        let sample = Sample {
            t1: ClockIndex(0),
            t2: Time::new(90, 0),
            t3: Time::new(90, 0),
            t4: ClockIndex(0),
        };
        let clock = Clock::new(Time::new(100, 0), ClockIndex(0), 1.0);
        assert!((sample.offset_seconds(&clock) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_server_delay() {
        let sample = Sample {
            t1: ClockIndex(0),
            t2: Time::new(10, 0),
            t3: Time::new(10, 1 << 31),
            t4: ClockIndex(0),
        };
        assert!((sample.server_delay().as_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_roundtrip_non_negative_when_ordered() {
        let sample = Sample {
            t1: ClockIndex(1_000_000),
            t2: Time::new(0, 0),
            t3: Time::new(0, 0),
            t4: ClockIndex(1_000_000),
        };
        // zero-width round trip is the degenerate minimum
        assert_eq!(sample.roundtrip(), ClockDiff::ZERO);
        assert_eq!(sample.local_index(), sample.t1);
    }
}
