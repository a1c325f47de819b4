//! Per-target server state: the sample ring, its cached window statistics,
//! and the server's own disciplined clock.

use log::debug;
use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::clock::{Clock, ClockDiff, ClockIndex};
use crate::discipline::{discipline, MAX_SAMPLES};
use crate::report::HistoryPoint;
use crate::sample::Sample;
use crate::wire::Packet;

pub struct Server {
    name: String,
    addr: SocketAddr,
    clock: Clock,
    /// Newest-first ring, bounded at `MAX_SAMPLES`.
    samples: VecDeque<Sample>,
    min_roundtrip: ClockDiff,
    base_error: ClockDiff,
    stratum: u8,
    reference_id: [u8; 4],
    /// Correlation token of the request currently awaiting its reply.
    in_flight: Option<ClockIndex>,
}

impl Server {
    /// A server starts from a fresh copy of the calibrated reference clock
    /// and owns its own model from then on.
    pub fn new(name: impl Into<String>, addr: SocketAddr, clock: Clock) -> Self {
        Server {
            name: name.into(),
            addr,
            clock,
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            min_roundtrip: ClockDiff::ZERO,
            base_error: ClockDiff::ZERO,
            stratum: 0,
            reference_id: [0; 4],
            in_flight: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn stratum(&self) -> u8 {
        self.stratum
    }

    pub fn reference_id(&self) -> [u8; 4] {
        self.reference_id
    }

    pub fn min_roundtrip(&self) -> ClockDiff {
        self.min_roundtrip
    }

    pub fn base_error(&self) -> ClockDiff {
        self.base_error
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Remember the counter reading stamped into an outgoing request.
    pub fn note_request(&mut self, t1: ClockIndex) {
        self.in_flight = Some(t1);
    }

    /// Accept a reply stamped with arrival index `t4`. Returns the new
    /// sample's offset (seconds) against the freshly disciplined clock, or
    /// None when the reply is unsolicited or fails the originate echo.
    pub fn take_reply(&mut self, t4: ClockIndex, packet: &Packet) -> Option<f64> {
        let Some(token) = self.in_flight.take() else {
            debug!("{}: unsolicited reply dropped", self.name);
            return None;
        };
        if packet.originate.bits() != token.0 as u64 {
            debug!("{}: originate echo mismatch, reply dropped", self.name);
            return None;
        }

        self.stratum = packet.stratum;
        self.reference_id = packet.reference_id;

        let sample = Sample {
            t1: token,
            t2: packet.receive,
            t3: packet.transmit,
            t4,
        };
        Some(self.add_sample(sample))
    }

    /// Append a sample, refresh the window statistics, and discipline the
    /// clock. Returns the sample's offset against the updated clock.
    pub fn add_sample(&mut self, sample: Sample) -> f64 {
        self.samples.push_front(sample);
        self.samples.truncate(MAX_SAMPLES);
        self.refresh_window();
        self.clock = discipline(
            &self.clock,
            &self.samples,
            self.min_roundtrip,
            self.base_error,
        );
        sample.offset_seconds(&self.clock)
    }

    /// Recompute `min_roundtrip` and `base_error` from the lower half of
    /// the window's round trips. Congestion spikes land in the upper half
    /// and cannot disturb either estimate.
    fn refresh_window(&mut self) {
        let mut rts: Vec<i64> = self.samples.iter().map(|s| s.roundtrip().ticks()).collect();
        if rts.is_empty() {
            return;
        }
        let half = (rts.len() + 1) / 2;
        rts.select_nth_unstable(half - 1);
        let lower = &rts[..half];

        self.min_roundtrip = ClockDiff(lower.iter().copied().min().unwrap_or(0));

        if lower.len() < 2 {
            self.base_error = ClockDiff::ZERO;
            return;
        }
        let m = lower.iter().sum::<i64>() as f64 / lower.len() as f64;
        let var = lower
            .iter()
            .map(|&r| (r as f64 - m).powi(2))
            .sum::<f64>()
            / (lower.len() as f64 - 1.0);
        self.base_error = ClockDiff((3.0 * var.sqrt()).round() as i64);
    }

    /// The last `n` samples as chart points, oldest first.
    pub fn history(&self, n: usize) -> Vec<HistoryPoint> {
        self.samples
            .iter()
            .take(n)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|s| HistoryPoint {
                time: self
                    .clock
                    .time_at(s.local_index())
                    .to_iso8601()
                    .unwrap_or_default(),
                offset_seconds: s.offset_seconds(&self.clock),
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
