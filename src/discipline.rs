//! Clock discipline: turns a server's ring of round-trip samples into an
//! updated counter clock.
//!
//! ## The problem
//! Round-trip samples are noisy. Congestion inflates the round trip on one
//! side of the path, scheduler preemption adds latency spikes, and both show
//! up as phantom offset excursions that are not real clock motion.
//!
//! ## The approach
//! 1. Re-anchor the clock at the oldest sample so the affine pivot stays
//!    near the data.
//! 2. Weight every sample by `exp(-x^2)` where `x` is its excess path delay
//!    (over the window minimum) plus an age allowance, scaled by the
//!    window's base error. Congested samples fade out smoothly instead of
//!    being cut at a threshold.
//! 3. Frequency: weighted linear regression of offset against elapsed host
//!    time over the long window. Slow thermal drift dominates there.
//! 4. Phase: weighted mean of the short window, measured against the
//!    already rate-corrected clock so the two corrections compose.
//!
//! Either correction degenerates to NaN when the window cannot support it
//! (too few samples, zero spread) and is then skipped on its own.

use log::debug;
use std::collections::VecDeque;

use crate::clock::{Clock, ClockDiff};
use crate::sample::Sample;
use crate::time::Delta;

/// Short window for phase: tracks low-latency jitter (~50 s at the 0.5 Hz
/// sampling cadence the windows are dimensioned for).
pub const PHASE_SAMPLES: usize = 25;

/// Long window for frequency: long enough that thermal drift dominates
/// quantisation (~1000 s at 0.5 Hz).
pub const FREQ_SAMPLES: usize = 500;

/// Ring capacity: the larger of the two windows.
pub const MAX_SAMPLES: usize = FREQ_SAMPLES;

/// Assumed upper bound on uncompensated frequency error, in seconds of
/// extra uncertainty per second of sample age (0.1 ppm).
const ASSUMED_DRIFT: f64 = 1e-7;

/// Produce a rate- and phase-corrected copy of `clock` from the sample ring
/// (newest first). `min_roundtrip` and `base_error` are the caller's cached
/// window statistics.
pub fn discipline(
    clock: &Clock,
    samples: &VecDeque<Sample>,
    min_roundtrip: ClockDiff,
    base_error: ClockDiff,
) -> Clock {
    let mut clock = clock.clone();
    let Some(oldest) = samples.back() else {
        return clock;
    };
    if samples.len() < 2 {
        return clock;
    }

    let earliest = oldest.t1;
    clock.adjust_origin(earliest);

    let weights = qualities(&clock, samples, min_roundtrip, base_error);
    let times: Vec<f64> = samples
        .iter()
        .map(|s| clock.diff_seconds(s.t4 - earliest))
        .collect();

    let raw_offsets = offsets(&clock, samples);
    let freq = frequency_slope(&times, &raw_offsets, &weights);
    if freq.is_finite() {
        clock.adjust_frequency(freq);
    }

    let tightened = offsets(&clock, samples);
    let phase = weighted_phase(&tightened, &weights);
    if phase.is_finite() {
        clock.adjust_offset(Delta::from_seconds(phase));
    }

    debug!(
        "discipline: n={} phase={:+.3e}s freq={:+.3e}",
        samples.len(),
        phase,
        freq
    );
    clock
}

/// Gaussian quality weight per sample. A sample's error is its excess round
/// trip over the window minimum, grown by the drift allowance as it ages;
/// the scale is the window's base error. A zero base error means the window
/// has no spread to judge against, so every sample weighs 1.
fn qualities(
    clock: &Clock,
    samples: &VecDeque<Sample>,
    min_roundtrip: ClockDiff,
    base_error: ClockDiff,
) -> Vec<f64> {
    let base = clock.diff_seconds(base_error);
    let newest_t4 = samples.front().map(|s| s.t4).unwrap_or_default();
    samples
        .iter()
        .map(|s| {
            if base_error.ticks() == 0 {
                return 1.0;
            }
            let initial = clock.diff_seconds(s.roundtrip() - min_roundtrip);
            let age = clock.diff_seconds(newest_t4 - s.t4);
            let x = (initial + ASSUMED_DRIFT * age) / base;
            (-x * x).exp()
        })
        .collect()
}

fn offsets(clock: &Clock, samples: &VecDeque<Sample>) -> Vec<f64> {
    samples.iter().map(|s| s.offset_seconds(clock)).collect()
}

/// Weighted mean of the newest `PHASE_SAMPLES` offsets. NaN when the
/// weights sum to zero or the inputs are degenerate.
fn weighted_phase(offsets: &[f64], weights: &[f64]) -> f64 {
    let n = offsets.len().min(PHASE_SAMPLES);
    let wsum: f64 = weights[..n].iter().sum();
    let num: f64 = offsets[..n]
        .iter()
        .zip(&weights[..n])
        .map(|(o, w)| o * w)
        .sum();
    let phase = num / wsum;
    if phase.is_finite() {
        phase
    } else {
        f64::NAN
    }
}

/// Weighted regression slope of offset against elapsed host time over the
/// newest `FREQ_SAMPLES` pairs: seconds of offset drift per second of
/// elapsed time. NaN when either axis has no spread.
fn frequency_slope(times: &[f64], offsets: &[f64], weights: &[f64]) -> f64 {
    let n = times.len().min(FREQ_SAMPLES);
    if n < 2 {
        return f64::NAN;
    }
    let t = &times[..n];
    let o = &offsets[..n];
    let w = &weights[..n];

    let mx = mean(t);
    let sx = stddev(t, mx);

    let wsum: f64 = w.iter().sum();
    if wsum <= 0.0 {
        return f64::NAN;
    }
    let my = o.iter().zip(w).map(|(oi, wi)| oi * wi).sum::<f64>() / wsum;
    let sy = (o.iter().zip(w).map(|(oi, wi)| wi * (oi - my).powi(2)).sum::<f64>() / wsum).sqrt();

    let c = t
        .iter()
        .zip(o)
        .zip(w)
        .map(|((ti, oi), wi)| wi * (ti - mx) * (oi - my))
        .sum::<f64>()
        / (n as f64 - 1.0);

    if sx == 0.0 || sy == 0.0 || !sx.is_finite() || !sy.is_finite() || !c.is_finite() {
        return f64::NAN;
    }
    let r = c / (sx * sy);
    let beta = r * sy / sx;
    if beta.is_finite() {
        beta
    } else {
        f64::NAN
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn stddev(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0);
    var.sqrt()
}

// ============================================================================
// TESTS
// ============================================================================
