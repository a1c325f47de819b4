use ntpwatch::clock::{Clock, ClockDiff, ClockIndex};
use ntpwatch::sample::Sample;
use ntpwatch::server::Server;
use ntpwatch::time::{Delta, Time};
use std::f64::consts::PI;

// ============================================================================
// DISCIPLINE CONVERGENCE E2E TESTS
// ============================================================================
// A simulated remote server runs at a fixed phase offset and frequency
// drift relative to the host counter. Samples flow through the real
// Server::add_sample path (ring update, window statistics, discipline), and
// the tests check that the per-server clock converges onto the remote
// trajectory despite path jitter and congestion bursts.
//
// The host truth: the counter ticks at exactly 1 GHz and the calibrated
// base clock maps tick 0 onto T0. The remote reads
//     remote(tau) = T0 + tau * (1 + drift) + base_offset
// at true host second tau.
// ============================================================================

const GHZ: f64 = 1_000_000_000.0;

fn gauss() -> f64 {
    // Box-Muller; (1 - u) keeps the log argument strictly positive
    let u1: f64 = 1.0 - rand::random::<f64>();
    let u2: f64 = rand::random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

struct RemoteServer {
    origin: Time,
    base_offset_s: f64,
    drift: f64,
    /// Sigma of the symmetric path jitter, seconds.
    path_jitter_s: f64,
    /// Sigma of the server's own reading noise, seconds.
    reading_noise_s: f64,
}

impl RemoteServer {
    fn remote_at(&self, tau: f64) -> f64 {
        tau * (1.0 + self.drift) + self.base_offset_s
    }

    /// One round trip sent at counter tick `t1`. `congestion_s` adds a
    /// one-sided delay on the reply path, which both inflates the round
    /// trip and biases the measured offset by half the delay.
    fn sample(&self, t1: i64, congestion_s: f64) -> Sample {
        let nominal_rt = 1e-3 + gauss().abs() * self.path_jitter_s;
        let one_way = nominal_rt / 2.0;

        let tau_send = t1 as f64 / GHZ;
        let tau_server = tau_send + one_way;
        let remote_mid = self.remote_at(tau_server) + gauss() * self.reading_noise_s;

        let t4 = t1 + ((nominal_rt + congestion_s) * GHZ) as i64;
        let server_delay = 1e-4;
        Sample {
            t1: ClockIndex(t1),
            t2: self.origin + Delta::from_seconds(remote_mid - server_delay / 2.0),
            t3: self.origin + Delta::from_seconds(remote_mid + server_delay / 2.0),
            t4: ClockIndex(t4),
        }
    }
}

fn sim_server(origin: Time) -> Server {
    let clock = Clock::new(origin, ClockIndex(0), GHZ);
    Server::new(
        "sim.example",
        "192.0.2.10:123".parse().expect("literal addr"),
        clock,
    )
}

/// Wall-time error of the server's clock against the remote trajectory at
/// counter tick `idx`, in seconds.
fn clock_error_s(server: &Server, remote: &RemoteServer, idx: i64) -> f64 {
    let modelled = (server.clock().time_at(ClockIndex(idx)) - remote.origin).as_seconds();
    let truth = remote.remote_at(idx as f64 / GHZ);
    modelled - truth
}

#[test]
fn steady_offset_is_absorbed() {
    let origin = Time::from_unix(1_700_000_000, 0);
    let remote = RemoteServer {
        origin,
        base_offset_s: 5e-3,
        drift: 0.0,
        path_jitter_s: 5e-5,
        reading_noise_s: 1e-5,
    };
    let mut server = sim_server(origin);

    let mut worst_residual: f64 = 0.0;
    for i in 0..300i64 {
        let t1 = i * 1_000_000_000;
        let residual = server.add_sample(remote.sample(t1, 0.0));
        if i >= 100 {
            worst_residual = worst_residual.max(residual.abs());
        }
    }

    assert!(
        worst_residual < 1e-3,
        "post-warmup residual reached {} s",
        worst_residual
    );
    // the clock itself carries the 5 ms phase offset
    let err = clock_error_s(&server, &remote, 300 * 1_000_000_000);
    assert!(err.abs() < 1e-3, "clock error {} s after settling", err);
}

#[test]
fn frequency_drift_is_tracked() {
    let origin = Time::from_unix(1_700_000_000, 0);
    let remote = RemoteServer {
        origin,
        base_offset_s: 0.0,
        drift: 1e-5, // 10 ppm fast
        path_jitter_s: 2e-5,
        reading_noise_s: 5e-6,
    };
    let mut server = sim_server(origin);

    let mut worst_residual: f64 = 0.0;
    for i in 0..700i64 {
        let t1 = i * 1_000_000_000;
        let residual = server.add_sample(remote.sample(t1, 0.0));
        if i >= 600 {
            worst_residual = worst_residual.max(residual.abs());
        }
    }

    // the model's effective rate (host-true seconds per modelled second)
    // must match the remote running 10 ppm fast
    let rate = GHZ / server.clock().frequency();
    assert!(
        (rate - (1.0 + 1e-5)).abs() < 1e-6,
        "effective rate {} off target",
        rate
    );
    assert!(
        worst_residual < 5e-4,
        "late residual reached {} s",
        worst_residual
    );
}

#[test]
fn congestion_bursts_leave_clock_undisturbed() {
    let origin = Time::from_unix(1_700_000_000, 0);
    let remote = RemoteServer {
        origin,
        base_offset_s: 2e-3,
        drift: 0.0,
        path_jitter_s: 5e-5,
        reading_noise_s: 1e-5,
    };
    let mut server = sim_server(origin);

    let mut worst_clean: f64 = 0.0;
    for i in 0..400i64 {
        let t1 = i * 1_000_000_000;
        // every tenth reply crawls home through a 50 ms queue
        let congestion = if i % 10 == 9 { 50e-3 } else { 0.0 };
        let residual = server.add_sample(remote.sample(t1, congestion));
        if i >= 100 && congestion == 0.0 {
            worst_clean = worst_clean.max(residual.abs());
        }
    }

    assert!(
        worst_clean < 1.5e-3,
        "clean-sample residual reached {} s under congestion",
        worst_clean
    );
    let err = clock_error_s(&server, &remote, 400 * 1_000_000_000);
    assert!(
        err.abs() < 1.5e-3,
        "congestion pulled the clock {} s off the remote",
        err
    );
    // the window minimum never picks up a congested round trip
    assert!(
        server.min_roundtrip() < ClockDiff(2_000_000),
        "min roundtrip contaminated: {:?}",
        server.min_roundtrip()
    );
}

#[test]
fn sparse_ring_produces_no_corrections() {
    // one lone sample: the discipline must not move the clock at all
    let origin = Time::from_unix(1_700_000_000, 0);
    let remote = RemoteServer {
        origin,
        base_offset_s: 50e-3,
        drift: 0.0,
        path_jitter_s: 0.0,
        reading_noise_s: 0.0,
    };
    let mut server = sim_server(origin);
    let before = server.clock().time_at(ClockIndex(12345));
    let reported = server.add_sample(remote.sample(0, 0.0));

    assert!((reported - 50e-3).abs() < 1e-4, "reported {}", reported);
    assert_eq!(server.clock().time_at(ClockIndex(12345)), before);
}
