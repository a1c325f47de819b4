use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ntpwatch::clock::{Clock, RawCounter, SystemWallClock};
use ntpwatch::monitor::{Monitor, RECV_DEADLINE};
use ntpwatch::net;
use ntpwatch::report::CsvSink;
use ntpwatch::server::Server;

/// How long the startup calibration watches the counter against the wall
/// clock before fixing the model origin.
const CALIBRATION_PROBE: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor NTP servers against a reference, one CSV row per second
    Monitor {
        /// Server whose wall time drives the timestamp columns
        reference: String,
        /// Servers whose offsets are reported in milliseconds
        #[arg(required = true)]
        servers: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .format_target(false)
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Monitor { reference, servers } => run_monitor(&reference, &servers),
    }
}

fn run_monitor(reference: &str, others: &[String]) -> Result<()> {
    info!("ntpwatch v{}", env!("CARGO_PKG_VERSION"));

    let counter = Arc::new(RawCounter::new());
    let base = Clock::calibrate(counter.as_ref(), &SystemWallClock, CALIBRATION_PROBE);
    info!(
        "counter calibrated: {:.6} MHz, precision {} ticks",
        base.frequency() / 1e6,
        base.precision()
    );

    // The reference must resolve; other servers are skipped with a warning.
    let mut servers = Vec::new();
    let ref_addrs = net::resolve_server(reference)
        .with_context(|| format!("resolving reference {}", reference))?;
    if ref_addrs.is_empty() {
        bail!("reference {} has no IPv4 address", reference);
    }
    for addr in ref_addrs {
        servers.push(Server::new(reference, addr, base.clone()));
    }

    for host in others {
        match net::resolve_server(host) {
            Ok(addrs) if !addrs.is_empty() => {
                for addr in addrs {
                    servers.push(Server::new(host, addr, base.clone()));
                }
            }
            Ok(_) => warn!("{} has no IPv4 address, skipping", host),
            Err(e) => warn!("{}: {}, skipping", host, e),
        }
    }
    info!("monitoring {} resolved endpoints", servers.len());

    let socket = net::create_monitor_socket(RECV_DEADLINE)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        })
        .context("installing interrupt handler")?;
    }

    let mut monitor = Monitor::new(socket, servers, counter, running)?;
    let mut sink = CsvSink::new(io::stdout());
    monitor.run(&mut sink)?;
    monitor.shutdown();
    info!("clean shutdown");
    Ok(())
}
