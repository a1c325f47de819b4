//! Transport loop: one UDP socket, a background receive thread, and a 1 Hz
//! pacer that owns every server.
//!
//! The socket is partitioned by direction: only the receive thread reads,
//! only the pacer writes, so neither needs a lock. The bounded MPSC queue
//! between them is the sole synchronised structure. The pacer never blocks
//! on the queue; an empty queue simply means no packets this tick.
//!
//! Within one tick the drain happens before the transmit burst, so the
//! emitted row reflects every sample received strictly before this tick's
//! requests went out.

use anyhow::{bail, Context, Result};
use log::{debug, error, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::ClockIndex;
use crate::report::{OutputSink, Row};
use crate::server::Server;
use crate::traits::CounterSource;
use crate::wire::{self, Packet};

/// Pacing interval between transmit bursts.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Read deadline on the receive half; bounds how long shutdown can take.
pub const RECV_DEADLINE: Duration = Duration::from_secs(1);

/// Queue slots reserved per server (replies plus late stragglers).
const QUEUE_SLOTS_PER_SERVER: usize = 8;
const QUEUE_MIN_SLOTS: usize = 64;

/// One received datagram, stamped on arrival, waiting for the pacer.
struct Reply {
    t4: ClockIndex,
    src: SocketAddr,
    packet: Packet,
}

pub struct Monitor<C: CounterSource + 'static> {
    socket: UdpSocket,
    counter: Arc<C>,
    servers: Vec<Server>,
    replies: Receiver<Reply>,
    run: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    /// Offset (ms) per server for the current tick; None until a sample
    /// arrives within the tick.
    fresh: Vec<Option<f64>>,
}

impl<C: CounterSource + 'static> Monitor<C> {
    /// Take ownership of the socket and servers and start the receive
    /// thread. `servers[0]` is the reference whose wall time drives the
    /// emitted timestamp column.
    pub fn new(
        socket: UdpSocket,
        servers: Vec<Server>,
        counter: Arc<C>,
        run: Arc<AtomicBool>,
    ) -> Result<Self> {
        if servers.is_empty() {
            bail!("no servers to monitor");
        }

        let capacity = (servers.len() * QUEUE_SLOTS_PER_SERVER).max(QUEUE_MIN_SLOTS);
        let (tx, rx) = sync_channel(capacity);

        let rx_socket = socket
            .try_clone()
            .context("cloning socket for the receive thread")?;
        // the deadline is what lets the thread notice the run flag dropping
        rx_socket
            .set_read_timeout(Some(RECV_DEADLINE))
            .context("setting receive deadline")?;
        let receiver = thread::Builder::new()
            .name("ntp-recv".to_string())
            .spawn({
                let counter = counter.clone();
                let run = run.clone();
                move || receive_loop(rx_socket, counter, tx, run)
            })
            .context("spawning receive thread")?;

        let fresh = vec![None; servers.len()];
        Ok(Monitor {
            socket,
            counter,
            servers,
            replies: rx,
            run,
            receiver: Some(receiver),
            fresh,
        })
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Pace until the run flag drops, one row per tick.
    pub fn run(&mut self, sink: &mut dyn OutputSink) -> Result<()> {
        let others: Vec<String> = self.servers[1..]
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        sink.header(self.servers[0].name(), &others)?;

        while self.run.load(Ordering::SeqCst) {
            self.tick(sink);
            thread::sleep(TICK_INTERVAL);
        }
        Ok(())
    }

    /// One pacing iteration: drain, transmit, emit.
    pub fn tick(&mut self, sink: &mut dyn OutputSink) {
        for slot in &mut self.fresh {
            *slot = None;
        }
        self.drain();
        self.transmit();
        if let Err(e) = sink.row(&self.row()) {
            warn!("emitting output row failed: {}", e);
        }
    }

    /// Apply every queued reply without blocking.
    fn drain(&mut self) {
        while let Ok(reply) = self.replies.try_recv() {
            self.apply(reply);
        }
    }

    fn apply(&mut self, reply: Reply) {
        let Some(i) = self.servers.iter().position(|s| s.addr() == reply.src) else {
            warn!("reply from unmatched source {}, dropped", reply.src);
            return;
        };
        if let Some(offset_s) = self.servers[i].take_reply(reply.t4, &reply.packet) {
            self.fresh[i] = Some(offset_s * 1e3);
            debug!(
                "{}: offset {:+.4} ms, stratum {}",
                self.servers[i].name(),
                offset_s * 1e3,
                self.servers[i].stratum()
            );
        }
    }

    /// Send one request to every server. The counter read is the last thing
    /// before each send so the echoed token brackets the true departure.
    fn transmit(&mut self) {
        let mut frame = wire::request();
        for server in &mut self.servers {
            let t1 = self.counter.now();
            wire::write_transmit(&mut frame, t1.0 as u64);
            match self.socket.send_to(&frame, server.addr()) {
                Ok(_) => server.note_request(t1),
                Err(e) => warn!("send to {} failed: {}", server.name(), e),
            }
        }
    }

    fn row(&self) -> Row {
        let reference = &self.servers[0];
        let now = reference.clock().time_at(self.counter.now());
        Row {
            unix_time: now.to_unix_seconds(),
            utc_time: now.to_iso8601().unwrap_or_else(|| "Unknown".to_string()),
            offsets_ms: self.fresh[1..].to_vec(),
            frequency_mhz: reference.clock().frequency() / 1e6,
        }
    }

    /// Stop the receive thread and join it. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.take() {
            if handle.join().is_err() {
                error!("receive thread panicked");
            }
        }
    }
}

impl<C: CounterSource + 'static> Drop for Monitor<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receive thread body: block on the socket (bounded by the read deadline),
/// stamp arrivals, decode, and publish. Errors never propagate past here;
/// the thread exits only when the run flag drops.
fn receive_loop<C: CounterSource>(
    socket: UdpSocket,
    counter: Arc<C>,
    tx: SyncSender<Reply>,
    run: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 128];
    while run.load(Ordering::SeqCst) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                if run.load(Ordering::SeqCst) {
                    warn!("socket receive failed: {}", e);
                    continue;
                }
                break;
            }
        };
        // arrival stamp before any parsing
        let t4 = counter.now();

        let packet = match wire::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("bad packet from {}: {}", src, e);
                continue;
            }
        };

        match tx.try_send(Reply { t4, src, packet }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("reply queue full, dropping packet from {}", src),
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    debug!("receive thread exiting");
}

// ============================================================================
// TESTS
// ============================================================================
