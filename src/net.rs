//! Address resolution and socket setup for the monitor loop.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::wire::NTP_PORT;

/// Resolve a hostname to IPv4 datagram endpoints on the NTP port. IPv6
/// results are filtered out; an empty result means the host only resolved
/// to addresses we do not speak to.
pub fn resolve_server(host: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, NTP_PORT)
        .to_socket_addrs()
        .with_context(|| format!("resolving {}", host))?
        .filter(|a| a.is_ipv4())
        .collect();
    Ok(addrs)
}

/// One datagram socket on an ephemeral local port, shared by the receive
/// thread (read half) and the pacer (write half). The read deadline is what
/// lets the receive thread notice the shutdown flag.
pub fn create_monitor_socket(read_deadline: Duration) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("creating UDP socket")?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket
        .bind(&addr.into())
        .context("binding UDP socket to an ephemeral port")?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(read_deadline))
        .context("setting socket read deadline")?;
    Ok(socket)
}

// ============================================================================
// TESTS
// ============================================================================
