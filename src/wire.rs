//! NTP wire format: the 48-byte NTPv3/v4 basic packet.
//!
//! We transmit a minimal mode-3 client request whose transmit timestamp
//! carries our raw counter reading as a correlation token (the server echoes
//! it back in the originate field without interpreting it). Replies are
//! accepted in mode 4 (server) or 5 (broadcast).

use anyhow::{bail, Result};
use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

use crate::time::Time;

pub const PACKET_SIZE: usize = 48;

/// UDP port of the "ntp" service.
pub const NTP_PORT: u16 = 123;

const VERSION: u8 = 3;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;

/// A decoded reply. Poll and precision are carried but never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub leap: u8,
    pub version: u8,
    pub mode: u8,
    pub stratum: u8,
    pub poll: i8,
    pub precision: i8,
    pub root_delay: u32,
    pub root_dispersion: u32,
    pub reference_id: [u8; 4],
    pub reference: Time,
    pub originate: Time,
    pub receive: Time,
    pub transmit: Time,
}

impl Packet {
    /// Reference id reinterpreted as an IPv4 address in network order.
    /// Only meaningful when stratum > 1; stratum 0/1 carry an ASCII tag.
    pub fn refid_as_ipv4(&self) -> u32 {
        u32::from_be_bytes(self.reference_id)
    }

    /// Human-readable reference id for log lines.
    pub fn refid_label(&self) -> String {
        if self.stratum <= 1 {
            self.reference_id
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
                .collect()
        } else {
            Ipv4Addr::from(self.reference_id).to_string()
        }
    }
}

/// Blank mode-3 client request frame. The transmit timestamp is patched in
/// with `write_transmit` immediately before the send syscall.
pub fn request() -> [u8; PACKET_SIZE] {
    let mut buf = [0u8; PACKET_SIZE];
    buf[0] = (VERSION << 3) | MODE_CLIENT; // LI = 0
    buf
}

/// Stamp the correlation token into the transmit-timestamp field.
pub fn write_transmit(buf: &mut [u8; PACKET_SIZE], token: u64) {
    BigEndian::write_u64(&mut buf[40..48], token);
}

pub fn decode(buf: &[u8]) -> Result<Packet> {
    if buf.len() < PACKET_SIZE {
        bail!("short packet: {} bytes", buf.len());
    }
    let version = (buf[0] >> 3) & 0x07;
    if version < VERSION {
        bail!("unknown version {}", version);
    }
    let mode = buf[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        bail!("unexpected mode {}", mode);
    }

    Ok(Packet {
        leap: buf[0] >> 6,
        version,
        mode,
        stratum: buf[1],
        poll: buf[2] as i8,
        precision: buf[3] as i8,
        root_delay: BigEndian::read_u32(&buf[4..8]),
        root_dispersion: BigEndian::read_u32(&buf[8..12]),
        reference_id: [buf[12], buf[13], buf[14], buf[15]],
        reference: Time::from_bits(BigEndian::read_u64(&buf[16..24])),
        originate: Time::from_bits(BigEndian::read_u64(&buf[24..32])),
        receive: Time::from_bits(BigEndian::read_u64(&buf[32..40])),
        transmit: Time::from_bits(BigEndian::read_u64(&buf[40..48])),
    })
}

// ============================================================================
// TESTS
// ============================================================================
