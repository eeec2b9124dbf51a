//! UDP probe construction and transmission.

use std::net::{SocketAddr, SocketAddrV4};

use log::debug;
use socket2::{SockAddr, Socket};

use crate::error::TraceError;
use crate::probe::socket::{local_port, set_ttl};

/// Probe payload size: four 16-bit words
pub const PROBE_PAYLOAD_LEN: usize = 8;

/// Build the probe payload: the process id truncated to 16 bits, repeated
/// four times in network byte order.
///
/// The payload carries no protocol meaning; it only makes our probes
/// recognizable in a capture. Correlation never looks at it; the embedded
/// UDP source port is the matching key.
pub fn build_probe_payload(pid: u32) -> [u8; PROBE_PAYLOAD_LEN] {
    let word = ((pid % u16::MAX as u32) as u16).to_be_bytes();
    let mut payload = [0u8; PROBE_PAYLOAD_LEN];
    for chunk in payload.chunks_exact_mut(2) {
        chunk.copy_from_slice(&word);
    }
    payload
}

/// Send one TTL-limited probe and return the source port the OS bound the
/// socket to, the correlation key for this probe.
///
/// The IP TTL socket option is set immediately before the send; it is
/// per-socket state, so each probe threads its TTL through here rather
/// than trusting whatever value a previous send left behind.
pub fn send_probe(
    socket: &Socket,
    destination: SocketAddrV4,
    payload: &[u8],
    ttl: u8,
) -> Result<u16, TraceError> {
    set_ttl(socket, ttl).map_err(TraceError::Send)?;
    socket
        .send_to(payload, &SockAddr::from(SocketAddr::V4(destination)))
        .map_err(TraceError::Send)?;

    let port = local_port(socket)?;
    debug!(
        "sent from port={} ttl={} to {}:{}",
        port,
        ttl,
        destination.ip(),
        destination.port()
    );
    Ok(port)
}
