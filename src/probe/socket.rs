//! Raw socket creation and blocking receive for the probe session.
//!
//! Two sockets exist per session: a plain DGRAM UDP socket for sending
//! TTL-limited probes, and a raw ICMP socket that delivers every ICMP
//! packet addressed to the host, IP header included (IP_HDRINCL), so the
//! correlator sees the full IPv4+ICMP+embedded-fragment stack in one read.

use std::mem::MaybeUninit;
use std::net::IpAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::TraceError;

/// Receive buffer size, large enough for any ICMP error plus headers
pub const MAX_REPLY_LEN: usize = 1508;

/// A raw ICMP packet as delivered by the kernel, plus the kernel-reported
/// sender for logging. Correlation uses the decoded IP header, not `from`.
#[derive(Debug, Clone)]
pub struct Reply {
    pub bytes: Vec<u8>,
    pub from: Option<IpAddr>,
}

/// Create the UDP socket used for sending probes.
///
/// The OS assigns an ephemeral source port on the first send; that port
/// is the correlation key, read back via [`local_port`].
pub fn create_udp_send_socket() -> Result<Socket, TraceError> {
    let failure = |source| TraceError::SocketCreation {
        purpose: "UDP send",
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(failure)?;
    socket.set_nonblocking(false).map_err(failure)?;
    Ok(socket)
}

/// Create the raw ICMP receive socket.
///
/// Requires elevated privileges (root or CAP_NET_RAW). The read timeout
/// is a per-call bound: every `recv_from` waits up to `timeout` on its
/// own, nothing accumulates across retries.
pub fn create_raw_icmp_socket(timeout: Duration) -> Result<Socket, TraceError> {
    let failure = |source| TraceError::SocketCreation {
        purpose: "raw ICMP receive",
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(failure)?;
    socket.set_nonblocking(false).map_err(failure)?;
    socket.set_header_included(true).map_err(failure)?;
    socket.set_read_timeout(Some(timeout)).map_err(failure)?;
    Ok(socket)
}

/// Set the IPv4 TTL socket option. This is per-socket state: every send
/// after this call uses the new value until it is changed again.
pub fn set_ttl(socket: &Socket, ttl: u8) -> std::io::Result<()> {
    socket.set_ttl(ttl as u32)
}

/// Read back the locally bound port of a socket.
pub fn local_port(socket: &Socket) -> Result<u16, TraceError> {
    let addr = socket.local_addr().map_err(TraceError::Send)?;
    addr.as_socket()
        .map(|sa| sa.port())
        .ok_or_else(|| TraceError::Send(std::io::Error::other("unexpected local address family")))
}

/// Block for one ICMP packet, up to the socket's read timeout.
///
/// Timeouts surface as the recoverable [`TraceError::Timeout`]; any other
/// receive failure is fatal.
pub fn recv_reply(socket: &Socket) -> Result<Reply, TraceError> {
    let mut buf = [MaybeUninit::<u8>::uninit(); MAX_REPLY_LEN];
    match socket.recv_from(&mut buf) {
        Ok((len, addr)) => {
            // recv_from initialized the first `len` bytes
            let bytes =
                unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) }.to_vec();
            let from = addr.as_socket().map(|sa| sa.ip());
            Ok(Reply { bytes, from })
        }
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            Err(TraceError::Timeout)
        }
        Err(e) => Err(TraceError::Recv(e)),
    }
}
