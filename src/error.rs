//! Error types for the probe session.

use thiserror::Error;

/// Main error type for a trace session.
///
/// Only resolution, socket creation, and send failures are fatal; every
/// parsing or matching failure is recoverable and absorbed by the probe
/// loop (the packet is discarded and the current probe stays outstanding).
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("failed to create {purpose} socket: {source}")]
    SocketCreation {
        purpose: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send probe: {0}")]
    Send(#[source] std::io::Error),

    #[error("failed to receive reply: {0}")]
    Recv(#[source] std::io::Error),

    #[error("receive timed out")]
    Timeout,

    #[error("{layer} header truncated: need {expected} bytes, got {actual}")]
    MalformedHeader {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported IPv4 layout: version={version}, ihl={ihl}")]
    UnsupportedIpv4 { version: u8, ihl: u8 },

    #[error("reply does not carry ICMP: protocol={protocol}")]
    UnexpectedProtocol { protocol: u8 },

    #[error("unexpected ICMP type={icmp_type} code={code}")]
    UnexpectedIcmp { icmp_type: u8, code: u8 },
}

impl TraceError {
    /// Returns true if the probe loop should keep waiting rather than
    /// terminate the session.
    ///
    /// Raw ICMP sockets deliver every ICMP packet addressed to the host,
    /// so stale or foreign traffic showing up mid-session is expected and
    /// must never kill the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::MalformedHeader { .. }
                | Self::UnsupportedIpv4 { .. }
                | Self::UnexpectedProtocol { .. }
                | Self::UnexpectedIcmp { .. }
        )
    }
}

/// Result type alias for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;
