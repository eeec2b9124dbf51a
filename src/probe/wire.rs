//! Fixed-layout header codec for IPv4, ICMP, and UDP.
//!
//! Every decode is a pure function of the input buffer: multi-byte fields
//! are extracted big-endian with explicit bounds checks, and a buffer
//! shorter than the fixed layout fails with `MalformedHeader` without
//! touching a single byte past the end. Encode mirrors decode field for
//! field, so decode-then-encode reproduces the original bytes.

use std::net::Ipv4Addr;

use crate::error::TraceError;

/// Fixed IPv4 header size (IHL=5, no options)
pub const IPV4_HEADER_LEN: usize = 20;
/// Fixed ICMP header size
pub const ICMP_HEADER_LEN: usize = 8;
/// Fixed UDP header size
pub const UDP_HEADER_LEN: usize = 8;

/// IP protocol number for ICMP
pub const IPPROTO_ICMP: u8 = 1;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// IPv4 header with IHL=5 (no options).
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Decode from the start of `buf`.
    ///
    /// Rejects anything that is not version 4 with IHL 5; packets with IP
    /// options are discarded rather than skipped over.
    pub fn decode(buf: &[u8]) -> Result<Self, TraceError> {
        if buf.len() < IPV4_HEADER_LEN {
            return Err(TraceError::MalformedHeader {
                layer: "IPv4",
                expected: IPV4_HEADER_LEN,
                actual: buf.len(),
            });
        }

        let version = (buf[0] & 0xF0) >> 4;
        let ihl = buf[0] & 0x0F;
        if version != 4 || ihl != 5 {
            return Err(TraceError::UnsupportedIpv4 { version, ihl });
        }

        Ok(Self {
            version,
            ihl,
            tos: buf[1],
            total_length: u16::from_be_bytes([buf[2], buf[3]]),
            identification: u16::from_be_bytes([buf[4], buf[5]]),
            flags_fragment: u16::from_be_bytes([buf[6], buf[7]]),
            ttl: buf[8],
            protocol: buf[9],
            checksum: u16::from_be_bytes([buf[10], buf[11]]),
            source: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
            destination: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
        })
    }

    /// Encode to network byte order, checksum field written as-is.
    pub fn encode(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut buf = [0u8; IPV4_HEADER_LEN];
        buf[0] = (self.version << 4) | (self.ihl & 0x0F);
        buf[1] = self.tos;
        buf[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identification.to_be_bytes());
        buf[6..8].copy_from_slice(&self.flags_fragment.to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        buf[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        buf[12..16].copy_from_slice(&self.source.octets());
        buf[16..20].copy_from_slice(&self.destination.octets());
        buf
    }
}

/// ICMP header: type, code, checksum, and the 4-byte "rest of header"
/// field (unused for Time Exceeded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub rest: u32,
}

impl IcmpHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, TraceError> {
        if buf.len() < ICMP_HEADER_LEN {
            return Err(TraceError::MalformedHeader {
                layer: "ICMP",
                expected: ICMP_HEADER_LEN,
                actual: buf.len(),
            });
        }

        Ok(Self {
            icmp_type: buf[0],
            code: buf[1],
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
            rest: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    pub fn encode(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut buf = [0u8; ICMP_HEADER_LEN];
        buf[0] = self.icmp_type;
        buf[1] = self.code;
        buf[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[4..8].copy_from_slice(&self.rest.to_be_bytes());
        buf
    }
}

/// UDP header. Only ever parsed as the fragment embedded in an ICMP error
/// payload, never from live UDP traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, TraceError> {
        if buf.len() < UDP_HEADER_LEN {
            return Err(TraceError::MalformedHeader {
                layer: "UDP",
                expected: UDP_HEADER_LEN,
                actual: buf.len(),
            });
        }

        Ok(Self {
            source_port: u16::from_be_bytes([buf[0], buf[1]]),
            dest_port: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            checksum: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    pub fn encode(&self) -> [u8; UDP_HEADER_LEN] {
        let mut buf = [0u8; UDP_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }
}

/// Internet checksum (RFC 1071): one's-complement sum of 16-bit words,
/// folded to 16 bits and inverted. An odd trailing byte is padded with
/// zero on the right.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}
