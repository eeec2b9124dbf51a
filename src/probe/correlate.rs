//! Reply correlation: attribute a raw ICMP packet to the outstanding probe.
//!
//! A raw ICMP socket has no notion of which probe (if any) a packet
//! answers, so the matching is rebuilt here from the packet itself. A
//! "TTL exceeded" error quotes the offender: its payload is the original
//! IPv4 header plus the first 8 bytes of the original datagram, exactly
//! one embedded UDP header. The reply belongs to our probe if and only if
//! that embedded UDP source port equals the source port recorded at send
//! time.
//!
//! The destination address and port of the embedded header are
//! deliberately not consulted; see the match-key note on [`correlate_reply`].

use std::net::Ipv4Addr;

use crate::error::TraceError;
use crate::probe::wire::{
    IcmpHeader, Ipv4Header, UdpHeader, ICMP_HEADER_LEN, IPPROTO_ICMP, IPPROTO_UDP, IPV4_HEADER_LEN,
};

/// ICMP Time Exceeded
pub const ICMP_TIME_EXCEEDED: u8 = 11;
/// Code 0: TTL exceeded in transit
pub const ICMP_CODE_TTL_IN_TRANSIT: u8 = 0;

/// Classification of one received ICMP packet against the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The reply came from the destination itself: the path is complete,
    /// whatever the ICMP type (typically Destination Unreachable once the
    /// probe's TTL suffices to arrive).
    DestinationReached { responder: Ipv4Addr },
    /// A router on the path expired our probe: record it at the current TTL.
    HopMatched { responder: Ipv4Addr },
    /// Well-formed Time Exceeded, but quoting someone else's datagram.
    /// The current probe stays outstanding.
    SourcePortMismatch,
}

/// Classify a raw buffer from the ICMP receive socket.
///
/// The buffer starts with the outer IPv4 header (IP_HDRINCL). Layout for
/// a Time Exceeded reply:
///
/// ```text
/// [0..20)   outer IPv4 header (the router -> us)
/// [20..28)  ICMP header, type 11 code 0
/// [28..48)  embedded IPv4 header (our probe, us -> destination)
/// [48..56)  embedded UDP header (first 8 bytes of our datagram)
/// ```
///
/// Match key: embedded UDP source port == `probe_src_port`, nothing else.
/// A stricter scheme would cross-check the embedded destination address
/// and port as well; the single-key match is kept because the destination
/// port advances with the TTL anyway, so a stale quote from an earlier
/// hop still fails the source-port check once the socket rebinds.
pub fn correlate_reply(
    buffer: &[u8],
    destination: Ipv4Addr,
    probe_src_port: u16,
) -> Result<Verdict, TraceError> {
    let outer = Ipv4Header::decode(buffer)?;
    if outer.protocol != IPPROTO_ICMP {
        return Err(TraceError::UnexpectedProtocol {
            protocol: outer.protocol,
        });
    }

    let icmp = IcmpHeader::decode(&buffer[IPV4_HEADER_LEN..])?;

    // Any reply from the destination address means the probe made it all
    // the way, regardless of ICMP type or code.
    if outer.source == destination {
        return Ok(Verdict::DestinationReached {
            responder: outer.source,
        });
    }

    if icmp.icmp_type != ICMP_TIME_EXCEEDED || icmp.code != ICMP_CODE_TTL_IN_TRANSIT {
        return Err(TraceError::UnexpectedIcmp {
            icmp_type: icmp.icmp_type,
            code: icmp.code,
        });
    }

    // The ICMP payload quotes our original datagram: IPv4 header first,
    // then the leading 8 bytes of the UDP payload, i.e. the UDP header.
    let quoted = &buffer[IPV4_HEADER_LEN + ICMP_HEADER_LEN..];
    let embedded_ip = Ipv4Header::decode(quoted)?;
    if embedded_ip.protocol != IPPROTO_UDP {
        return Err(TraceError::UnexpectedProtocol {
            protocol: embedded_ip.protocol,
        });
    }
    let embedded_udp = UdpHeader::decode(&quoted[IPV4_HEADER_LEN..])?;

    if embedded_udp.source_port == probe_src_port {
        Ok(Verdict::HopMatched {
            responder: outer.source,
        })
    } else {
        Ok(Verdict::SourcePortMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a Time Exceeded reply as a router would emit it: outer IPv4
    /// from `router`, ICMP 11/0, quoting our probe datagram to
    /// `probe_dst` with the given ports.
    fn build_time_exceeded(
        router: Ipv4Addr,
        probe_src_port: u16,
        probe_dst: Ipv4Addr,
        probe_dst_port: u16,
    ) -> Vec<u8> {
        let mut packet = vec![0u8; 56];

        // Outer IPv4 header: router -> local host
        packet[0] = 0x45; // version 4, IHL 5
        packet[3] = 56; // total length
        packet[8] = 64; // TTL
        packet[9] = IPPROTO_ICMP;
        packet[12..16].copy_from_slice(&router.octets());
        packet[16..20].copy_from_slice(&[192, 168, 27, 34]); // us

        // ICMP Time Exceeded
        packet[20] = ICMP_TIME_EXCEEDED;
        packet[21] = ICMP_CODE_TTL_IN_TRANSIT;

        // Embedded IPv4 header: the expired probe, us -> destination
        packet[28] = 0x45;
        packet[31] = 36; // 20 IP + 8 UDP + 8 payload
        packet[36] = 1; // remaining TTL when it expired
        packet[37] = IPPROTO_UDP;
        packet[40..44].copy_from_slice(&[192, 168, 27, 34]);
        packet[44..48].copy_from_slice(&probe_dst.octets());

        // Embedded UDP header
        packet[48..50].copy_from_slice(&probe_src_port.to_be_bytes());
        packet[50..52].copy_from_slice(&probe_dst_port.to_be_bytes());
        packet[52..54].copy_from_slice(&16u16.to_be_bytes());

        packet
    }

    const DEST: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(192, 168, 27, 1);

    #[test]
    fn test_matching_source_port_attributes_hop() {
        let packet = build_time_exceeded(ROUTER, 63076, DEST, 33435);
        let verdict = correlate_reply(&packet, DEST, 63076).unwrap();
        assert_eq!(verdict, Verdict::HopMatched { responder: ROUTER });
    }

    #[test]
    fn test_mismatched_source_port_is_stale() {
        let packet = build_time_exceeded(ROUTER, 50000, DEST, 33435);
        let verdict = correlate_reply(&packet, DEST, 63076).unwrap();
        assert_eq!(verdict, Verdict::SourcePortMismatch);
    }

    #[test]
    fn test_match_ignores_embedded_destination() {
        // Same source port but a different quoted destination address and
        // port still matches: the key is the source port alone.
        let other_dest = Ipv4Addr::new(1, 1, 1, 1);
        let packet = build_time_exceeded(ROUTER, 63076, other_dest, 44444);
        let verdict = correlate_reply(&packet, DEST, 63076).unwrap();
        assert_eq!(verdict, Verdict::HopMatched { responder: ROUTER });
    }

    #[test]
    fn test_reply_from_destination_terminates() {
        // Destination Unreachable straight from the target
        let mut packet = build_time_exceeded(DEST, 63076, DEST, 33435);
        packet[20] = 3; // Destination Unreachable
        packet[21] = 3; // port unreachable
        let verdict = correlate_reply(&packet, DEST, 63076).unwrap();
        assert_eq!(verdict, Verdict::DestinationReached { responder: DEST });
    }

    #[test]
    fn test_destination_terminates_regardless_of_type() {
        // Even a Time Exceeded whose source is the destination counts as
        // reached, because the address check comes before the type gate.
        let packet = build_time_exceeded(DEST, 12345, DEST, 33435);
        let verdict = correlate_reply(&packet, DEST, 63076).unwrap();
        assert_eq!(verdict, Verdict::DestinationReached { responder: DEST });
    }

    #[test]
    fn test_unexpected_icmp_type_is_rejected() {
        let mut packet = build_time_exceeded(ROUTER, 63076, DEST, 33435);
        packet[20] = 0; // Echo Reply
        let err = correlate_reply(&packet, DEST, 63076).unwrap_err();
        assert!(matches!(
            err,
            TraceError::UnexpectedIcmp {
                icmp_type: 0,
                code: 0
            }
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_unexpected_code_is_rejected() {
        let mut packet = build_time_exceeded(ROUTER, 63076, DEST, 33435);
        packet[21] = 1; // fragment reassembly time exceeded
        assert!(matches!(
            correlate_reply(&packet, DEST, 63076),
            Err(TraceError::UnexpectedIcmp {
                icmp_type: 11,
                code: 1
            })
        ));
    }

    #[test]
    fn test_non_icmp_outer_protocol_is_rejected() {
        let mut packet = build_time_exceeded(ROUTER, 63076, DEST, 33435);
        packet[9] = 6; // TCP
        assert!(matches!(
            correlate_reply(&packet, DEST, 63076),
            Err(TraceError::UnexpectedProtocol { protocol: 6 })
        ));
    }

    #[test]
    fn test_truncated_buffers_never_panic() {
        let packet = build_time_exceeded(ROUTER, 63076, DEST, 33435);
        for len in 0..packet.len() {
            let result = correlate_reply(&packet[..len], DEST, 63076);
            assert!(
                result.is_err(),
                "truncation at {} should not classify",
                len
            );
            assert!(result.unwrap_err().is_recoverable());
        }
    }

    #[test]
    fn test_embedded_non_udp_is_rejected() {
        let mut packet = build_time_exceeded(ROUTER, 63076, DEST, 33435);
        packet[37] = 1; // quoted datagram was ICMP, not ours
        assert!(matches!(
            correlate_reply(&packet, DEST, 63076),
            Err(TraceError::UnexpectedProtocol { protocol: 1 })
        ));
    }
}
