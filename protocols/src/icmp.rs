//! ICMP echo-request assembly.
//!
//! Knock daemons match echo requests on size (and sometimes payload), so the
//! builder must produce the exact wire bytes. The IPv4 checksum is computed
//! here; the ICMPv6 checksum covers a pseudo-header with the source address
//! and is filled in by the transport layer, which knows it.

use knockr_common::constants::{ICMP_HEADER_SIZE, IP6_HEADER_SIZE, MAX_PACKET_SIZE};
use knockr_common::model::IcmpSizeMode;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::icmpv6::echo_request::MutableEchoRequestPacket as MutableEchoRequestV6Packet;
use pnet::packet::icmpv6::{Icmpv6Code, Icmpv6Types};

/// Echo payload length derived from a step's configured size.
///
/// Negative results clamp to zero; the payload is capped so the full packet
/// still fits the 65535-byte IP length field.
pub fn payload_len(size: usize, mode: IcmpSizeMode, ipv6: bool, ip4_header_size: usize) -> usize {
    let ip_header = if ipv6 { IP6_HEADER_SIZE } else { ip4_header_size };
    let len = match mode {
        IcmpSizeMode::PayloadOnly => size,
        IcmpSizeMode::WithIcmpHeader => size.saturating_sub(ICMP_HEADER_SIZE),
        IcmpSizeMode::WithIpHeader => size.saturating_sub(ICMP_HEADER_SIZE + ip_header),
    };
    len.min(MAX_PACKET_SIZE - ip_header - ICMP_HEADER_SIZE)
}

/// Builds one echo request: 8-byte header followed by `payload_len` bytes of
/// content, zero-padded or truncated to fit.
pub fn echo_request(
    ipv6: bool,
    payload_len: usize,
    content: &[u8],
    identifier: u16,
    sequence_number: u16,
) -> Vec<u8> {
    let mut buf = vec![0u8; ICMP_HEADER_SIZE + payload_len];
    let copied = content.len().min(payload_len);
    buf[ICMP_HEADER_SIZE..ICMP_HEADER_SIZE + copied].copy_from_slice(&content[..copied]);

    if ipv6 {
        if let Some(mut pkt) = MutableEchoRequestV6Packet::new(&mut buf) {
            pkt.set_icmpv6_type(Icmpv6Types::EchoRequest);
            pkt.set_icmpv6_code(Icmpv6Code(0));
            pkt.set_identifier(identifier);
            pkt.set_sequence_number(sequence_number);
            pkt.set_checksum(0);
        }
    } else {
        if let Some(mut pkt) = MutableEchoRequestPacket::new(&mut buf) {
            pkt.set_icmp_type(IcmpTypes::EchoRequest);
            pkt.set_icmp_code(IcmpCode(0));
            pkt.set_identifier(identifier);
            pkt.set_sequence_number(sequence_number);
            pkt.set_checksum(0);
        }
        let checksum = IcmpPacket::new(&buf).map(|p| icmp::checksum(&p)).unwrap_or(0);
        if let Some(mut pkt) = MutableEchoRequestPacket::new(&mut buf) {
            pkt.set_checksum(checksum);
        }
    }
    buf
}
