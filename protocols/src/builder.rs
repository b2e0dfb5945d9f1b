//! Turns a validated sequence step into the exact bytes (or connect action)
//! the transport should perform.
//!
//! Building never performs I/O and never fails on odd input: an operator may
//! intentionally configure "wrong" bytes, and the knock must send them as-is.

use std::net::IpAddr;

use knockr_common::codec;
use knockr_common::constants::MIN_PORT;
use knockr_common::model::{IcmpSizeMode, SequenceStep, StepKind};

use crate::icmp;

/// Per-run parameters the builder needs besides the step itself.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext {
    /// Resolved target address; only the IP version matters here.
    pub target: IpAddr,
    pub size_mode: IcmpSizeMode,
    /// Assumed IPv4 header size for [`IcmpSizeMode::WithIpHeader`], 20..=60.
    pub ip4_header_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketPlan {
    Udp { port: u16, payload: Vec<u8> },
    /// No payload: the connect attempt (the SYN) is the knock.
    TcpConnect { port: u16 },
    /// One prebuilt echo request per repeat, sent back-to-back.
    Icmp { packets: Vec<Vec<u8>> },
}

/// Returns `None` only for steps that fail [`SequenceStep::is_valid`]; all
/// other inputs degrade to a best-effort packet.
pub fn build(step: &SequenceStep, ctx: &BuildContext) -> Option<PacketPlan> {
    match step.kind {
        StepKind::Udp => Some(PacketPlan::Udp {
            port: step.port.filter(|p| *p >= MIN_PORT)?,
            payload: codec::decode(step.content.as_deref(), step.encoding),
        }),
        StepKind::Tcp => Some(PacketPlan::TcpConnect {
            port: step.port.filter(|p| *p >= MIN_PORT)?,
        }),
        StepKind::Icmp => {
            let size = usize::from(step.icmp_size?);
            let ipv6 = ctx.target.is_ipv6();
            let len = icmp::payload_len(size, ctx.size_mode, ipv6, ctx.ip4_header_size);
            let content = codec::decode(step.content.as_deref(), step.encoding);
            let identifier = rand::random::<u16>();
            let count = step.icmp_count.unwrap_or(1).max(1);
            let packets = (1..=count)
                .map(|seq| icmp::echo_request(ipv6, len, &content, identifier, seq))
                .collect();
            Some(PacketPlan::Icmp { packets })
        }
    }
}
