//! The three send primitives a knock can use.
//!
//! All of them are fire-and-forget with a bounded duration: a knock never
//! waits for a response, and retry policy lives with the caller. The trait
//! exists so the orchestrator can be exercised against a recording mock.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::{self, Icmpv6Packet, MutableIcmpv6Packet};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::{self, TransportChannelType, TransportProtocol};
use thiserror::Error;
use tokio::net::{TcpSocket, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

const TRANSPORT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("raw socket permission denied")]
    PermissionDenied(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result of a TCP connect attempt. For a knock every outcome means
/// "delivered"; the resource checker cares about the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Refused,
    TimedOut,
    NetworkError,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    /// TTL / hop-limit override. `None` keeps the system default.
    pub ttl: Option<u8>,
    /// Fixed local source port; binding failures fall back to ephemeral.
    pub local_port: Option<u16>,
}

#[async_trait]
pub trait KnockTransport: Send + Sync {
    /// Sends one datagram and closes the socket. Never waits for a reply.
    async fn send_udp(
        &self,
        addr: IpAddr,
        port: u16,
        payload: &[u8],
        opts: &SocketOptions,
    ) -> Result<(), TransportError>;

    /// Delivers a SYN by attempting a connect, then drops the socket
    /// immediately whatever happened.
    async fn attempt_tcp_connect(
        &self,
        addr: IpAddr,
        port: u16,
        opts: &SocketOptions,
        limit: Duration,
    ) -> Result<ConnectOutcome, TransportError>;

    /// Sends a prebuilt ICMP packet over a raw layer-4 channel. Missing
    /// privilege surfaces as [`TransportError::PermissionDenied`].
    async fn send_icmp(
        &self,
        addr: IpAddr,
        packet: &[u8],
        opts: &SocketOptions,
    ) -> Result<(), TransportError>;
}

/// Real-socket implementation.
pub struct NetTransport;

#[async_trait]
impl KnockTransport for NetTransport {
    async fn send_udp(
        &self,
        addr: IpAddr,
        port: u16,
        payload: &[u8],
        opts: &SocketOptions,
    ) -> Result<(), TransportError> {
        let socket = match UdpSocket::bind(bind_addr(addr, opts.local_port)).await {
            Ok(socket) => socket,
            Err(error) if opts.local_port.is_some() => {
                warn!(%error, local_port = ?opts.local_port, "local bind failed, using ephemeral port");
                UdpSocket::bind(bind_addr(addr, None)).await?
            }
            Err(error) => return Err(error.into()),
        };
        if let Some(ttl) = effective_ttl(opts) {
            set_socket_ttl(&socket, addr, ttl);
        }
        socket.send_to(payload, SocketAddr::new(addr, port)).await?;
        Ok(())
    }

    async fn attempt_tcp_connect(
        &self,
        addr: IpAddr,
        port: u16,
        opts: &SocketOptions,
        limit: Duration,
    ) -> Result<ConnectOutcome, TransportError> {
        let socket = match addr {
            IpAddr::V4(_) => TcpSocket::new_v4()?,
            IpAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(port) = opts.local_port {
            if let Err(error) = socket.bind(bind_addr(addr, Some(port))) {
                warn!(%error, local_port = port, "local bind failed, using ephemeral port");
            }
        }
        if let Some(ttl) = effective_ttl(opts) {
            // Must happen before connect so the SYN itself carries the TTL.
            set_fd_ttl(&socket, addr, ttl);
        }
        let outcome = match timeout(limit, socket.connect(SocketAddr::new(addr, port))).await {
            Ok(Ok(_stream)) => ConnectOutcome::Connected,
            Ok(Err(error)) => match error.kind() {
                io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                    ConnectOutcome::Refused
                }
                _ => {
                    debug!(%error, %addr, port, "tcp connect failed");
                    ConnectOutcome::NetworkError
                }
            },
            Err(_elapsed) => ConnectOutcome::TimedOut,
        };
        Ok(outcome)
    }

    async fn send_icmp(
        &self,
        addr: IpAddr,
        packet: &[u8],
        opts: &SocketOptions,
    ) -> Result<(), TransportError> {
        let packet = packet.to_vec();
        let ttl = effective_ttl(opts);
        tokio::task::spawn_blocking(move || send_icmp_blocking(addr, packet, ttl))
            .await
            .map_err(|join| TransportError::Io(io::Error::other(join)))?
    }
}

/// One-shot startup probe so a missing raw-socket privilege is reported
/// once instead of on every ICMP step.
pub fn probe_raw_capability() -> bool {
    transport::transport_channel(
        TRANSPORT_BUFFER_SIZE,
        TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp)),
    )
    .is_ok()
}

fn send_icmp_blocking(
    addr: IpAddr,
    mut packet: Vec<u8>,
    ttl: Option<u8>,
) -> Result<(), TransportError> {
    let channel_type = match addr {
        IpAddr::V4(_) => TransportChannelType::Layer4(TransportProtocol::Ipv4(
            IpNextHeaderProtocols::Icmp,
        )),
        IpAddr::V6(_) => TransportChannelType::Layer4(TransportProtocol::Ipv6(
            IpNextHeaderProtocols::Icmpv6,
        )),
    };
    let (mut tx, _rx) =
        transport::transport_channel(TRANSPORT_BUFFER_SIZE, channel_type).map_err(raw_socket_error)?;
    if let Some(ttl) = ttl {
        if let Err(error) = tx.set_ttl(ttl) {
            warn!(%error, ttl, "failed to set ttl on raw channel");
        }
    }
    match addr {
        IpAddr::V4(_) => {
            let pkt = IcmpPacket::new(&packet).ok_or_else(short_packet)?;
            tx.send_to(pkt, addr)?;
        }
        IpAddr::V6(dest) => {
            fill_icmpv6_checksum(&mut packet, dest);
            let pkt = Icmpv6Packet::new(&packet).ok_or_else(short_packet)?;
            tx.send_to(pkt, addr)?;
        }
    }
    Ok(())
}

/// The ICMPv6 checksum covers a pseudo-header with the source address, so it
/// can only be computed once we know which local address routes to `dest`.
fn fill_icmpv6_checksum(packet: &mut [u8], dest: Ipv6Addr) {
    let Some(source) = local_source_v6(dest) else {
        // The kernel fills it in for ICMPv6 raw sockets; best effort here.
        debug!(%dest, "no local ipv6 source, leaving checksum to the kernel");
        return;
    };
    let checksum = match Icmpv6Packet::new(packet) {
        Some(pkt) => icmpv6::checksum(&pkt, &source, &dest),
        None => return,
    };
    if let Some(mut pkt) = MutableIcmpv6Packet::new(packet) {
        pkt.set_checksum(checksum);
    }
}

fn local_source_v6(dest: Ipv6Addr) -> Option<Ipv6Addr> {
    let socket = std::net::UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((dest, 9)).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V6(addr) => Some(*addr.ip()),
        SocketAddr::V4(_) => None,
    }
}

fn raw_socket_error(error: io::Error) -> TransportError {
    if error.kind() == io::ErrorKind::PermissionDenied {
        TransportError::PermissionDenied(error)
    } else {
        TransportError::Io(error)
    }
}

fn short_packet() -> TransportError {
    TransportError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "icmp packet shorter than its header",
    ))
}

fn bind_addr(target: IpAddr, local_port: Option<u16>) -> SocketAddr {
    let unspecified: IpAddr = match target {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    SocketAddr::new(unspecified, local_port.unwrap_or(0))
}

fn effective_ttl(opts: &SocketOptions) -> Option<u8> {
    opts.ttl.filter(|t| *t > 0)
}

fn set_socket_ttl(socket: &UdpSocket, addr: IpAddr, ttl: u8) {
    match addr {
        IpAddr::V4(_) => {
            if let Err(error) = socket.set_ttl(u32::from(ttl)) {
                warn!(%error, ttl, "failed to set ttl");
            }
        }
        IpAddr::V6(_) => set_fd_ttl(socket, addr, ttl),
    }
}

/// std/tokio expose no hop-limit setter, and the TCP TTL has to be in place
/// before `connect`, hence the setsockopt call.
#[cfg(unix)]
fn set_fd_ttl<F: std::os::fd::AsRawFd>(socket: &F, addr: IpAddr, ttl: u8) {
    let (level, name) = match addr {
        IpAddr::V4(_) => (libc::IPPROTO_IP, libc::IP_TTL),
        IpAddr::V6(_) => (libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS),
    };
    let value = libc::c_int::from(ttl);
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        warn!(ttl, error = %io::Error::last_os_error(), "setsockopt ttl failed");
    }
}

#[cfg(not(unix))]
fn set_fd_ttl<F>(_socket: &F, _addr: IpAddr, ttl: u8) {
    debug!(ttl, "ttl override not supported on this platform");
}
