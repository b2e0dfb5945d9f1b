use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use knockr_core::transport::{ConnectOutcome, KnockTransport, SocketOptions, TransportError};

/// One observed transmission, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Udp { port: u16, payload: Vec<u8> },
    TcpConnect { port: u16 },
    Icmp { len: usize },
}

/// Records everything the engine asks it to send. Connect attempts pop
/// their outcome from a script; an empty script always connects.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Sent>>,
    connect_script: Mutex<VecDeque<ConnectOutcome>>,
    deny_icmp: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying_icmp() -> Self {
        Self {
            deny_icmp: true,
            ..Self::default()
        }
    }

    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.connect_script.lock().unwrap().extend(outcomes);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects_to(&self, port: u16) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::TcpConnect { port: p } if *p == port))
            .count()
    }
}

#[async_trait]
impl KnockTransport for MockTransport {
    async fn send_udp(
        &self,
        _addr: IpAddr,
        port: u16,
        payload: &[u8],
        _opts: &SocketOptions,
    ) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Udp {
            port,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn attempt_tcp_connect(
        &self,
        _addr: IpAddr,
        port: u16,
        _opts: &SocketOptions,
        _limit: Duration,
    ) -> Result<ConnectOutcome, TransportError> {
        self.sent.lock().unwrap().push(Sent::TcpConnect { port });
        let outcome = self
            .connect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectOutcome::Connected);
        Ok(outcome)
    }

    async fn send_icmp(
        &self,
        _addr: IpAddr,
        packet: &[u8],
        _opts: &SocketOptions,
    ) -> Result<(), TransportError> {
        if self.deny_icmp {
            return Err(TransportError::PermissionDenied(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "raw sockets disabled in this mock",
            )));
        }
        self.sent.lock().unwrap().push(Sent::Icmp { len: packet.len() });
        Ok(())
    }
}
