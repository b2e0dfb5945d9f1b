//! Post-knock reachability probe.
//!
//! A single attempt; the retry schedule belongs to the orchestrator. Only a
//! completed connect counts as reachable: a fast refusal proves something
//! answered, but not that the protected service was opened for us.

use std::net::IpAddr;
use std::sync::Arc;

use knockr_common::model::ResourceCheck;
use tokio::net::lookup_host;
use tracing::debug;

use crate::transport::{ConnectOutcome, KnockTransport, SocketOptions};

pub struct ResourceChecker {
    transport: Arc<dyn KnockTransport>,
}

impl ResourceChecker {
    pub fn new(transport: Arc<dyn KnockTransport>) -> Self {
        Self { transport }
    }

    pub async fn check(&self, target: &ResourceCheck) -> bool {
        let Some(addr) = resolve_any(&target.host).await else {
            debug!(host = %target.host, "check target did not resolve");
            return false;
        };
        let outcome = self
            .transport
            .attempt_tcp_connect(addr, target.port, &SocketOptions::default(), target.timeout())
            .await;
        debug!(host = %target.host, port = target.port, ?outcome, "resource check");
        matches!(outcome, Ok(ConnectOutcome::Connected))
    }
}

async fn resolve_any(host: &str) -> Option<IpAddr> {
    lookup_host((host, 0u16))
        .await
        .ok()?
        .next()
        .map(|sa| sa.ip())
}
