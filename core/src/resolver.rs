//! One host resolution per run, honoring the sequence's IP preference.

use std::net::IpAddr;

use knockr_common::error::KnockFailure;
use knockr_common::model::ProtocolPreference;
use tokio::net::lookup_host;
use tracing::debug;

pub async fn resolve_target(
    host: &str,
    preference: ProtocolPreference,
) -> Result<IpAddr, KnockFailure> {
    let addresses: Vec<IpAddr> = match lookup_host((host, 0u16)).await {
        Ok(resolved) => resolved.map(|sa| sa.ip()).collect(),
        Err(error) => {
            debug!(host, %error, "host lookup failed");
            Vec::new()
        }
    };
    pick_address(&addresses, preference).ok_or_else(|| KnockFailure::ResolutionFailed {
        host: host.to_owned(),
    })
}

/// Version-locked preferences require a matching family; "prefer" falls back
/// to whatever the other family offers.
pub fn pick_address(addresses: &[IpAddr], preference: ProtocolPreference) -> Option<IpAddr> {
    let v4 = addresses.iter().copied().find(IpAddr::is_ipv4);
    let v6 = addresses.iter().copied().find(IpAddr::is_ipv6);
    match preference {
        ProtocolPreference::Ipv4Only => v4,
        ProtocolPreference::Ipv6Only => v6,
        ProtocolPreference::PreferIpv4 => v4.or(v6),
        ProtocolPreference::PreferIpv6 => v6.or(v4),
    }
}
