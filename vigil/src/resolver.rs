use std::net::IpAddr;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::ProbeError;

/// Resolves `host` to a single address.
///
/// IP literals (bracketed IPv6 included) are returned as-is. Otherwise the
/// system resolver is queried within `wait`; with `prefer_ipv4` the first
/// IPv4 address wins, falling back to the first address of any family.
pub async fn resolve(host: &str, prefer_ipv4: bool, wait: Duration) -> Result<IpAddr, ProbeError> {
    let trimmed = host.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.is_empty() {
        return Err(resolution_error(host, "empty address"));
    }
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(ip);
    }

    let lookup = tokio::net::lookup_host((trimmed, 0));
    let addrs: Vec<IpAddr> = match timeout(wait, lookup).await {
        Ok(Ok(addrs)) => addrs.map(|addr| addr.ip()).collect(),
        Ok(Err(e)) => return Err(resolution_error(host, &e.to_string())),
        Err(_) => return Err(resolution_error(host, "timed out")),
    };

    let picked = if prefer_ipv4 {
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
    } else {
        addrs.first()
    };

    picked
        .copied()
        .ok_or_else(|| resolution_error(host, "no addresses found"))
}

fn resolution_error(host: &str, reason: &str) -> ProbeError {
    ProbeError::Resolution {
        host: host.to_string(),
        reason: reason.to_string(),
    }
}
