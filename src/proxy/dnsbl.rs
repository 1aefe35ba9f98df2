//! DNS blacklist lookups

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::debug;

/// Name resolution used for DNSBL queries and candidate hosts
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, name: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's `getaddrinfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, name: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = lookup_host((name, 0)).await?;
        Ok(addrs.map(|sa| sa.ip()).collect())
    }
}

/// Outcome of one DNSBL query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsblVerdict {
    /// Zone returned a listing record
    Listed,
    /// Zone has no record for the host
    Clean,
    /// Lookup timed out or the zone answered with an error code
    Unknown,
}

/// Query name for `ip` in `zone`: reversed octets prepended to the zone
pub fn query_name(ip: Ipv4Addr, zone: &str) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{}.{}.{}.{}.{}", d, c, b, a, zone.trim_end_matches('.'))
}

/// Interpret the addresses a zone answered with
///
/// Listings live in 127.0.0.0/8; 127.255.255.0/24 is used by several zones
/// for "query refused" style errors. Anything outside loopback is a
/// hijacking resolver, not a listing.
pub fn classify_answer<I>(addrs: I) -> DnsblVerdict
where
    I: IntoIterator<Item = IpAddr>,
{
    let mut verdict = DnsblVerdict::Clean;
    for addr in addrs {
        match addr {
            IpAddr::V4(v4) if v4.octets()[0] == 127 && v4.octets()[1..3] != [255, 255] => {
                return DnsblVerdict::Listed;
            }
            _ => verdict = DnsblVerdict::Unknown,
        }
    }
    verdict
}

/// Look up `ip` in a single DNSBL zone
pub async fn lookup(resolver: &dyn Resolver, ip: Ipv4Addr, zone: &str, timeout: Duration) -> DnsblVerdict {
    let name = query_name(ip, zone);
    let verdict = match tokio::time::timeout(timeout, resolver.resolve(&name)).await {
        Ok(Ok(addrs)) => classify_answer(addrs),
        // NXDOMAIN surfaces as a resolver error: not listed
        Ok(Err(e)) => {
            debug!(query = %name, error = %e, "DNSBL lookup returned no record");
            DnsblVerdict::Clean
        }
        Err(_) => {
            debug!(query = %name, "DNSBL lookup timed out");
            DnsblVerdict::Unknown
        }
    };
    verdict
}
