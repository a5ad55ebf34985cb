//! Host name resolution for configuration time
//!
//! Options take an [`IpAddr`]; these helpers turn a host name into one.

use crate::error::Result;
use std::net::IpAddr;
use tracing::debug;

/// Resolve `host` to every address it maps to, in resolver order
///
/// Duplicates are removed. Numeric addresses are returned as is.
///
/// # Examples
/// ```no_run
/// # async fn example() -> Result<(), simple_networking::NetError> {
/// use simple_networking::io::resolver;
///
/// let addrs = resolver::resolve("localhost").await?;
/// # Ok(())
/// # }
/// ```
pub async fn resolve(host: &str) -> Result<Vec<IpAddr>> {
    let mut addrs: Vec<IpAddr> = Vec::new();
    for addr in tokio::net::lookup_host((host, 0)).await? {
        if !addrs.contains(&addr.ip()) {
            addrs.push(addr.ip());
        }
    }

    debug!(host, count = addrs.len(), "Resolved host");
    Ok(addrs)
}

/// Resolve `host` to its IPv4 addresses
pub async fn resolve_ipv4(host: &str) -> Result<Vec<IpAddr>> {
    let mut addrs = resolve(host).await?;
    addrs.retain(IpAddr::is_ipv4);
    Ok(addrs)
}

/// Resolve `host` to its IPv6 addresses
pub async fn resolve_ipv6(host: &str) -> Result<Vec<IpAddr>> {
    let mut addrs = resolve(host).await?;
    addrs.retain(IpAddr::is_ipv6);
    Ok(addrs)
}
