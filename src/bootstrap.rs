//! Resolution of upstream nameserver hostnames into dialable addresses.
//!
//! Transports need a `SocketAddr` to dial but upstream hosts are configured
//! by hostname as often as by IP literal. A process-wide bootstrap resolver
//! breaks the chicken-and-egg problem of "use the resolver to resolve the
//! resolver's own upstreams" without composing a `Resolver` inside itself.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::net::lookup_host;

use crate::error::{DnsError, DnsResult};

/// Resolves a bare hostname to one or more IP addresses prior to dialing.
#[async_trait]
pub trait BootstrapResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> DnsResult<Vec<IpAddr>>;
}

/// Resolves via the OS stub resolver (`getaddrinfo`, through Tokio's
/// non-blocking wrapper). The default when no bootstrap host list is given.
pub struct OsBootstrap;

#[async_trait]
impl BootstrapResolver for OsBootstrap {
    async fn resolve(&self, host: &str) -> DnsResult<Vec<IpAddr>> {
        let addrs = lookup_host((host, 0))
            .await
            .map_err(|err| DnsError::BootstrapFailed(format!("{host}: {err}")))?
            .map(|addr| addr.ip())
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(DnsError::BootstrapFailed(format!(
                "{host}: no addresses returned"
            )));
        }
        Ok(addrs)
    }
}

/// Resolves only from a fixed table built at startup from upstream entries
/// that were themselves given as IP literals, so the forwarder never needs
/// to touch the OS resolver for its own upstream hosts.
pub struct StaticBootstrap {
    table: Vec<(String, IpAddr)>,
}

impl StaticBootstrap {
    pub fn new(table: Vec<(String, IpAddr)>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl BootstrapResolver for StaticBootstrap {
    async fn resolve(&self, host: &str) -> DnsResult<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = self
            .table
            .iter()
            .filter(|(name, _)| name == host)
            .map(|(_, addr)| *addr)
            .collect();
        if addrs.is_empty() {
            Err(DnsError::BootstrapFailed(format!(
                "{host}: not a known upstream literal"
            )))
        } else {
            Ok(addrs)
        }
    }
}

static BOOTSTRAP: OnceLock<Arc<dyn BootstrapResolver>> = OnceLock::new();

/// Install the process-wide bootstrap resolver. Must be called at most once,
/// before any transport dials a hostname-addressed upstream.
pub fn install(resolver: Arc<dyn BootstrapResolver>) {
    let _ = BOOTSTRAP.set(resolver);
}

/// The installed bootstrap resolver, falling back to `OsBootstrap` if
/// `install` was never called (e.g. in unit tests that exercise a transport
/// directly).
pub fn get() -> Arc<dyn BootstrapResolver> {
    BOOTSTRAP
        .get_or_init(|| Arc::new(OsBootstrap))
        .clone()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_bootstrap_resolves_known_literal() {
        let table = vec![("ns.example.com".to_string(), "1.1.1.1".parse().unwrap())];
        let bootstrap = StaticBootstrap::new(table);
        let addrs = bootstrap.resolve("ns.example.com").await.unwrap();
        assert_eq!(addrs, vec!["1.1.1.1".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn static_bootstrap_rejects_unknown_host() {
        let bootstrap = StaticBootstrap::new(vec![]);
        assert!(bootstrap.resolve("unknown.example.com").await.is_err());
    }
}
