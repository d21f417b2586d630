//! Wire transports to upstream nameservers: plain UDP, plain TCP, DNS-over-TLS
//! and DNS-over-HTTPS, behind one `Transport` trait object.

mod doh;
mod tcp;
mod tls;
mod udp;

pub use doh::DohTransport;
pub use tcp::TcpTransport;
pub use tls::TlsTransport;
pub use udp::UdpTransport;

/// Shared RFC 1035 §4.2.2 length-prefix framing, reused by the TCP and DoT
/// listeners as well as the TCP and TLS upstream transports.
pub mod framing {
    pub use super::tcp::{read_framed, write_framed};
}

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use crate::bootstrap;
use crate::error::{DnsError, DnsResult};

/// Default per-exchange timeout, used unless a caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A parsed upstream URL: `scheme://host[:port][/path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Udp,
    Tcp,
    Tls,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Udp => "udp",
            Scheme::Tcp => "tcp",
            Scheme::Tls => "tls",
            Scheme::Https => "https",
        };
        f.write_str(s)
    }
}

impl UpstreamUrl {
    pub fn parse(raw: &str) -> DnsResult<Self> {
        let (scheme_str, rest) = raw
            .split_once("://")
            .ok_or_else(|| DnsError::config(format!("upstream url missing scheme: {raw}")))?;
        let scheme = match scheme_str {
            "udp" => Scheme::Udp,
            "tcp" => Scheme::Tcp,
            "tls" | "tcp-tls" => Scheme::Tls,
            "http" | "https" => Scheme::Https,
            other => {
                return Err(DnsError::config(format!("unknown upstream scheme: {other}")));
            }
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, format!("/{path}")),
            None => (rest, default_path(scheme)),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port_str)) if !host.contains(']') || host.ends_with(']') => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| DnsError::config(format!("invalid port in upstream url: {raw}")))?;
                (host.trim_matches(['[', ']']).to_string(), port)
            }
            _ => (
                authority.trim_matches(['[', ']']).to_string(),
                default_port(scheme),
            ),
        };

        if host.is_empty() {
            return Err(DnsError::config(format!("upstream url missing host: {raw}")));
        }

        Ok(Self { scheme, host, port, path })
    }
}

fn default_port(scheme: Scheme) -> u16 {
    match scheme {
        Scheme::Udp | Scheme::Tcp => 53,
        Scheme::Tls => 853,
        Scheme::Https => 443,
    }
}

fn default_path(scheme: Scheme) -> String {
    match scheme {
        Scheme::Https => "/dns-query".to_string(),
        _ => String::new(),
    }
}

/// Resolve `host` to a single dialable address, using the process-wide
/// bootstrap resolver and picking uniformly at random among the results if
/// the host is not already an IP literal.
pub(crate) async fn resolve_host(host: &str) -> DnsResult<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs = bootstrap::get().resolve(host).await?;
    addrs
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| DnsError::BootstrapFailed(format!("{host}: empty address list")))
}

/// A uniform handle to one of the four upstream wire transports.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(
        &self,
        msg: &Message,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> DnsResult<(Message, Duration)>;
}

/// Build the transport implementation matching `url.scheme`.
pub fn build(url: &UpstreamUrl) -> DnsResult<Box<dyn Transport>> {
    match url.scheme {
        Scheme::Udp => Ok(Box::new(UdpTransport::new(url.clone()))),
        Scheme::Tcp => Ok(Box::new(TcpTransport::new(url.clone()))),
        Scheme::Tls => Ok(Box::new(TlsTransport::new(url.clone()))),
        Scheme::Https => Ok(Box::new(DohTransport::new(url.clone())?)),
    }
}

/// Race an exchange future against its timeout and an externally supplied
/// cancellation signal, uniformly for every transport.
pub(crate) async fn with_deadline<F>(
    deadline: Duration,
    cancel: CancellationToken,
    fut: F,
) -> DnsResult<(Message, Duration)>
where
    F: std::future::Future<Output = DnsResult<(Message, Duration)>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DnsError::Cancelled),
        res = tokio::time::timeout(deadline, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(DnsError::Timeout),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_default_port() {
        let url = UpstreamUrl::parse("udp://8.8.8.8").unwrap();
        assert_eq!(url.scheme, Scheme::Udp);
        assert_eq!(url.port, 53);
    }

    #[test]
    fn parses_explicit_port() {
        let url = UpstreamUrl::parse("tls://dns.example.com:8853").unwrap();
        assert_eq!(url.scheme, Scheme::Tls);
        assert_eq!(url.port, 8853);
        assert_eq!(url.host, "dns.example.com");
    }

    #[test]
    fn parses_https_with_path() {
        let url = UpstreamUrl::parse("https://dns.example.com/custom-path").unwrap();
        assert_eq!(url.scheme, Scheme::Https);
        assert_eq!(url.path, "/custom-path");
        assert_eq!(url.port, 443);
    }

    #[test]
    fn https_without_path_defaults_to_dns_query() {
        let url = UpstreamUrl::parse("https://dns.example.com").unwrap();
        assert_eq!(url.path, "/dns-query");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(UpstreamUrl::parse("ftp://example.com").is_err());
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(UpstreamUrl::parse("example.com").is_err());
    }
}
