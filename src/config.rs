//! YAML configuration schema and CLI flag parsing.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;

use crate::bootstrap::{self, BootstrapResolver, StaticBootstrap};
use crate::cache::{Cache, DEFAULT_CAPACITY};
use crate::error::{DnsError, DnsResult};
use crate::hosts;
use crate::pool::{Client, ClientPool};
use crate::resolver::Resolver;
use crate::strategy;
use crate::transport::{self, UpstreamUrl};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/leedns/config.yaml";
pub const DEFAULT_PROBE_NAME: &str = "domain.com";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_HTTP_PATH: &str = "/dns-query";

/// Command-line entry point: only a config file path is exposed.
#[derive(Debug, Parser)]
#[command(name = "leedns", about = "A recursive DNS forwarder")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListenerConfig {
    #[serde(rename = "type")]
    pub kind: ListenerKind,
    pub addr: String,
    #[serde(default)]
    pub certfile: Option<PathBuf>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default = "default_http_path")]
    pub http_path: String,
}

fn default_http_path() -> String {
    DEFAULT_HTTP_PATH.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerKind {
    Udp,
    Tcp,
    Tls,
    #[serde(rename = "tcp-tls")]
    TcpTls,
    Http,
    Https,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub listener: Vec<ListenerConfig>,
    pub upstream: Vec<UpstreamConfig>,
    #[serde(default)]
    pub bootstrap: Vec<String>,
    #[serde(default)]
    pub hosts: Option<PathBuf>,
    #[serde(default)]
    pub cache: bool,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_probe_name")]
    pub probe_name: String,
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_strategy() -> String {
    "concurrent".to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_probe_name() -> String {
    DEFAULT_PROBE_NAME.to_string()
}

impl Config {
    /// Load and validate the configuration at `path`. Validation is eager:
    /// an unrecognised strategy name or a zero-weight client under
    /// `load-balanced` fails before any listener binds.
    pub fn load(path: impl AsRef<Path>) -> DnsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&text)
            .map_err(|err| DnsError::config(format!("invalid configuration: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> DnsResult<()> {
        strategy::build(&self.strategy)?;

        if self.upstream.is_empty() {
            return Err(DnsError::config("at least one upstream is required"));
        }

        if self.strategy == "load-balanced" {
            for upstream in &self.upstream {
                if upstream.weight == 0 {
                    return Err(DnsError::config(format!(
                        "upstream {} has zero weight under load-balanced strategy",
                        upstream.url
                    )));
                }
            }
        }

        for listener in &self.listener {
            if matches!(listener.kind, ListenerKind::Tls | ListenerKind::TcpTls | ListenerKind::Https)
                && (listener.certfile.is_none() || listener.keyfile.is_none())
            {
                return Err(DnsError::config(format!(
                    "listener {} requires certfile and keyfile",
                    listener.addr
                )));
            }
        }

        Ok(())
    }

    /// Install the process-wide bootstrap resolver from the `bootstrap` list,
    /// or derive one automatically from any upstream whose host is an IP
    /// literal when the list is empty.
    pub fn install_bootstrap(&self) -> DnsResult<()> {
        let mut table = Vec::new();

        for raw in &self.bootstrap {
            let url = UpstreamUrl::parse(raw)?;
            if let Ok(ip) = url.host.parse::<IpAddr>() {
                table.push((url.host.clone(), ip));
            }
        }

        if table.is_empty() {
            for upstream in &self.upstream {
                let url = UpstreamUrl::parse(&upstream.url)?;
                if let Ok(ip) = url.host.parse::<IpAddr>() {
                    table.push((url.host.clone(), ip));
                }
            }
        }

        let resolver: Arc<dyn BootstrapResolver> = Arc::new(StaticBootstrap::new(table));
        bootstrap::install(resolver);
        Ok(())
    }

    pub fn build_hosts(&self) -> DnsResult<hosts::Shared> {
        match &self.hosts {
            Some(path) => hosts::watch(path.clone()),
            None => Ok(hosts::Shared::empty()),
        }
    }

    pub fn build_cache(&self) -> Option<Arc<Cache>> {
        self.cache.then(|| Arc::new(Cache::new(DEFAULT_CAPACITY)))
    }

    pub fn build_pool(&self) -> DnsResult<Arc<ClientPool>> {
        let raw_weights: Vec<u32> = self.upstream.iter().map(|u| u.weight).collect();
        let weights = crate::pool::normalize_weights(&raw_weights);

        let mut clients = Vec::with_capacity(self.upstream.len());
        for (upstream, weight) in self.upstream.iter().zip(weights) {
            let url = UpstreamUrl::parse(&upstream.url)?;
            let transport = transport::build(&url)?;
            clients.push(Arc::new(Client::new(url, transport, weight)));
        }

        Ok(Arc::new(ClientPool::new(
            clients,
            self.max_retries,
            self.probe_name.clone(),
        )))
    }

    /// Assemble the full resolver from this configuration: bootstrap, hosts,
    /// cache, pool and strategy.
    pub fn build_resolver(&self) -> DnsResult<Arc<Resolver>> {
        self.install_bootstrap()?;
        let hosts = self.build_hosts()?;
        let cache = self.build_cache();
        let pool = self.build_pool()?;
        let strategy = strategy::build(&self.strategy)?;
        Ok(Resolver::new(hosts, cache, pool, strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_strategy() {
        let config = Config {
            listener: vec![],
            upstream: vec![UpstreamConfig { url: "udp://1.1.1.1".into(), weight: 1 }],
            bootstrap: vec![],
            hosts: None,
            cache: false,
            strategy: "bogus".into(),
            max_retries: 3,
            probe_name: DEFAULT_PROBE_NAME.into(),
            log_level: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_weight_under_load_balanced() {
        let config = Config {
            listener: vec![],
            upstream: vec![UpstreamConfig { url: "udp://1.1.1.1".into(), weight: 0 }],
            bootstrap: vec![],
            hosts: None,
            cache: false,
            strategy: "load-balanced".into(),
            max_retries: 3,
            probe_name: DEFAULT_PROBE_NAME.into(),
            log_level: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
upstream:
  - url: "udp://1.1.1.1"
    weight: 1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy, "concurrent");
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.probe_name, DEFAULT_PROBE_NAME);
    }

    #[test]
    fn kebab_case_keys_override_their_defaults() {
        let yaml = r#"
upstream:
  - url: "udp://1.1.1.1"
max-retries: 7
probe-name: "probe.example.com"
log-level: "debug"
listener:
  - type: https
    addr: "0.0.0.0:443"
    certfile: "/etc/leedns/cert.pem"
    keyfile: "/etc/leedns/key.pem"
    http-path: "/resolve"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.probe_name, "probe.example.com");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.listener[0].http_path, "/resolve");
    }
}
