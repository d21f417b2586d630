use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::Message;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio_util::sync::CancellationToken;

use super::{with_deadline, Transport, UpstreamUrl};
use crate::bootstrap;
use crate::error::{DnsError, DnsResult};

const DNS_MESSAGE_MIME: &str = "application/dns-message";

/// Routes `reqwest`'s internal name resolution through the bootstrap
/// resolver instead of the OS stub resolver, so a DoH upstream addressed by
/// hostname does not depend on system DNS being functional.
struct BootstrapResolve;

impl Resolve for BootstrapResolve {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs = bootstrap::get().resolve(&host).await.map_err(Box::new)?;
            let iter: Addrs = Box::new(
                addrs
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect::<Vec<_>>()
                    .into_iter(),
            );
            Ok(iter)
        })
    }
}

pub struct DohTransport {
    url: UpstreamUrl,
    client: reqwest::Client,
}

impl DohTransport {
    pub fn new(url: UpstreamUrl) -> DnsResult<Self> {
        let client = reqwest::Client::builder()
            .dns_resolver(Arc::new(BootstrapResolve))
            .use_rustls_tls()
            .build()
            .map_err(DnsError::Http)?;
        Ok(Self { url, client })
    }

    fn endpoint(&self) -> String {
        format!("https://{}:{}{}", self.url.host, self.url.port, self.url.path)
    }

    async fn exchange_inner(&self, msg: &Message) -> DnsResult<(Message, Duration)> {
        let wire = msg.to_vec()?;
        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", DNS_MESSAGE_MIME)
            .header("Accept", DNS_MESSAGE_MIME)
            .body(wire)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DnsError::Other(format!(
                "doh query to {} failed with status {}",
                self.url.host,
                response.status()
            )));
        }

        let body = response.bytes().await?;
        let rtt = started.elapsed();
        let reply = Message::from_vec(&body)?;
        Ok((reply, rtt))
    }
}

#[async_trait]
impl Transport for DohTransport {
    async fn exchange(
        &self,
        msg: &Message,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> DnsResult<(Message, Duration)> {
        with_deadline(deadline, cancel, self.exchange_inner(msg)).await
    }
}
