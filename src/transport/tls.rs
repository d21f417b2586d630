use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::Message;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use super::tcp::{read_framed, write_framed};
use super::{resolve_host, with_deadline, Transport, UpstreamUrl};
use crate::error::{DnsError, DnsResult};

static CLIENT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

fn client_config() -> Arc<ClientConfig> {
    CLIENT_CONFIG
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

pub struct TlsTransport {
    url: UpstreamUrl,
    connector: TlsConnector,
}

impl TlsTransport {
    pub fn new(url: UpstreamUrl) -> Self {
        Self {
            url,
            connector: TlsConnector::from(client_config()),
        }
    }

    async fn exchange_inner(&self, msg: &Message) -> DnsResult<(Message, Duration)> {
        let addr = resolve_host(&self.url.host).await?;
        let tcp = TcpStream::connect((addr, self.url.port)).await?;

        let server_name = ServerName::try_from(self.url.host.clone())
            .map_err(|_| DnsError::config(format!("invalid SNI host: {}", self.url.host)))?;
        let mut tls = self.connector.connect(server_name, tcp).await?;

        let wire = msg.to_vec()?;
        let started = Instant::now();
        write_framed(&mut tls, &wire).await?;
        let reply_bytes = read_framed(&mut tls).await?;
        let rtt = started.elapsed();

        let reply = Message::from_vec(&reply_bytes)?;
        Ok((reply, rtt))
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn exchange(
        &self,
        msg: &Message,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> DnsResult<(Message, Duration)> {
        with_deadline(deadline, cancel, self.exchange_inner(msg)).await
    }
}
