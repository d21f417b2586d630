use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use super::{answer, bind_tcp_reuseport, decode, encode};
use crate::error::{DnsError, DnsResult};
use crate::resolver::Resolver;
use crate::transport::framing::{read_framed, write_framed};

/// Serve DNS-over-TLS at `addr`, terminating TLS with the certificate and
/// key at `certfile`/`keyfile`.
pub async fn serve(
    addr: SocketAddr,
    certfile: &Path,
    keyfile: &Path,
    resolver: Arc<Resolver>,
) -> DnsResult<()> {
    let acceptor = build_acceptor(certfile, keyfile)?;
    let listener = bind_tcp_reuseport(addr)?;
    info!(%addr, "dot listener bound");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(%err, "dot accept failed");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(%peer, %err, "tls handshake failed");
                    return;
                }
            };
            if let Err(err) = handle_connection(tls_stream, &resolver).await {
                debug!(%peer, %err, "dot connection ended");
            }
        });
    }
}

async fn handle_connection(
    mut stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    resolver: &Arc<Resolver>,
) -> DnsResult<()> {
    loop {
        let bytes = match read_framed(&mut stream).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(()),
        };
        let query = match decode(&bytes) {
            Ok(query) => query,
            Err(_) => return Ok(()),
        };
        let reply = answer(resolver, &query).await;
        let wire = encode(&reply)?;
        write_framed(&mut stream, &wire).await?;
    }
}

pub(crate) fn build_acceptor(certfile: &Path, keyfile: &Path) -> DnsResult<TlsAcceptor> {
    build_acceptor_with_alpn(certfile, keyfile, &[])
}

/// Build a `TlsAcceptor`, advertising `alpn_protocols` (e.g. `h2`/`http/1.1`
/// for the DoH listener) via ALPN negotiation.
pub(crate) fn build_acceptor_with_alpn(
    certfile: &Path,
    keyfile: &Path,
    alpn_protocols: &[&[u8]],
) -> DnsResult<TlsAcceptor> {
    let certs = load_certs(certfile)?;
    let key = load_key(keyfile)?;
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(DnsError::Tls)?;
    config.alpn_protocols = alpn_protocols.iter().map(|p| p.to_vec()).collect();
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> DnsResult<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(DnsError::Io)
}

fn load_key(path: &Path) -> DnsResult<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| DnsError::config(format!("no private key found in {}", path.display())))
}
