use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, error, info};

use super::{answer, bind_tcp_reuseport, decode, encode};
use crate::error::DnsResult;
use crate::resolver::Resolver;
use crate::transport::framing::{read_framed, write_framed};

/// Bind a `SO_REUSEPORT` TCP socket at `addr` and serve queries forever, one
/// task per accepted connection.
pub async fn serve(addr: SocketAddr, resolver: Arc<Resolver>) -> DnsResult<()> {
    let listener = bind_tcp_reuseport(addr)?;
    info!(%addr, "tcp listener bound");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(%err, "tcp accept failed");
                continue;
            }
        };
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &resolver).await {
                debug!(%peer, %err, "tcp connection ended");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, resolver: &Arc<Resolver>) -> DnsResult<()> {
    loop {
        let bytes = match read_framed(&mut stream).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(()), // peer closed or malformed frame
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
