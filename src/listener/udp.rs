use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{error, info};

use super::{answer, decode, encode};
use crate::error::DnsResult;
use crate::resolver::Resolver;

const RECV_BUFFER: usize = 4096;

/// Bind a `SO_REUSEPORT` UDP socket at `addr` and serve queries forever.
pub async fn serve(addr: SocketAddr, resolver: Arc<Resolver>) -> DnsResult<()> {
    let socket = bind_reuseport(addr)?;
    info!(%addr, "udp listener bound");

    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                error!(%err, "udp recv failed");
                continue;
            }
        };

        let query = match decode(&buf[..n]) {
            Ok(query) => query,
            Err(err) => {
                tracing::debug!(%err, %from, "dropping malformed udp query");
                continue;
            }
        };

        let resolver = Arc::clone(&resolver);
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let reply = answer(&resolver, &query).await;
            match encode(&reply) {
                Ok(bytes) => {
                    if let Err(err) = socket.send_to(&bytes, from).await {
                        error!(%err, %from, "udp send failed");
                    }
                }
                Err(err) => error!(%err, "failed to encode udp reply"),
            }
        });
    }
}

fn bind_reuseport(addr: SocketAddr) -> DnsResult<Arc<UdpSocket>> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(std_socket)?;
    Ok(Arc::new(socket))
}
