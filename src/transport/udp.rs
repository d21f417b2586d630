use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::{resolve_host, with_deadline, Transport, UpstreamUrl};
use crate::error::DnsResult;

/// Receive buffer size for a plain UDP exchange (§4.1).
const RECV_BUFFER: usize = 4096;

pub struct UdpTransport {
    url: UpstreamUrl,
}

impl UdpTransport {
    pub fn new(url: UpstreamUrl) -> Self {
        Self { url }
    }

    async fn exchange_inner(&self, msg: &Message) -> DnsResult<(Message, Duration)> {
        let addr = resolve_host(&self.url.host).await?;
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((addr, self.url.port)).await?;

        let wire = msg.to_vec()?;
        let started = Instant::now();
        socket.send(&wire).await?;

        let mut buf = vec![0u8; RECV_BUFFER];
        let n = socket.recv(&mut buf).await?;
        let rtt = started.elapsed();
        let reply = Message::from_vec(&buf[..n])?;
        Ok((reply, rtt))
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn exchange(
        &self,
        msg: &Message,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> DnsResult<(Message, Duration)> {
        with_deadline(deadline, cancel, self.exchange_inner(msg)).await
    }
}
