use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::{resolve_host, with_deadline, Transport, UpstreamUrl};
use crate::error::DnsResult;

pub struct TcpTransport {
    url: UpstreamUrl,
}

impl TcpTransport {
    pub fn new(url: UpstreamUrl) -> Self {
        Self { url }
    }

    async fn exchange_inner(&self, msg: &Message) -> DnsResult<(Message, Duration)> {
        let addr = resolve_host(&self.url.host).await?;
        let mut stream = TcpStream::connect((addr, self.url.port)).await?;

        let wire = msg.to_vec()?;
        let started = Instant::now();
        write_framed(&mut stream, &wire).await?;
        let reply_bytes = read_framed(&mut stream).await?;
        let rtt = started.elapsed();

        let reply = Message::from_vec(&reply_bytes)?;
        Ok((reply, rtt))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(
        &self,
        msg: &Message,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> DnsResult<(Message, Duration)> {
        with_deadline(deadline, cancel, self.exchange_inner(msg)).await
    }
}

/// Write `payload` prefixed with its big-endian u16 length, per RFC 1035 §4.2.2.
pub(crate) async fn write_framed(
    stream: &mut (impl AsyncWriteExt + Unpin),
    payload: &[u8],
) -> DnsResult<()> {
    let len = payload.len() as u16;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed DNS message from `stream`.
pub(crate) async fn read_framed(stream: &mut (impl AsyncReadExt + Unpin)) -> DnsResult<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
