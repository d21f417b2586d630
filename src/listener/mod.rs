//! Client-facing listeners: UDP, TCP, DNS-over-TLS and DNS-over-HTTPS.

mod doh;
mod dot;
mod tcp;
mod udp;

pub use doh::{serve_plain as serve_doh_plain, serve_tls as serve_doh_tls};
pub use dot::serve as serve_dot;
pub use tcp::serve as serve_tcp;
pub use udp::serve as serve_udp;

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

use crate::error::DnsResult;
use crate::resolver::Resolver;

/// Bind a `SO_REUSEPORT` TCP socket at `addr`, shared by every TCP-backed
/// listener (plain TCP, DoT, DoH).
pub(crate) fn bind_tcp_reuseport(addr: SocketAddr) -> DnsResult<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

/// Resolve `query` and stamp the reply with the query's own ID and original
/// question, the way every listener variant hands a response back.
pub(crate) async fn answer(resolver: &Arc<Resolver>, query: &Message) -> Message {
    match resolver.exchange(query).await {
        Ok(mut reply) => {
            reply.set_id(query.id());
            reply.set_message_type(MessageType::Response);
            reply.queries_mut().clear();
            for q in query.queries() {
                reply.add_query(q.clone());
            }
            reply
        }
        Err(err) => {
            tracing::warn!(%err, "resolution failed, returning server failure");
            server_failure(query)
        }
    }
}

fn server_failure(query: &Message) -> Message {
    let mut reply = Message::new();
    reply.set_id(query.id());
    reply.set_message_type(MessageType::Response);
    reply.set_response_code(ResponseCode::ServFail);
    for q in query.queries() {
        reply.add_query(q.clone());
    }
    reply
}

/// Decode an incoming wire-format query, returning `None` (caller should
/// drop the datagram/connection) on malformed input.
pub(crate) fn decode(bytes: &[u8]) -> DnsResult<Message> {
    Ok(Message::from_vec(bytes)?)
}

pub(crate) fn encode(msg: &Message) -> DnsResult<Vec<u8>> {
    Ok(msg.to_vec()?)
}
