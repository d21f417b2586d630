use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::str::FromStr;
use tracing::{debug, error, info};

use super::{answer, bind_tcp_reuseport};
use super::dot::build_acceptor_with_alpn;
use crate::error::DnsResult;
use crate::resolver::Resolver;

const WIRE_MIME: &str = "application/dns-message";
const JSON_MIME: &str = "application/dns-json";

type Req = Request<Incoming>;
type Res = Response<Full<Bytes>>;

/// Serve DNS-over-HTTPS at `addr`, terminating TLS with the certificate and
/// key at `certfile`/`keyfile` and negotiating h2/http1.1 via ALPN.
pub async fn serve_tls(
    addr: SocketAddr,
    certfile: &Path,
    keyfile: &Path,
    http_path: String,
    resolver: Arc<Resolver>,
) -> DnsResult<()> {
    let acceptor = build_acceptor_with_alpn(certfile, keyfile, &[b"h2", b"http/1.1"])?;
    let listener = bind_tcp_reuseport(addr)?;
    info!(%addr, "doh listener bound (tls)");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(%err, "doh accept failed");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let resolver = Arc::clone(&resolver);
        let http_path = http_path.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(%peer, %err, "doh tls handshake failed");
                    return;
                }
            };
            let is_h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2");
            let io = TokioIo::new(tls_stream);

            let svc = service_fn(move |req: Req| {
                let resolver = Arc::clone(&resolver);
                let http_path = http_path.clone();
                async move { handle(req, &http_path, &resolver).await }
            });

            let result = if is_h2 {
                http2::Builder::new(TokioExecutor::new())
                    .serve_connection(io, svc)
                    .await
            } else {
                http1::Builder::new().serve_connection(io, svc).await
            };
            if let Err(err) = result {
                debug!(%peer, %err, "doh connection ended");
            }
        });
    }
}

/// Serve plain (unencrypted) DNS-over-HTTP at `addr`. There is no ALPN to
/// negotiate on a cleartext connection, so protocol (h1 vs h2c) is sniffed
/// per-connection by `hyper_util`'s auto builder instead.
pub async fn serve_plain(
    addr: SocketAddr,
    http_path: String,
    resolver: Arc<Resolver>,
) -> DnsResult<()> {
    let listener = bind_tcp_reuseport(addr)?;
    info!(%addr, "doh listener bound (plain)");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(%err, "doh accept failed");
                continue;
            }
        };

        let resolver = Arc::clone(&resolver);
        let http_path = http_path.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Req| {
                let resolver = Arc::clone(&resolver);
                let http_path = http_path.clone();
                async move { handle(req, &http_path, &resolver).await }
            });

            let result = auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await;
            if let Err(err) = result {
                debug!(%peer, %err, "doh connection ended");
            }
        });
    }
}

async fn handle(
    req: Req,
    http_path: &str,
    resolver: &Arc<Resolver>,
) -> Result<Res, hyper::Error> {
    if req.uri().path() != http_path {
        return Ok(not_found());
    }

    let content_type = match negotiate_content_type(&req) {
        Some(ct) => ct,
        None => return Ok(bad_request()),
    };

    let query = match *req.method() {
        Method::GET => match query_from_get(&req) {
            Ok(query) => query,
            Err(_) => return Ok(bad_request()),
        },
        Method::POST => match query_from_post(req).await {
            Ok(query) => query,
            Err(_) => return Ok(bad_request()),
        },
        _ => return Ok(method_not_allowed()),
    };

    let reply = answer(resolver, &query).await;

    match content_type {
        ContentType::Json => Ok(json_response(&reply)),
        ContentType::Wire => Ok(wire_response(&reply)),
    }
}

#[derive(Clone, Copy)]
enum ContentType {
    Wire,
    Json,
}

/// Determine the response content type the way the original DoH handler
/// does: a `ct` query parameter wins if present, falling back to the
/// `Accept` header; an unrecognized value is rejected rather than silently
/// defaulting to wire format.
fn negotiate_content_type(req: &Req) -> Option<ContentType> {
    let raw_query = req.uri().query().unwrap_or_default();
    let ct_param = url::form_urlencoded::parse(raw_query.as_bytes())
        .find(|(k, _)| k == "ct")
        .map(|(_, v)| v.into_owned());

    let ct = match ct_param.filter(|v| !v.is_empty()) {
        Some(ct) => ct,
        None => req
            .headers()
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };

    if ct.is_empty() || ct.contains(WIRE_MIME) {
        Some(ContentType::Wire)
    } else if ct.contains(JSON_MIME) {
        Some(ContentType::Json)
    } else {
        None
    }
}

fn query_from_get(req: &Req) -> Result<Message, ()> {
    let raw_query = req.uri().query().unwrap_or_default();
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();

    let name = pairs
        .iter()
        .find(|(k, _)| k == "name")
        .map(|(_, v)| v.clone())
        .ok_or(())?;
    let rtype = pairs
        .iter()
        .find(|(k, _)| k == "type")
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| "A".to_string());

    build_query(&name, &rtype)
}

async fn query_from_post(req: Req) -> Result<Message, ()> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if !content_type.starts_with(WIRE_MIME) {
        return Err(());
    }

    let body = req.into_body().collect().await.map_err(|_| ())?.to_bytes();
    Message::from_vec(&body).map_err(|_| ())
}

fn build_query(name: &str, rtype: &str) -> Result<Message, ()> {
    let mut fqdn = name.to_string();
    if !fqdn.ends_with('.') {
        fqdn.push('.');
    }
    let name = Name::from_str(&fqdn).map_err(|_| ())?;
    let rtype = RecordType::from_str(&rtype.to_ascii_uppercase()).map_err(|_| ())?;
    let mut msg = Message::new();
    msg.add_query(Query::query(name, rtype));
    Ok(msg)
}

fn wire_response(msg: &Message) -> Res {
    let bytes = msg.to_vec().unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, WIRE_MIME)
        .body(Full::new(Bytes::from(bytes)))
        .unwrap_or_else(|_| server_error())
}

fn json_response(msg: &Message) -> Res {
    let body = serde_json::json!({
        "Status": u16::from(msg.response_code()),
        "Answer": msg.answers().iter().map(|rr| serde_json::json!({
            "name": rr.name().to_utf8(),
            "type": u16::from(rr.record_type()),
            "TTL": rr.ttl(),
            "data": rr.data().map(|d| format!("{d:?}")).unwrap_or_default(),
        })).collect::<Vec<_>>(),
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, JSON_MIME)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| server_error())
}

fn not_found() -> Res {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| server_error())
}

fn bad_request() -> Res {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| server_error())
}

fn method_not_allowed() -> Res {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| server_error())
}

fn server_error() -> Res {
    Response::new(Full::new(Bytes::new()))
}
