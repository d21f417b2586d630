//! A dedicated error for all possible errors in the resolution engine: I/O,
//! DNS message inconsistencies, transport and configuration failures.
use std::io;
use std::net::AddrParseError;

use thiserror::Error;

/// A specific custom `Result` for all functions in this crate.
pub type DnsResult<T> = Result<T, DnsError>;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid address: {0}")]
    Addr(#[from] AddrParseError),

    #[error("dns message error: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("resolve nameserver host failed: {0}")]
    BootstrapFailed(String),

    #[error("query exchange cancelled")]
    Cancelled,

    #[error("query exchange timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl DnsError {
    pub fn config(msg: impl Into<String>) -> Self {
        DnsError::Config(msg.into())
    }
}

impl From<String> for DnsError {
    fn from(err: String) -> Self {
        DnsError::Other(err)
    }
}

impl From<&str> for DnsError {
    fn from(err: &str) -> Self {
        DnsError::Other(err.to_string())
    }
}
