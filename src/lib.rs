//! Resolution engine for a recursive DNS forwarder: hosts overlay, TTL cache,
//! upstream client pool with pluggable selection strategies, and the wire
//! transports and listeners that sit on either side of it.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod hosts;
pub mod listener;
pub mod pool;
pub mod question_key;
pub mod recovery;
pub mod resolver;
pub mod strategy;
pub mod transport;

pub use error::{DnsError, DnsResult};
pub use resolver::Resolver;
