//! Upstream-selection strategies: how a resolver picks which client(s) to
//! query, and in what order, when more than one upstream is configured.

mod concurrent;
mod fallback;
mod random;
mod weighted;

pub use concurrent::ConcurrentStrategy;
pub use fallback::FallbackStrategy;
pub use random::RandomStrategy;
pub use weighted::WeightedStrategy;

use async_trait::async_trait;
use hickory_proto::op::Message;

use tokio_util::sync::CancellationToken;

use crate::error::{DnsError, DnsResult};
use crate::pool::{Client, ClientPool};
use crate::transport::DEFAULT_TIMEOUT;

/// Outcome of a single upstream exchange, classified per the shared
/// good/empty/error rule every strategy applies identically.
pub(crate) enum Outcome {
    Good(Message),
    EmptyButValid(Message),
    Error,
}

pub(crate) async fn exchange_one(client: &Client, msg: &Message) -> Outcome {
    match client
        .transport
        .exchange(msg, DEFAULT_TIMEOUT, CancellationToken::new())
        .await
    {
        Ok((reply, _rtt)) if !reply.answers().is_empty() => Outcome::Good(reply),
        Ok((reply, _rtt)) => Outcome::EmptyButValid(reply),
        Err(_) => Outcome::Error,
    }
}

/// One of {concurrent, random, load-balanced, fallback}: picks clients from
/// an eligible pool and exchanges a query with one or more of them.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn choose_and_exchange(
        &self,
        msg: &Message,
        pool: &ClientPool,
    ) -> (Option<Message>, Option<DnsError>);
}

/// Build the strategy named by the `strategy` configuration key.
pub fn build(name: &str) -> DnsResult<Box<dyn Strategy>> {
    match name {
        "concurrent" => Ok(Box::new(ConcurrentStrategy)),
        "random" => Ok(Box::new(RandomStrategy)),
        "load-balanced" => Ok(Box::new(WeightedStrategy)),
        "fallback" => Ok(Box::new(FallbackStrategy)),
        other => Err(DnsError::config(format!("unknown strategy: {other}"))),
    }
}
