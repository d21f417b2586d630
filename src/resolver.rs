//! The resolution façade: hosts overlay, then cache, then upstream pool.

use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashSet;
use hickory_proto::op::{Edns, Message};
use tracing::{info, trace, warn};

use crate::cache::{self, Cache};
use crate::error::{DnsError, DnsResult};
use crate::hosts;
use crate::pool::ClientPool;
use crate::question_key::{self, QuestionKey};
use crate::strategy::Strategy;

/// EDNS0 advertised UDP payload size for every outbound upstream query
/// (§4.7's normalisation step).
const EDNS_BUFFER_SIZE: u16 = 4096;

/// Orchestrates hosts lookup, answer cache, and the upstream client pool
/// behind one entry point, `exchange`.
///
/// Callers hold this behind an `Arc` so background cache refreshes can
/// borrow the same pool and strategy without a lifetime tied to one call.
pub struct Resolver {
    hosts: hosts::Shared,
    cache: Option<Arc<Cache>>,
    pool: Arc<ClientPool>,
    strategy: Box<dyn Strategy>,
    in_flight_refresh: DashSet<QuestionKey>,
    self_ref: Weak<Resolver>,
}

impl Resolver {
    pub fn new(
        hosts: hosts::Shared,
        cache: Option<Arc<Cache>>,
        pool: Arc<ClientPool>,
        strategy: Box<dyn Strategy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            hosts,
            cache,
            pool,
            strategy,
            in_flight_refresh: DashSet::new(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    /// Resolve one query end to end.
    pub async fn exchange(&self, msg: &Message) -> DnsResult<Message> {
        let key = question_key::from_message(msg)
            .ok_or_else(|| DnsError::Other("should have one question at least".into()))?;

        if let Some(reply) = self.hosts.query(&key) {
            trace!(%key, "answered from hosts table");
            return Ok(reply);
        }

        let Some(cache) = self.cache.clone() else {
            return self.query_upstream(msg, &key, None).await;
        };

        let now = Instant::now();
        if let Some((cached, expires_at)) = cache.get(&key) {
            if expires_at > now {
                let mut reply = cached;
                let ttl = (expires_at - now).as_secs().max(1) as u32;
                cache::rewrite_ttl(&mut reply, ttl);
                trace!(%key, ttl, "answered from cache (fresh)");
                return Ok(reply);
            }

            let mut stale = cached;
            cache::rewrite_ttl(&mut stale, 1);
            trace!(%key, "answered from cache (stale); refreshing in background");
            self.spawn_refresh(msg.clone(), key.clone());
            return Ok(stale);
        }

        self.query_upstream(msg, &key, Some(cache)).await
    }

    /// Query the upstream pool via the configured strategy, normalising
    /// EDNS0 first and caching a cacheable result on success.
    async fn query_upstream(
        &self,
        msg: &Message,
        key: &str,
        cache: Option<Arc<Cache>>,
    ) -> DnsResult<Message> {
        let mut outbound = msg.clone();
        normalise_edns(&mut outbound);

        let (reply, err) = self.strategy.choose_and_exchange(&outbound, &self.pool).await;

        match reply {
            Some(reply) => {
                if let Some(cache) = cache {
                    if cache::is_cacheable(&reply) {
                        if let Some(expires_at) = cache::expiry_of(&reply, Instant::now()) {
                            cache.add(key.to_string(), reply.clone(), expires_at);
                        }
                    }
                }
                Ok(reply)
            }
            None => {
                warn!(%key, "all upstream clients failed");
                Err(err.unwrap_or_else(|| DnsError::Other("no upstream response".into())))
            }
        }
    }

    /// Kick off a background refresh for a stale cache hit, coalescing
    /// concurrent refreshes of the same key onto a single upstream query.
    ///
    /// Upgrades its own `Weak` self-reference rather than requiring an
    /// `Arc<Resolver>` receiver, since callers reach this through a plain
    /// `&self` from `exchange`.
    fn spawn_refresh(&self, msg: Message, key: QuestionKey) {
        if !self.in_flight_refresh.insert(key.clone()) {
            // a refresh for this key is already in flight; the stale
            // response just served is enough until it completes.
            return;
        }

        let Some(resolver) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let cache = resolver.cache.clone();
            if let Err(err) = resolver.query_upstream(&msg, &key, cache).await {
                trace!(%key, %err, "background cache refresh failed");
            } else {
                info!(%key, "background cache refresh completed");
            }
            resolver.in_flight_refresh.remove(&key);
        });
    }
}

/// Ensure `msg` carries EDNS0 with the forwarder's UDP payload size,
/// overwriting an existing OPT record's size if one is already present.
fn normalise_edns(msg: &mut Message) {
    let mut edns = msg.edns().cloned().unwrap_or_else(Edns::new);
    edns.set_max_payload(EDNS_BUFFER_SIZE);
    msg.set_edns(edns);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    #[test]
    fn normalise_edns_sets_buffer_size_when_absent() {
        let mut msg = Message::new();
        msg.add_query(Query::query(Name::from_str("example.com.").unwrap(), RecordType::A));
        normalise_edns(&mut msg);
        assert_eq!(msg.edns().unwrap().max_payload(), EDNS_BUFFER_SIZE);
    }

    #[test]
    fn normalise_edns_overwrites_existing_buffer_size() {
        let mut msg = Message::new();
        let mut edns = Edns::new();
        edns.set_max_payload(512);
        msg.set_edns(edns);
        normalise_edns(&mut msg);
        assert_eq!(msg.edns().unwrap().max_payload(), EDNS_BUFFER_SIZE);
    }
}
