//! The pool of upstream clients: their transports, weights and health state.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::transport::{Transport, UpstreamUrl};

/// One upstream nameserver: its transport handle plus the counters the
/// strategies and the recovery loop read and mutate.
pub struct Client {
    pub url: UpstreamUrl,
    pub transport: Box<dyn Transport>,
    pub weight: u32,
    current_weight: AtomicI64,
    failed_times: AtomicU32,
}

impl Client {
    pub fn new(url: UpstreamUrl, transport: Box<dyn Transport>, weight: u32) -> Self {
        Self {
            url,
            transport,
            weight,
            current_weight: AtomicI64::new(0),
            failed_times: AtomicU32::new(0),
        }
    }

    pub fn failed_times(&self) -> u32 {
        self.failed_times.load(Ordering::SeqCst)
    }

    pub fn current_weight(&self) -> i64 {
        self.current_weight.load(Ordering::SeqCst)
    }

    pub fn add_current_weight(&self, delta: i64) -> i64 {
        self.current_weight.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn sub_current_weight(&self, delta: i64) {
        self.current_weight.fetch_sub(delta, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.failed_times.store(0, Ordering::SeqCst);
        self.current_weight.store(0, Ordering::SeqCst);
    }
}

/// Normalize a set of configured weights by their GCD, the way the source
/// does before running smooth WRR over them, so `current_weight` accounting
/// deals in the smallest equivalent integers rather than the raw user-given
/// ones.
pub fn normalize_weights(weights: &[u32]) -> Vec<u32> {
    let divisor = weights.iter().copied().fold(0, gcd).max(1);
    weights.iter().map(|w| (w / divisor).max(1)).collect()
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

struct Inner {
    active: Vec<Arc<Client>>,
    down: Vec<Arc<Client>>,
    weight_sum: u32,
    max_retries: u32,
}

/// Holds every configured upstream client, partitioned into the clients the
/// strategies may select (`active`) and clients that have saturated their
/// failure budget (`down`, recovery-eligible only).
pub struct ClientPool {
    inner: RwLock<Inner>,
    probe_name: String,
}

impl ClientPool {
    pub fn new(clients: Vec<Arc<Client>>, max_retries: u32, probe_name: String) -> Self {
        let weight_sum = clients.iter().map(|c| c.weight).sum();
        Self {
            inner: RwLock::new(Inner {
                active: clients,
                down: Vec::new(),
                weight_sum,
                max_retries: max_retries.max(1),
            }),
            probe_name,
        }
    }

    pub fn probe_name(&self) -> &str {
        &self.probe_name
    }

    /// Snapshot of every client currently eligible for selection, i.e. those
    /// not already saturated. Strategies operate on this cloned `Vec` rather
    /// than holding the pool's lock across an exchange.
    pub async fn eligible(&self) -> Vec<Arc<Client>> {
        let guard = self.inner.read().await;
        guard
            .active
            .iter()
            .filter(|c| c.failed_times() < guard.max_retries)
            .cloned()
            .collect()
    }

    /// Snapshot of every configured active-list client, saturated or not.
    /// The concurrent strategy needs this so its accounting loop reads one
    /// completion per *declared* client, not just per eligible one.
    pub async fn all(&self) -> Vec<Arc<Client>> {
        self.inner.read().await.active.clone()
    }

    pub async fn is_saturated(&self, client: &Arc<Client>) -> bool {
        let guard = self.inner.read().await;
        client.failed_times() >= guard.max_retries
    }

    pub async fn weight_sum(&self) -> u32 {
        self.inner.read().await.weight_sum
    }

    /// Record a failed exchange against `client`. On the transition into
    /// saturation the client moves to the down list; if every active client
    /// is now saturated, the whole pool resets rather than being left empty.
    pub async fn fail(&self, client: &Arc<Client>) {
        let mut guard = self.inner.write().await;
        let failed = client.failed_times.fetch_add(1, Ordering::SeqCst) + 1;

        if failed == guard.max_retries {
            guard.down.push(Arc::clone(client));
            warn!(host = %client.url.host, "upstream client marked down");

            if guard.down.len() >= guard.active.len() {
                info!("all upstream clients saturated, resetting pool");
                for c in &guard.active {
                    c.reset();
                }
                guard.down.clear();
            }
        }
    }

    /// Snapshot the clients currently in the down list, for the recovery
    /// loop to probe without holding the pool lock during each exchange.
    pub async fn down_snapshot(&self) -> Vec<Arc<Client>> {
        self.inner.read().await.down.clone()
    }

    /// Called by the recovery loop after a successful probe: zero the
    /// client's counters and remove it from the down list.
    pub async fn recover(&self, client: &Arc<Client>) {
        let mut guard = self.inner.write().await;
        client.reset();
        guard.down.retain(|c| !Arc::ptr_eq(c, client));
        info!(host = %client.url.host, "upstream client recovered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DnsResult;
    use crate::transport::UpstreamUrl;
    use async_trait::async_trait;
    use hickory_proto::op::Message;
    use tokio_util::sync::CancellationToken;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn exchange(
            &self,
            _msg: &Message,
            _deadline: std::time::Duration,
            _cancel: CancellationToken,
        ) -> DnsResult<(Message, std::time::Duration)> {
            unreachable!("not exercised in pool-only tests")
        }
    }

    fn client() -> Arc<Client> {
        Arc::new(Client::new(
            UpstreamUrl::parse("udp://127.0.0.1:53").unwrap(),
            Box::new(NoopTransport),
            1,
        ))
    }

    #[test]
    fn normalizes_weights_by_gcd() {
        assert_eq!(normalize_weights(&[6, 3, 9]), vec![2, 1, 3]);
        assert_eq!(normalize_weights(&[5]), vec![1]);
    }

    #[tokio::test]
    async fn fail_marks_client_down_at_max_retries() {
        let a = client();
        let b = client();
        let pool = ClientPool::new(vec![a.clone(), b.clone()], 2, "domain.com".into());

        pool.fail(&a).await;
        assert!(pool.eligible().await.iter().any(|c| Arc::ptr_eq(c, &a)));

        pool.fail(&a).await;
        assert!(!pool.eligible().await.iter().any(|c| Arc::ptr_eq(c, &a)));
        assert!(pool.down_snapshot().await.iter().any(|c| Arc::ptr_eq(c, &a)));
    }

    #[tokio::test]
    async fn pool_resets_when_every_client_saturates() {
        let a = client();
        let b = client();
        let pool = ClientPool::new(vec![a.clone(), b.clone()], 1, "domain.com".into());

        pool.fail(&a).await;
        pool.fail(&b).await;

        // every client failed out in the same round, so the pool resets
        // instead of leaving itself with nothing eligible.
        assert!(pool.down_snapshot().await.is_empty());
        assert_eq!(pool.eligible().await.len(), 2);
        assert_eq!(a.failed_times(), 0);
        assert_eq!(b.failed_times(), 0);
    }

    #[tokio::test]
    async fn recover_clears_failure_state_and_down_membership() {
        let a = client();
        let pool = ClientPool::new(vec![a.clone()], 1, "domain.com".into());

        pool.fail(&a).await;
        assert!(pool.down_snapshot().await.iter().any(|c| Arc::ptr_eq(c, &a)));

        pool.recover(&a).await;
        assert!(pool.down_snapshot().await.is_empty());
        assert_eq!(a.failed_times(), 0);
    }
}
