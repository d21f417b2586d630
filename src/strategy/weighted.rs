use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::Message;

use super::{exchange_one, Outcome, Strategy};
use crate::error::DnsError;
use crate::pool::{Client, ClientPool};

/// Smooth weighted round-robin (the nginx algorithm): picks the client with
/// the highest `current_weight` after crediting every client its `weight`,
/// then debits the winner by the sum of all weights.
pub struct WeightedStrategy;

fn next_by_load(clients: &[Arc<Client>], weight_sum: i64) -> usize {
    let mut best_idx = 0;
    let mut best_weight = i64::MIN;
    for (i, client) in clients.iter().enumerate() {
        let credited = client.add_current_weight(client.weight as i64);
        if credited > best_weight {
            best_weight = credited;
            best_idx = i;
        }
    }
    clients[best_idx].sub_current_weight(weight_sum);
    best_idx
}

#[async_trait]
impl Strategy for WeightedStrategy {
    async fn choose_and_exchange(
        &self,
        msg: &Message,
        pool: &ClientPool,
    ) -> (Option<Message>, Option<DnsError>) {
        let eligible = pool.eligible().await;
        if eligible.is_empty() {
            return (
                None,
                Some(DnsError::Other("no eligible upstream clients".into())),
            );
        }

        // the pool's persisted, pool-wide weight sum, not a sum over just the
        // currently-eligible subset: picking a saturated client's residual
        // `current_weight` back out of circulation requires debiting by the
        // same total every other client was credited against.
        let weight_sum = pool.weight_sum().await.max(1) as i64;

        let mut bad_result = None;
        let mut last_error = None;
        let mut tried = HashSet::new();
        let mut last_idx = None;

        // each failed pick still advances `next_by_load`'s internal state,
        // so this loop is bounded even if every client keeps getting
        // re-picked before all have been tried.
        while tried.len() < eligible.len() {
            let idx = next_by_load(&eligible, weight_sum);
            if last_idx == Some(idx) {
                continue;
            }
            last_idx = Some(idx);
            tried.insert(idx);

            match exchange_one(&eligible[idx], msg).await {
                Outcome::Good(reply) => return (Some(reply), None),
                Outcome::EmptyButValid(reply) => bad_result = Some(reply),
                Outcome::Error => {
                    pool.fail(&eligible[idx]).await;
                    last_error = Some(DnsError::Other("upstream exchange failed".into()));
                }
            }
        }

        (bad_result, last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::UpstreamUrl;

    fn client(weight: u32) -> Arc<Client> {
        struct NoopTransport;
        #[async_trait::async_trait]
        impl crate::transport::Transport for NoopTransport {
            async fn exchange(
                &self,
                _msg: &Message,
                _deadline: std::time::Duration,
                _cancel: tokio_util::sync::CancellationToken,
            ) -> crate::error::DnsResult<(Message, std::time::Duration)> {
                unreachable!("not exercised in weighting-only tests")
            }
        }
        Arc::new(Client::new(
            UpstreamUrl::parse("udp://127.0.0.1:53").unwrap(),
            Box::new(NoopTransport),
            weight,
        ))
    }

    #[test]
    fn smooth_wrr_distributes_by_weight_ratio() {
        let clients = vec![client(3), client(1)];
        let weight_sum = 4i64;
        let mut picks = [0usize; 2];
        for _ in 0..8 {
            let idx = next_by_load(&clients, weight_sum);
            picks[idx] += 1;
        }
        assert_eq!(picks, [6, 2]);
    }

    #[test]
    fn ties_break_to_lowest_index() {
        let clients = vec![client(1), client(1)];
        let idx = next_by_load(&clients, 2);
        assert_eq!(idx, 0);
    }
}
