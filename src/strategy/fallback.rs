use async_trait::async_trait;
use hickory_proto::op::Message;

use super::{exchange_one, Outcome, Strategy};
use crate::error::DnsError;
use crate::pool::ClientPool;

/// Tries clients strictly in declaration order; the first good response
/// wins. Saturated clients are skipped by `ClientPool::eligible`.
pub struct FallbackStrategy;

#[async_trait]
impl Strategy for FallbackStrategy {
    async fn choose_and_exchange(
        &self,
        msg: &Message,
        pool: &ClientPool,
    ) -> (Option<Message>, Option<DnsError>) {
        let eligible = pool.eligible().await;
        let mut bad_result = None;
        let mut last_error = None;

        for client in &eligible {
            match exchange_one(client, msg).await {
                Outcome::Good(reply) => return (Some(reply), None),
                Outcome::EmptyButValid(reply) => bad_result = Some(reply),
                Outcome::Error => {
                    pool.fail(client).await;
                    last_error = Some(DnsError::Other("upstream exchange failed".into()));
                }
            }
        }

        (bad_result, last_error)
    }
}
