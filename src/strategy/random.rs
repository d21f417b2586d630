use async_trait::async_trait;
use hickory_proto::op::Message;
use rand::Rng;

use super::{exchange_one, Outcome, Strategy};
use crate::error::DnsError;
use crate::pool::ClientPool;

/// Repeatedly picks a uniformly random client from the shrinking eligible
/// set until one returns a good response or the set is exhausted.
pub struct RandomStrategy;

#[async_trait]
impl Strategy for RandomStrategy {
    async fn choose_and_exchange(
        &self,
        msg: &Message,
        pool: &ClientPool,
    ) -> (Option<Message>, Option<DnsError>) {
        let mut remaining = pool.eligible().await;
        let mut bad_result = None;
        let mut last_error = None;

        while !remaining.is_empty() {
            let idx = rand::thread_rng().gen_range(0..remaining.len());
            let client = remaining.swap_remove(idx);

            match exchange_one(&client, msg).await {
                Outcome::Good(reply) => return (Some(reply), None),
                Outcome::EmptyButValid(reply) => bad_result = Some(reply),
                Outcome::Error => {
                    pool.fail(&client).await;
                    last_error = Some(DnsError::Other("upstream exchange failed".into()));
                }
            }
        }

        (bad_result, last_error)
    }
}
