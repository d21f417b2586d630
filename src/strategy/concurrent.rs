use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{exchange_one, Outcome, Strategy};
use crate::error::DnsError;
use crate::pool::{Client, ClientPool};

/// Dispatches every configured client in parallel and takes the first good
/// response, cancelling the rest. Ineligible (saturated) clients still
/// contribute a completion so the accounting loop always reads exactly one
/// message per declared client.
pub struct ConcurrentStrategy;

#[async_trait]
impl Strategy for ConcurrentStrategy {
    async fn choose_and_exchange(
        &self,
        msg: &Message,
        pool: &ClientPool,
    ) -> (Option<Message>, Option<DnsError>) {
        let clients = pool.all().await;
        if clients.is_empty() {
            return (
                None,
                Some(DnsError::Other("no upstream clients configured".into())),
            );
        }

        let (tx, mut rx) = mpsc::channel::<(Arc<Client>, Option<Outcome>)>(clients.len());
        let cancel = CancellationToken::new();

        for client in &clients {
            if pool.is_saturated(client).await {
                let _ = tx.send((client.clone(), None)).await;
                continue;
            }

            let tx = tx.clone();
            let cancel_task = cancel.clone();
            let client = client.clone();
            let msg = msg.clone();
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel_task.cancelled() => None,
                    outcome = exchange_one(&client, &msg) => Some(outcome),
                };
                let _ = tx.send((client, outcome)).await;
            });
        }
        drop(tx);

        let mut bad_result = None;
        let mut last_error = None;
        for _ in 0..clients.len() {
            let Some((client, outcome)) = rx.recv().await else {
                break;
            };
            match outcome {
                Some(Outcome::Good(reply)) => {
                    cancel.cancel();
                    return (Some(reply), None);
                }
                Some(Outcome::EmptyButValid(reply)) => bad_result = Some(reply),
                Some(Outcome::Error) => {
                    pool.fail(&client).await;
                    last_error = Some(DnsError::Other("upstream exchange failed".into()));
                }
                None => {
                    // cancelled before completing, or pre-filtered as saturated;
                    // neither counts as a fresh failure.
                }
            }
        }

        (bad_result, last_error)
    }
}
