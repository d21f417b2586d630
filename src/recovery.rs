//! Periodic probing of down-listed upstream clients so they rejoin the
//! active rotation once they start answering again.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pool::ClientPool;
use crate::transport::DEFAULT_TIMEOUT;

/// Interval between recovery sweeps (§4.6).
const RECOVERY_INTERVAL: Duration = Duration::from_secs(300);

/// Spawn the recovery loop as a background task. The returned handle can be
/// aborted on shutdown; dropping it without aborting just leaves the task
/// running until the process exits.
pub fn spawn(pool: Arc<ClientPool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(pool))
}

async fn run(pool: Arc<ClientPool>) {
    let mut ticker = tokio::time::interval(RECOVERY_INTERVAL);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        ticker.tick().await;
        sweep(&pool).await;
    }
}

async fn sweep(pool: &ClientPool) {
    let down = pool.down_snapshot().await;
    if down.is_empty() {
        return;
    }

    let probe = match build_probe(pool.probe_name()) {
        Ok(probe) => probe,
        Err(err) => {
            warn!(%err, "could not build recovery probe query");
            return;
        }
    };

    for client in down {
        let result = client
            .transport
            .exchange(&probe, DEFAULT_TIMEOUT, CancellationToken::new())
            .await;

        match result {
            Ok(_) => {
                debug!(host = %client.url.host, "recovery probe succeeded");
                pool.recover(&client).await;
            }
            Err(err) => {
                debug!(host = %client.url.host, %err, "recovery probe failed");
            }
        }
    }
}

fn build_probe(probe_name: &str) -> crate::error::DnsResult<Message> {
    let mut fqdn = probe_name.to_string();
    if !fqdn.ends_with('.') {
        fqdn.push('.');
    }
    let name = Name::from_str(&fqdn)?;
    let mut msg = Message::new();
    msg.add_query(Query::query(name, RecordType::A));
    Ok(msg)
}
