//! Keyspace expiry watcher.
//!
//! Subscribes to `__keyevent@{db}__:expired` and turns lapsed alive keys into
//! record removals. The subscription is re-established with back-off until
//! shutdown.

use crate::error::Result;
use crate::keys::{parse_expired, Expired};
use crate::store::RedisStore;
use futures::StreamExt;
use redis::Client;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn expired_channel(db: i64) -> String {
    format!("__keyevent@{}__:expired", db)
}

/// Spawn the watcher; `None` when the store has no subscription client
pub fn spawn(store: RedisStore, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
    let client = store.client()?.clone();
    Some(tokio::spawn(run(store, client, shutdown)))
}

async fn run(store: RedisStore, client: Client, mut shutdown: watch::Receiver<bool>) {
    if let Err(e) = store.enable_expiry_events().await {
        // managed deployments often forbid CONFIG; events may already be on
        warn!(error = %e, "could not enable keyspace expiry events");
    }

    let channel = expired_channel(store.db());
    let mut backoff = INITIAL_BACKOFF;
    loop {
        tokio::select! {
            result = watch_once(&store, &client, &channel) => {
                match result {
                    Ok(()) => {
                        warn!(channel = %channel, "expiry subscription ended");
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(e) => {
                        warn!(channel = %channel, error = %e, retry_in = ?backoff, "expiry subscription failed");
                    }
                }
            }
            _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => break,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
    debug!("expiry watcher stopped");
}

async fn watch_once(store: &RedisStore, client: &Client, channel: &str) -> Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(channel).await?;
    info!(channel, "watching expired keys");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let key: String = match msg.get_payload() {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "unreadable expiry event");
                continue;
            }
        };
        if let Err(e) = handle_expired(store, &key).await {
            warn!(key = %key, error = %e, "failed to handle expired key");
        }
    }
    Ok(())
}

async fn handle_expired(store: &RedisStore, key: &str) -> Result<()> {
    match parse_expired(key) {
        Some(Expired::Resident(role, id)) => {
            if store.expire_resident(role, id).await? {
                debug!(?role, id, "resident expired");
            }
        }
        Some(Expired::Frontier(frontier_id)) => {
            store.reset_frontier_counts(&frontier_id).await?;
            info!(frontier_id = %frontier_id, "frontier expired");
        }
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_channel() {
        assert_eq!(expired_channel(0), "__keyevent@0__:expired");
        assert_eq!(expired_channel(5), "__keyevent@5__:expired");
    }
}
