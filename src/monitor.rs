use crate::store::{ConversationStore, DurableStore, StorageMode};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Probes the database once and updates the storage switch.
pub async fn check(store: &ConversationStore) -> StorageMode {
    let Some(durable) = store.durable() else {
        return store.switch().get();
    };
    let mode = probe_mode(durable).await;
    store.switch().set(mode);
    mode
}

async fn probe_mode(durable: &DurableStore) -> StorageMode {
    match durable.probe().await {
        Ok(()) => StorageMode::Durable,
        Err(e) => {
            warn!("Database probe failed: {:#}", e);
            StorageMode::Ephemeral
        }
    }
}

/// Re-probes on every `interval` tick so the switch follows reconnects.
pub fn spawn(store: ConversationStore, interval: Duration) -> Option<JoinHandle<()>> {
    store.durable()?;
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately and startup already probed
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mode = check(&store).await;
            debug!("Storage monitor tick: {:?}", mode);
        }
    }))
}
