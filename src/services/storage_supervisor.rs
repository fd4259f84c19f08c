use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{durable_store::DurableStore, storage::StorageError},
    services::fallback_guard::FallbackGuard,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the durable store, keep probing it, and replay parked writes
/// whenever it is healthy. The guard stays degraded while it is unreachable.
pub async fn run<F, Fut>(guard: Arc<FallbackGuard>, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn DurableStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                guard.install_durable(store.clone()).await;
                info!("durable store connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if guard.is_degraded() || !guard.is_available().await {
                                info!("durable store healthy again; leaving degraded mode");
                                guard.mark_available().await;
                            }
                            replay_if_pending(&guard).await;
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(_) => {
                            let mut attempt = 0;
                            let mut reconnect_delay = INITIAL_DELAY;
                            let mut reconnected = false;

                            while attempt < MAX_RECONNECT_ATTEMPTS {
                                match store.try_reconnect().await {
                                    Ok(()) => {
                                        info!(
                                            "durable store reconnection succeeded after health check failure"
                                        );
                                        reconnected = true;
                                        break;
                                    }
                                    Err(reconnect_err) => {
                                        if attempt == 0 {
                                            warn!(
                                                attempt, error = %reconnect_err,
                                                "durable store reconnect first attempt failed; entering degraded mode"
                                            );
                                            guard.mark_unavailable().await;
                                        } else {
                                            warn!(attempt, error = %reconnect_err, "durable store reconnect attempt failed");
                                        };
                                        attempt += 1;
                                        sleep(reconnect_delay).await;
                                        reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                                    }
                                }
                            }

                            if reconnected {
                                guard.mark_available().await;
                                replay_if_pending(&guard).await;
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            } else {
                                warn!(
                                    "exhausted durable store reconnect attempts; staying in degraded mode"
                                );
                                guard.clear_durable().await;
                                break;
                            }
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "durable store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn replay_if_pending(guard: &FallbackGuard) {
    match guard.count().await {
        Ok(0) => {}
        Ok(pending) => {
            info!(pending, "replaying parked durable writes");
            if let Err(err) = guard.replay_pending().await {
                warn!(error = %err, "fallback replay failed");
            }
        }
        Err(err) => warn!(error = %err, "failed to count parked durable writes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FallbackConfig,
        dao::{
            durable_store::memory::MemoryDurableStore,
            fast_store::memory::MemoryFastStore,
            models::{SESSIONS_COLLECTION, WriteOperation},
        },
        services::fallback_guard::WriteOutcome,
    };

    #[tokio::test(start_paused = true)]
    async fn supervisor_installs_store_and_replays_backlog() {
        let guard = Arc::new(FallbackGuard::new(
            Arc::new(MemoryFastStore::new()),
            FallbackConfig::default(),
        ));
        let outcome = guard
            .execute(WriteOperation::ReplaceOne {
                collection: SESSIONS_COLLECTION.into(),
                id: "s1".into(),
                document: serde_json::json!({"id": "s1"}),
            })
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Fallback);

        let durable = MemoryDurableStore::new();
        let store = durable.clone();
        let task = tokio::spawn(run(guard.clone(), move || {
            let store = store.clone();
            async move { Ok(Arc::new(store) as Arc<dyn DurableStore>) }
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!guard.is_degraded());
        assert_eq!(guard.count().await.unwrap(), 0);
        assert_eq!(durable.count(SESSIONS_COLLECTION), 1);
        task.abort();
    }
}
