use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, RwLock as StdRwLock},
};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::FallbackConfig,
    dao::{
        durable_store::DurableStore,
        fast_store::FastStore,
        keys,
        models::{PendingWrite, WriteOperation, now_ms},
        storage::StorageError,
    },
    error::ServiceError,
};

/// Listener invoked with the new availability on every transition.
pub type AvailabilityCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Result of a guarded durable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The durable store accepted the write.
    Written,
    /// The durable store was unreachable; the write is parked for replay.
    Fallback,
}

/// Summary of a replay pass over the pending-write queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Writes applied to the durable store.
    pub replayed: u64,
    /// Writes discarded because the durable store rejected them.
    pub dropped: u64,
    /// Writes still waiting.
    pub remaining: u64,
}

/// Routes durable writes and degrades to a fast-store-backed log when the
/// durable store is unreachable.
pub struct FallbackGuard {
    fast: Arc<dyn FastStore>,
    durable: RwLock<Option<Arc<dyn DurableStore>>>,
    config: FallbackConfig,
    callbacks: StdRwLock<Vec<AvailabilityCallback>>,
    degraded: watch::Sender<bool>,
    replay_gate: Mutex<()>,
}

impl FallbackGuard {
    /// Create a guard with no durable store installed (degraded).
    pub fn new(fast: Arc<dyn FastStore>, config: FallbackConfig) -> Self {
        let (degraded, _rx) = watch::channel(true);
        Self {
            fast,
            durable: RwLock::new(None),
            config,
            callbacks: StdRwLock::new(Vec::new()),
            degraded,
            replay_gate: Mutex::new(()),
        }
    }

    /// Obtain a handle to the current durable store, if one is installed.
    pub async fn durable(&self) -> Option<Arc<dyn DurableStore>> {
        self.durable.read().await.as_ref().cloned()
    }

    /// Install a durable store implementation and leave degraded mode.
    pub async fn install_durable(&self, store: Arc<dyn DurableStore>) {
        {
            let mut guard = self.durable.write().await;
            *guard = Some(store);
        }
        self.mark_available().await;
    }

    /// Remove the current durable store and enter degraded mode.
    pub async fn clear_durable(&self) {
        {
            let mut guard = self.durable.write().await;
            guard.take();
        }
        self.mark_unavailable().await;
    }

    /// Register a listener for availability transitions.
    pub fn on_transition(&self, callback: AvailabilityCallback) {
        if let Ok(mut callbacks) = self.callbacks.write() {
            callbacks.push(callback);
        }
    }

    /// Current degraded flag as last observed by this process.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Consult the shared "unavailable" flag. A failed read counts as available.
    pub async fn is_available(&self) -> bool {
        match self.fast.get(keys::DURABLE_UNAVAILABLE).await {
            Ok(flag) => flag.is_none(),
            Err(err) => {
                warn!(error = %err, "failed to read durable availability flag; assuming available");
                true
            }
        }
    }

    /// Flag the durable store unavailable for the configured TTL.
    pub async fn mark_unavailable(&self) {
        if let Err(err) = self
            .fast
            .set(
                keys::DURABLE_UNAVAILABLE,
                now_ms().to_string(),
                Some(self.config.unavailable_ttl),
            )
            .await
        {
            warn!(error = %err, "failed to set durable unavailable flag");
        }

        let changed = self.degraded.send_if_modified(|degraded| {
            let changed = !*degraded;
            *degraded = true;
            changed
        });
        if changed {
            warn!("durable store unavailable; writes are parked in the fallback queue");
            self.notify(false);
        }
    }

    /// Clear the "unavailable" flag.
    pub async fn mark_available(&self) {
        if let Err(err) = self.fast.delete(keys::DURABLE_UNAVAILABLE).await {
            warn!(error = %err, "failed to clear durable unavailable flag");
        }

        let changed = self.degraded.send_if_modified(|degraded| {
            let changed = *degraded;
            *degraded = false;
            changed
        });
        if changed {
            info!("durable store available again");
            self.notify(true);
        }
    }

    fn notify(&self, available: bool) {
        let Ok(callbacks) = self.callbacks.read() else {
            return;
        };
        for (index, callback) in callbacks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(available))).is_err() {
                error!(index, available, "availability callback panicked");
            }
        }
    }

    /// Attempt a durable write, parking it in the fallback queue on an
    /// availability failure. Data failures are returned unchanged.
    pub async fn execute(&self, operation: WriteOperation) -> Result<WriteOutcome, ServiceError> {
        let Some(store) = self.durable().await else {
            return self.park(operation, None).await;
        };

        match store.execute(operation.clone()).await {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(err) if err.is_unavailability() => self.park(operation, Some(err)).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn park(
        &self,
        operation: WriteOperation,
        cause: Option<StorageError>,
    ) -> Result<WriteOutcome, ServiceError> {
        match &cause {
            Some(err) => warn!(
                collection = operation.collection(),
                operation = operation.name(),
                error = %err,
                "durable write failed; falling back"
            ),
            None => warn!(
                collection = operation.collection(),
                operation = operation.name(),
                "no durable store installed; falling back"
            ),
        }
        self.mark_unavailable().await;

        let pending = PendingWrite {
            id: Uuid::new_v4(),
            operation,
            timestamp_ms: now_ms(),
        };
        let encoded = serde_json::to_string(&pending)?;
        self.fast
            .list_push(keys::FALLBACK_PENDING, encoded)
            .await
            .map_err(ServiceError::Unavailable)?;

        self.store_snapshots(&pending.operation).await;
        Ok(WriteOutcome::Fallback)
    }

    async fn store_snapshots(&self, operation: &WriteOperation) {
        let documents: Vec<(String, &Value)> = match operation {
            WriteOperation::InsertOne { document, .. } => snapshot_id(document)
                .map(|id| (id, document))
                .into_iter()
                .collect(),
            WriteOperation::ReplaceOne { id, document, .. } => vec![(id.clone(), document)],
            WriteOperation::InsertMany { documents, .. } => documents
                .iter()
                .filter_map(|document| snapshot_id(document).map(|id| (id, document)))
                .collect(),
            WriteOperation::UpdateOne { .. } => Vec::new(),
        };

        for (id, document) in documents {
            let key = keys::fallback_document(operation.collection(), &id);
            let result = self
                .fast
                .set(&key, document.to_string(), Some(self.config.snapshot_ttl))
                .await;
            if let Err(err) = result {
                warn!(%key, error = %err, "failed to store fallback document snapshot");
            }
        }
    }

    /// Read a document from the durable store, or its fallback snapshot when
    /// the durable store cannot answer.
    pub async fn find_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, ServiceError> {
        if let Some(store) = self.durable().await {
            match store.find_document(collection, id).await {
                Ok(Some(document)) => return Ok(Some(document)),
                Ok(None) => {}
                Err(err) if err.is_unavailability() => {
                    warn!(collection, id, error = %err, "durable read failed; trying snapshot");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let snapshot = self
            .fast
            .get(&keys::fallback_document(collection, id))
            .await?;
        Ok(snapshot
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?)
    }

    /// Parked writes in FIFO order.
    pub async fn get_pending_writes(&self) -> Result<Vec<PendingWrite>, ServiceError> {
        let raw = self.fast.list_range(keys::FALLBACK_PENDING).await?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| match serde_json::from_str::<PendingWrite>(&entry) {
                Ok(write) => Some(write),
                Err(err) => {
                    warn!(error = %err, "skipping undecodable pending write");
                    None
                }
            })
            .collect())
    }

    /// Number of durable writes not yet flushed.
    pub async fn count(&self) -> Result<u64, ServiceError> {
        Ok(self.fast.list_len(keys::FALLBACK_PENDING).await?)
    }

    /// Drop every parked write, returning how many were discarded.
    pub async fn clear(&self) -> Result<u64, ServiceError> {
        let count = self.count().await?;
        self.fast.delete(keys::FALLBACK_PENDING).await?;
        if count > 0 {
            warn!(count, "cleared fallback pending writes without replay");
        }
        Ok(count)
    }

    /// Drain the queue into the durable store in FIFO order.
    ///
    /// Stops at the first write that hits an availability failure again (it is
    /// put back at the head). Writes rejected with a data failure are dropped.
    pub async fn replay_pending(&self) -> Result<ReplayReport, ServiceError> {
        let _gate = self.replay_gate.lock().await;
        let mut report = ReplayReport::default();

        let Some(store) = self.durable().await else {
            report.remaining = self.count().await?;
            return Ok(report);
        };

        while let Some(raw) = self.fast.list_pop_front(keys::FALLBACK_PENDING).await? {
            let pending = match serde_json::from_str::<PendingWrite>(&raw) {
                Ok(pending) => pending,
                Err(err) => {
                    error!(error = %err, "dropping undecodable pending write");
                    report.dropped += 1;
                    continue;
                }
            };

            match store.execute(pending.operation.clone()).await {
                Ok(()) => report.replayed += 1,
                Err(err) if err.is_unavailability() => {
                    warn!(pending_id = %pending.id, error = %err, "replay interrupted; durable store unavailable");
                    self.fast
                        .list_push_front(keys::FALLBACK_PENDING, raw)
                        .await?;
                    self.mark_unavailable().await;
                    break;
                }
                Err(err) => {
                    error!(
                        pending_id = %pending.id,
                        collection = pending.operation.collection(),
                        operation = pending.operation.name(),
                        error = %err,
                        "dropping pending write rejected by durable store"
                    );
                    report.dropped += 1;
                }
            }
        }

        report.remaining = self.count().await?;
        if report.replayed > 0 || report.dropped > 0 {
            info!(
                replayed = report.replayed,
                dropped = report.dropped,
                remaining = report.remaining,
                "fallback replay finished"
            );
        }
        Ok(report)
    }
}

fn snapshot_id(document: &Value) -> Option<String> {
    match document.get("id").or_else(|| document.get("answer_id"))? {
        Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::dao::{durable_store::memory::MemoryDurableStore, fast_store::memory::MemoryFastStore};

    async fn guard_with_stores() -> (FallbackGuard, MemoryFastStore, MemoryDurableStore) {
        let fast = MemoryFastStore::new();
        let durable = MemoryDurableStore::new();
        let guard = FallbackGuard::new(Arc::new(fast.clone()), FallbackConfig::default());
        guard.install_durable(Arc::new(durable.clone())).await;
        (guard, fast, durable)
    }

    fn insert(id: &str) -> WriteOperation {
        WriteOperation::InsertOne {
            collection: "answers".into(),
            document: json!({"id": id}),
        }
    }

    #[tokio::test]
    async fn healthy_write_goes_straight_through() {
        let (guard, _, durable) = guard_with_stores().await;
        assert_eq!(guard.execute(insert("a")).await.unwrap(), WriteOutcome::Written);
        assert_eq!(durable.count("answers"), 1);
        assert_eq!(guard.count().await.unwrap(), 0);
        assert!(guard.is_available().await);
    }

    #[tokio::test]
    async fn outage_parks_write_and_flags_unavailable() {
        let (guard, _, durable) = guard_with_stores().await;
        durable.simulate_outage(true);

        assert_eq!(guard.execute(insert("a")).await.unwrap(), WriteOutcome::Fallback);
        assert_eq!(guard.count().await.unwrap(), 1);
        assert!(!guard.is_available().await);
        assert!(guard.is_degraded());

        let snapshot = guard.find_document("answers", "a").await.unwrap().unwrap();
        assert_eq!(snapshot["id"], "a");
    }

    #[tokio::test]
    async fn data_failures_propagate_without_fallback() {
        let (guard, _, _) = guard_with_stores().await;
        guard.execute(insert("dup")).await.unwrap();
        let err = guard.execute(insert("dup")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
        assert_eq!(guard.count().await.unwrap(), 0);
        assert!(guard.is_available().await);
    }

    #[tokio::test]
    async fn missing_durable_store_counts_as_unavailable() {
        let fast = MemoryFastStore::new();
        let guard = FallbackGuard::new(Arc::new(fast), FallbackConfig::default());
        assert_eq!(guard.execute(insert("a")).await.unwrap(), WriteOutcome::Fallback);
        let report = guard.replay_pending().await.unwrap();
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn flag_read_failure_fails_open() {
        let (guard, fast, _) = guard_with_stores().await;
        guard.mark_unavailable().await;
        fast.simulate_outage(true);
        assert!(guard.is_available().await);
    }

    #[tokio::test]
    async fn replay_stops_when_store_drops_again_and_keeps_order() {
        let (guard, _, durable) = guard_with_stores().await;
        durable.simulate_outage(true);
        for id in ["a", "b"] {
            guard.execute(insert(id)).await.unwrap();
        }

        let report = guard.replay_pending().await.unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 2);

        durable.simulate_outage(false);
        let report = guard.replay_pending().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(report.remaining, 0);
        let ids: Vec<_> = durable
            .applied_writes()
            .iter()
            .flat_map(WriteOperation::document_ids)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn replay_drops_writes_rejected_as_data_failures() {
        let (guard, _, durable) = guard_with_stores().await;
        guard.execute(insert("a")).await.unwrap();
        durable.simulate_outage(true);
        guard.execute(insert("a")).await.unwrap();
        guard.execute(insert("b")).await.unwrap();
        durable.simulate_outage(false);

        let report = guard.replay_pending().await.unwrap();
        assert_eq!(report, ReplayReport { replayed: 1, dropped: 1, remaining: 0 });
    }

    #[tokio::test]
    async fn panicking_callback_does_not_block_others() {
        let (guard, _, _) = guard_with_stores().await;
        let calls = Arc::new(AtomicUsize::new(0));
        guard.on_transition(Box::new(|_| panic!("listener failure")));
        let counter = calls.clone();
        guard.on_transition(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        guard.mark_unavailable().await;
        guard.mark_unavailable().await;
        guard.mark_available().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_discards_pending_writes() {
        let (guard, _, durable) = guard_with_stores().await;
        durable.simulate_outage(true);
        guard.execute(insert("a")).await.unwrap();
        assert_eq!(guard.clear().await.unwrap(), 1);
        assert!(guard.get_pending_writes().await.unwrap().is_empty());
    }
}
