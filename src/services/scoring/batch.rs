use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    dao::models::{ANSWERS_COLLECTION, ScoredSubmissionEntity, WriteOperation},
    error::ServiceError,
    services::fallback_guard::{FallbackGuard, WriteOutcome},
};

/// Accumulates scored submissions and writes them to the durable store in
/// batches, when `batch_size` records are waiting or on every flush tick.
pub struct AnswerBatcher {
    guard: Arc<FallbackGuard>,
    pending: Mutex<Vec<ScoredSubmissionEntity>>,
    batch_size: usize,
}

impl AnswerBatcher {
    /// Build a batcher writing through `guard`.
    pub fn new(guard: Arc<FallbackGuard>, batch_size: usize) -> Self {
        Self {
            guard,
            pending: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
        }
    }

    /// Queue a record, flushing when the batch is full.
    pub async fn push(&self, record: ScoredSubmissionEntity) -> Result<(), ServiceError> {
        let full = {
            let mut pending = self.pending.lock().await;
            pending.push(record);
            pending.len() >= self.batch_size
        };
        if full {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write everything queued. On failure the records go back to the head
    /// of the queue and are retried on the next flush.
    pub async fn flush(&self) -> Result<usize, ServiceError> {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        if batch.is_empty() {
            return Ok(0);
        }

        let documents = batch
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let count = batch.len();

        match self
            .guard
            .execute(WriteOperation::InsertMany {
                collection: ANSWERS_COLLECTION.to_owned(),
                documents,
            })
            .await
        {
            Ok(outcome) => {
                debug!(count, fallback = outcome == WriteOutcome::Fallback, "answer batch flushed");
                Ok(count)
            }
            Err(err) => {
                warn!(count, error = %err, "answer batch flush failed; keeping records for retry");
                let mut pending = self.pending.lock().await;
                let newer = std::mem::replace(&mut *pending, batch);
                pending.extend(newer);
                Err(err)
            }
        }
    }

    /// Records waiting for the next flush.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Flush on a fixed interval for the life of the process.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // failures are logged inside flush and retried next tick
                let _ = batcher.flush().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::FallbackConfig,
        dao::{
            durable_store::memory::MemoryDurableStore,
            fast_store::memory::MemoryFastStore,
            models::{ScoreBreakdown, SubmissionRecord, now_ms},
        },
    };

    fn scored(answer_id: &str) -> ScoredSubmissionEntity {
        ScoredSubmissionEntity {
            submission: SubmissionRecord {
                answer_id: answer_id.into(),
                participant_id: Uuid::new_v4(),
                question_id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                selected_option_ids: vec!["a".into()],
                value: None,
                response_time_ms: 1_200,
                submitted_at_ms: now_ms(),
            },
            score: ScoreBreakdown::default(),
            total_score_after: 0,
            scored_at_ms: now_ms(),
        }
    }

    async fn batcher(batch_size: usize) -> (AnswerBatcher, MemoryDurableStore, Arc<FallbackGuard>) {
        let durable = MemoryDurableStore::new();
        let guard = Arc::new(FallbackGuard::new(
            Arc::new(MemoryFastStore::new()),
            FallbackConfig::default(),
        ));
        guard.install_durable(Arc::new(durable.clone())).await;
        (AnswerBatcher::new(guard.clone(), batch_size), durable, guard)
    }

    #[tokio::test]
    async fn flushes_when_batch_is_full() {
        let (batcher, durable, _) = batcher(3).await;
        batcher.push(scored("a1")).await.unwrap();
        batcher.push(scored("a2")).await.unwrap();
        assert_eq!(durable.count(ANSWERS_COLLECTION), 0);
        assert_eq!(batcher.pending_len().await, 2);

        batcher.push(scored("a3")).await.unwrap();
        assert_eq!(durable.count(ANSWERS_COLLECTION), 3);
        assert_eq!(batcher.pending_len().await, 0);
    }

    #[tokio::test]
    async fn outage_parks_the_batch_in_the_fallback_queue() {
        let (batcher, durable, guard) = batcher(10).await;
        durable.simulate_outage(true);
        batcher.push(scored("a1")).await.unwrap();
        assert_eq!(batcher.flush().await.unwrap(), 1);
        assert_eq!(guard.count().await.unwrap(), 1);
        assert_eq!(batcher.pending_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flusher_drains_on_interval() {
        let (batcher, durable, _) = batcher(100).await;
        let batcher = Arc::new(batcher);
        let task = batcher.spawn_flusher(Duration::from_secs(1));
        batcher.push(scored("a1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(durable.count(ANSWERS_COLLECTION), 1);
        task.abort();
    }
}
