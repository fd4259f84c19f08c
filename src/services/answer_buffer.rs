use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::AnswerBufferConfig,
    dao::{fast_store::FastStore, keys, models::SubmissionRecord},
    error::ServiceError,
};

/// Per-session holding area for submitted answers, keyed by answer id.
pub struct AnswerBuffer {
    fast: Arc<dyn FastStore>,
    config: AnswerBufferConfig,
}

impl AnswerBuffer {
    /// Build a buffer over the given fast store.
    pub fn new(fast: Arc<dyn FastStore>, config: AnswerBufferConfig) -> Self {
        Self { fast, config }
    }

    /// Store a submission; the session hash lives for `question_lifetime`
    /// plus the configured margin.
    pub async fn put(
        &self,
        record: &SubmissionRecord,
        question_lifetime: Duration,
    ) -> Result<(), ServiceError> {
        let key = keys::answer_buffer(record.session_id);
        let encoded = serde_json::to_string(record)?;
        self.fast
            .hash_set(&key, &record.answer_id, encoded)
            .await?;
        self.fast
            .expire(&key, question_lifetime + self.config.margin)
            .await?;
        Ok(())
    }

    /// Look up a submission by answer id.
    pub async fn get(
        &self,
        session_id: Uuid,
        answer_id: &str,
    ) -> Result<Option<SubmissionRecord>, ServiceError> {
        let key = keys::answer_buffer(session_id);
        if let Some(raw) = self.fast.hash_get(&key, answer_id).await? {
            return Ok(Some(serde_json::from_str(&raw)?));
        }

        if !self.config.legacy_queue_scan {
            return Ok(None);
        }
        self.scan_legacy_queue(session_id, answer_id).await
    }

    async fn scan_legacy_queue(
        &self,
        session_id: Uuid,
        answer_id: &str,
    ) -> Result<Option<SubmissionRecord>, ServiceError> {
        let entries = self
            .fast
            .list_range(&keys::legacy_answer_queue(session_id))
            .await?;
        for raw in entries {
            match serde_json::from_str::<SubmissionRecord>(&raw) {
                Ok(record) if record.answer_id == answer_id => {
                    debug!(%session_id, answer_id, "answer found in legacy queue");
                    return Ok(Some(record));
                }
                Ok(_) => {}
                Err(err) => warn!(%session_id, error = %err, "skipping malformed legacy queue entry"),
            }
        }
        Ok(None)
    }

    /// Number of buffered answers of a session.
    pub async fn len(&self, session_id: Uuid) -> Result<u64, ServiceError> {
        Ok(self.fast.hash_len(&keys::answer_buffer(session_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{fast_store::memory::MemoryFastStore, models::now_ms};

    fn record(session_id: Uuid, answer_id: &str) -> SubmissionRecord {
        SubmissionRecord {
            answer_id: answer_id.into(),
            participant_id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            session_id,
            selected_option_ids: vec!["a".into()],
            value: None,
            response_time_ms: 1_200,
            submitted_at_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn put_then_get_by_answer_id() {
        let buffer = AnswerBuffer::new(
            Arc::new(MemoryFastStore::new()),
            AnswerBufferConfig::default(),
        );
        let session_id = Uuid::new_v4();
        let stored = record(session_id, "ans-1");
        buffer.put(&stored, Duration::from_secs(30)).await.unwrap();

        assert_eq!(buffer.get(session_id, "ans-1").await.unwrap(), Some(stored));
        assert_eq!(buffer.get(session_id, "missing").await.unwrap(), None);
        assert_eq!(buffer.len(session_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn legacy_queue_is_scanned_only_when_enabled() {
        let fast = MemoryFastStore::new();
        let session_id = Uuid::new_v4();
        let legacy = record(session_id, "old-1");
        fast.list_push(
            &keys::legacy_answer_queue(session_id),
            serde_json::to_string(&legacy).unwrap(),
        )
        .await
        .unwrap();

        let disabled = AnswerBuffer::new(Arc::new(fast.clone()), AnswerBufferConfig::default());
        assert_eq!(disabled.get(session_id, "old-1").await.unwrap(), None);

        let enabled = AnswerBuffer::new(
            Arc::new(fast),
            AnswerBufferConfig {
                legacy_queue_scan: true,
                ..AnswerBufferConfig::default()
            },
        );
        assert_eq!(enabled.get(session_id, "old-1").await.unwrap(), Some(legacy));
    }
}
