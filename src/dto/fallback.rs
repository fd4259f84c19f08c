use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::PendingWrite, dto::format_timestamp_ms, services::fallback_guard::ReplayReport,
};

/// A durable write parked while the durable store was unreachable.
#[derive(Debug, Serialize, ToSchema)]
pub struct PendingWriteView {
    /// Queue entry id.
    pub id: Uuid,
    /// Operation kind (`insert_one`, `replace_one`, ...).
    pub operation: String,
    /// Target collection.
    pub collection: String,
    /// Identifiers of the documents the write touches, when known.
    pub document_ids: Vec<String>,
    /// RFC 3339 time at which the write was parked.
    pub parked_at: String,
}

impl From<&PendingWrite> for PendingWriteView {
    fn from(write: &PendingWrite) -> Self {
        Self {
            id: write.id,
            operation: write.operation.name().to_string(),
            collection: write.operation.collection().to_string(),
            document_ids: write.operation.document_ids(),
            parked_at: format_timestamp_ms(write.timestamp_ms),
        }
    }
}

/// Pending-write queue as seen by an operator.
#[derive(Debug, Serialize, ToSchema)]
pub struct PendingWritesResponse {
    /// Number of parked writes.
    pub count: usize,
    /// Whether the durable store is unavailable.
    pub degraded: bool,
    /// Parked writes, oldest first.
    pub writes: Vec<PendingWriteView>,
}

/// Number of discarded pending writes.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClearPendingResponse {
    /// Writes discarded.
    pub cleared: u64,
}

/// Outcome of a manual replay.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReplayResponse {
    /// Writes applied to the durable store.
    pub replayed: u64,
    /// Writes discarded as unrecoverable.
    pub dropped: u64,
    /// Writes still parked.
    pub remaining: u64,
}

impl From<ReplayReport> for ReplayResponse {
    fn from(report: ReplayReport) -> Self {
        Self {
            replayed: report.replayed,
            dropped: report.dropped,
            remaining: report.remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::WriteOperation;

    #[test]
    fn view_lists_touched_documents_and_rfc3339_time() {
        let write = PendingWrite {
            id: Uuid::nil(),
            operation: WriteOperation::ReplaceOne {
                collection: "sessions".into(),
                id: "abc".into(),
                document: serde_json::json!({"id": "abc"}),
            },
            timestamp_ms: 0,
        };
        let view = PendingWriteView::from(&write);
        assert_eq!(view.operation, "replace_one");
        assert_eq!(view.collection, "sessions");
        assert_eq!(view.document_ids, vec!["abc".to_string()]);
        assert_eq!(view.parked_at, "1970-01-01T00:00:00Z");
    }
}
