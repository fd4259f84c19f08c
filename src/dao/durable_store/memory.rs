use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::{BoxFuture, ready};
use serde_json::Value;

use super::DurableStore;
use crate::dao::{
    models::WriteOperation,
    storage::{StorageError, StorageResult},
};

/// In-process durable store. Installed when no MongoDB URI is configured, and
/// used by tests together with [`MemoryDurableStore::simulate_outage`].
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: DashMap<String, DashMap<String, Value>>,
    applied: std::sync::Mutex<Vec<WriteOperation>>,
    offline: AtomicBool,
}

impl MemoryDurableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a connection-refused error until reverted.
    pub fn simulate_outage(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Writes applied so far, in order.
    pub fn applied_writes(&self) -> Vec<WriteOperation> {
        self.inner
            .applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }

    /// Number of documents stored in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map(|documents| documents.len())
            .unwrap_or(0)
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "durable store unreachable".into(),
                io::Error::from(io::ErrorKind::ConnectionRefused),
            ));
        }
        Ok(())
    }

    fn insert(&self, collection: &str, document: Value) -> StorageResult<()> {
        let id = document_id(&document)?;
        let documents = self
            .inner
            .collections
            .entry(collection.to_string())
            .or_default();
        if documents.contains_key(&id) {
            return Err(StorageError::data(format!(
                "duplicate key `{id}` in collection `{collection}`"
            )));
        }
        documents.insert(id, document);
        Ok(())
    }

    fn apply(&self, operation: &WriteOperation) -> StorageResult<()> {
        match operation {
            WriteOperation::InsertOne {
                collection,
                document,
            } => self.insert(collection, document.clone()),
            WriteOperation::InsertMany {
                collection,
                documents,
            } => documents
                .iter()
                .try_for_each(|document| self.insert(collection, document.clone())),
            WriteOperation::ReplaceOne {
                collection,
                id,
                document,
            } => {
                self.inner
                    .collections
                    .entry(collection.clone())
                    .or_default()
                    .insert(id.clone(), document.clone());
                Ok(())
            }
            WriteOperation::UpdateOne {
                collection,
                filter,
                set,
            } => {
                let Some(documents) = self.inner.collections.get(collection) else {
                    return Ok(());
                };
                let target = documents
                    .iter()
                    .find(|entry| matches_filter(entry.value(), filter))
                    .map(|entry| entry.key().clone());
                if let (Some(id), Value::Object(fields)) = (target, set) {
                    if let Some(mut document) = documents.get_mut(&id) {
                        if let Value::Object(existing) = document.value_mut() {
                            for (field, value) in fields {
                                existing.insert(field.clone(), value.clone());
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn document_id(document: &Value) -> StorageResult<String> {
    match document.get("id").or_else(|| document.get("answer_id")) {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(StorageError::data("document has no `id` field")),
    }
}

fn matches_filter(document: &Value, filter: &Value) -> bool {
    match filter {
        Value::Object(fields) => fields
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected)),
        _ => false,
    }
}

impl DurableStore for MemoryDurableStore {
    fn execute(&self, operation: WriteOperation) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check().and_then(|()| {
            self.apply(&operation)?;
            if let Ok(mut applied) = self.inner.applied.lock() {
                applied.push(operation);
            }
            Ok(())
        });
        Box::pin(ready(result))
    }

    fn find_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let result = self.check().map(|()| {
            self.inner
                .collections
                .get(collection)
                .and_then(|documents| documents.get(id).map(|doc| doc.value().clone()))
        });
        Box::pin(ready(result))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.check()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.check()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn duplicate_insert_is_a_data_error() {
        let store = MemoryDurableStore::new();
        let write = WriteOperation::InsertOne {
            collection: "answers".into(),
            document: json!({"answer_id": "a-1"}),
        };
        store.execute(write.clone()).await.unwrap();
        let err = store.execute(write).await.unwrap_err();
        assert!(!err.is_unavailability());
    }

    #[tokio::test]
    async fn outage_is_an_unavailability_error() {
        let store = MemoryDurableStore::new();
        store.simulate_outage(true);
        let err = store.health_check().await.unwrap_err();
        assert!(err.is_unavailability());
    }

    #[tokio::test]
    async fn update_one_sets_fields_on_first_match() {
        let store = MemoryDurableStore::new();
        store
            .execute(WriteOperation::ReplaceOne {
                collection: "sessions".into(),
                id: "s1".into(),
                document: json!({"id": "s1", "state": "LOBBY"}),
            })
            .await
            .unwrap();
        store
            .execute(WriteOperation::UpdateOne {
                collection: "sessions".into(),
                filter: json!({"id": "s1"}),
                set: json!({"state": "ENDED"}),
            })
            .await
            .unwrap();
        let doc = store.find_document("sessions", "s1").await.unwrap().unwrap();
        assert_eq!(doc["state"], "ENDED");
    }
}
