pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::dao::{models::WriteOperation, storage::StorageResult};

/// Abstraction over the authoritative store of record.
///
/// Documents travel as JSON values keyed by their `id` field so that a write
/// can be parked in the fast store and replayed verbatim later.
pub trait DurableStore: Send + Sync {
    fn execute(&self, operation: WriteOperation) -> BoxFuture<'static, StorageResult<()>>;
    fn find_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
