/// In-process backend.
pub mod memory;
/// Redis backend.
#[cfg(feature = "redis-store")]
pub mod redis;

use std::time::Duration;

use futures::future::BoxFuture;

use crate::dao::storage::StorageResult;

/// Member of a sorted set together with its score.
pub type ScoredMember = (String, f64);

/// Low-latency, TTL-capable key/value store used for live reads and
/// transient buffering. Shapes mirror the usual Redis types (strings, hashes,
/// sorted sets, lists).
pub trait FastStore: Send + Sync {
    /// Read a string value.
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Write a string value, optionally expiring after `ttl`.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a key of any type; reports whether it existed.
    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<bool>>;
    /// Set (or refresh) the expiry of an existing key.
    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>>;

    /// Set one hash field.
    fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Read one hash field.
    fn hash_get(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Every field of a hash, in no particular order.
    fn hash_get_all(&self, key: &str) -> BoxFuture<'static, StorageResult<Vec<(String, String)>>>;
    /// Number of fields in a hash.
    fn hash_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>>;
    /// Remove one field; reports whether it existed.
    fn hash_delete(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<bool>>;

    /// Add `member` with `score`; with `only_new` an existing member keeps its
    /// score. Returns whether the member was new, which makes `only_new` an
    /// atomic claim.
    fn sorted_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
        only_new: bool,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Members ordered by score; `stop` is inclusive, `-1` means the last one.
    fn sorted_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        descending: bool,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoredMember>>>;
    /// Zero-based position of `member` in the requested order.
    fn sorted_rank(
        &self,
        key: &str,
        member: &str,
        descending: bool,
    ) -> BoxFuture<'static, StorageResult<Option<u64>>>;
    /// Number of members in a sorted set.
    fn sorted_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>>;

    /// Append to the tail of a list, returning the new length.
    fn list_push(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<u64>>;
    /// Whole list, head first.
    fn list_range(&self, key: &str) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    /// Take the head of a list.
    fn list_pop_front(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Put a value back at the head of a list.
    fn list_push_front(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Number of list items.
    fn list_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>>;

    /// Ping the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
