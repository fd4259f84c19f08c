use std::{
    cmp::Ordering,
    collections::{HashMap, VecDeque},
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry as MapEntry};
use futures::future::{BoxFuture, ready};

use super::{FastStore, ScoredMember};
use crate::dao::storage::{StorageError, StorageResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Sorted(HashMap<String, f64>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Process-local fast store backed by a [`DashMap`], with lazy TTL eviction.
///
/// Used when no Redis URL is configured and throughout the test suite.
#[derive(Clone, Default)]
pub struct MemoryFastStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: DashMap<String, Entry>,
    failing: AtomicBool,
    failing_writes: DashMap<String, ()>,
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::data(format!("key `{key}` holds a value of another type"))
}

impl MemoryFastStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the server were unreachable.
    pub fn simulate_outage(&self, failing: bool) {
        self.inner.failing.store(failing, AtomicOrdering::SeqCst);
    }

    /// Make writes to one key fail as if the server were unreachable.
    pub fn fail_writes_to(&self, key: &str, failing: bool) {
        if failing {
            self.inner.failing_writes.insert(key.to_string(), ());
        } else {
            self.inner.failing_writes.remove(key);
        }
    }

    fn check_write(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        if self.inner.failing_writes.contains_key(key) {
            return Err(StorageError::unavailable(
                format!("writes to `{key}` refused"),
                io::Error::from(io::ErrorKind::ConnectionReset),
            ));
        }
        Ok(())
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.failing.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::unavailable(
                "fast store unreachable".into(),
                io::Error::from(io::ErrorKind::ConnectionRefused),
            ));
        }
        Ok(())
    }

    /// Read a live entry, evicting it first when its TTL elapsed.
    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> StorageResult<T>) -> StorageResult<T> {
        self.check()?;
        let now = Instant::now();
        self.inner
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now));
        match self.inner.entries.get(key) {
            Some(entry) => f(Some(&entry.value)),
            None => f(None),
        }
    }

    /// Mutate an entry, creating it with `init` when absent or expired.
    fn write<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Entry) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.check_write(key)?;
        let now = Instant::now();
        match self.inner.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Entry::new(init()));
                }
                f(occupied.get_mut())
            }
            MapEntry::Vacant(vacant) => {
                let mut entry = vacant.insert(Entry::new(init()));
                f(entry.value_mut())
            }
        }
    }

    fn sorted_members(&self, key: &str, descending: bool) -> StorageResult<Vec<ScoredMember>> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::Sorted(members)) => {
                let mut ordered: Vec<ScoredMember> = members
                    .iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect();
                ordered.sort_by(|(a_member, a_score), (b_member, b_score)| {
                    let ascending = a_score
                        .partial_cmp(b_score)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a_member.cmp(b_member));
                    if descending {
                        ascending.reverse()
                    } else {
                        ascending
                    }
                });
                Ok(ordered)
            }
            Some(_) => Err(wrong_type(key)),
        })
    }
}

fn resolve_index(index: isize, len: usize) -> isize {
    if index < 0 { len as isize + index } else { index }
}

impl FastStore for MemoryFastStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let result = self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        });
        Box::pin(ready(result))
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_write(key).map(|()| {
            self.inner.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        });
        Box::pin(ready(result))
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self
            .check()
            .map(|()| self.inner.entries.remove(key).is_some());
        Box::pin(ready(result))
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check().map(|()| {
            if let Some(mut entry) = self.inner.entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });
        Box::pin(ready(result))
    }

    fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.write(
            key,
            || Value::Hash(HashMap::new()),
            |entry| match &mut entry.value {
                Value::Hash(map) => {
                    map.insert(field.to_string(), value);
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            },
        );
        Box::pin(ready(result))
    }

    fn hash_get(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let result = self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        });
        Box::pin(ready(result))
    }

    fn hash_get_all(&self, key: &str) -> BoxFuture<'static, StorageResult<Vec<(String, String)>>> {
        let result = self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::Hash(map)) => Ok(map
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()),
            Some(_) => Err(wrong_type(key)),
        });
        Box::pin(ready(result))
    }

    fn hash_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let result = self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::Hash(map)) => Ok(map.len() as u64),
            Some(_) => Err(wrong_type(key)),
        });
        Box::pin(ready(result))
    }

    fn hash_delete(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self.check().and_then(|()| {
            let now = Instant::now();
            self.inner
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now));
            match self.inner.entries.get_mut(key) {
                None => Ok(false),
                Some(mut entry) => match &mut entry.value {
                    Value::Hash(map) => Ok(map.remove(field).is_some()),
                    _ => Err(wrong_type(key)),
                },
            }
        });
        Box::pin(ready(result))
    }

    fn sorted_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
        only_new: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self.write(
            key,
            || Value::Sorted(HashMap::new()),
            |entry| match &mut entry.value {
                Value::Sorted(members) => {
                    if only_new {
                        if members.contains_key(member) {
                            return Ok(false);
                        }
                        members.insert(member.to_string(), score);
                        Ok(true)
                    } else {
                        Ok(members.insert(member.to_string(), score).is_none())
                    }
                }
                _ => Err(wrong_type(key)),
            },
        );
        Box::pin(ready(result))
    }

    fn sorted_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        descending: bool,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoredMember>>> {
        let result = self.sorted_members(key, descending).map(|members| {
            let len = members.len();
            let start = resolve_index(start, len).max(0);
            let stop = resolve_index(stop, len).min(len as isize - 1);
            if len == 0 || start > stop {
                return Vec::new();
            }
            members[start as usize..=stop as usize].to_vec()
        });
        Box::pin(ready(result))
    }

    fn sorted_rank(
        &self,
        key: &str,
        member: &str,
        descending: bool,
    ) -> BoxFuture<'static, StorageResult<Option<u64>>> {
        let result = self.sorted_members(key, descending).map(|members| {
            members
                .iter()
                .position(|(candidate, _)| candidate == member)
                .map(|position| position as u64)
        });
        Box::pin(ready(result))
    }

    fn sorted_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let result = self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::Sorted(members)) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type(key)),
        });
        Box::pin(ready(result))
    }

    fn list_push(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<u64>> {
        let result = self.write(
            key,
            || Value::List(VecDeque::new()),
            |entry| match &mut entry.value {
                Value::List(items) => {
                    items.push_back(value);
                    Ok(items.len() as u64)
                }
                _ => Err(wrong_type(key)),
            },
        );
        Box::pin(ready(result))
    }

    fn list_range(&self, key: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let result = self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => Ok(items.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        });
        Box::pin(ready(result))
    }

    fn list_pop_front(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let result = self.check().and_then(|()| {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                return Ok(None);
            };
            match &mut entry.value {
                Value::List(items) => Ok(items.pop_front()),
                _ => Err(wrong_type(key)),
            }
        });
        Box::pin(ready(result))
    }

    fn list_push_front(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.write(
            key,
            || Value::List(VecDeque::new()),
            |entry| match &mut entry.value {
                Value::List(items) => {
                    items.push_front(value);
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            },
        );
        Box::pin(ready(result))
    }

    fn list_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let result = self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::List(items)) => Ok(items.len() as u64),
            Some(_) => Err(wrong_type(key)),
        });
        Box::pin(ready(result))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.check()))
    }
}
