//! Redis-backed fast store.
//!
//! Every call goes through a shared [`ConnectionManager`], which multiplexes
//! commands over one connection and reconnects on its own.

use std::time::Duration;

use futures::future::BoxFuture;
use redis::{Client, RedisError, aio::ConnectionManager, cmd};

use super::{FastStore, ScoredMember};
use crate::dao::storage::{StorageError, StorageResult};

/// Fast store talking to a Redis server.
#[derive(Clone)]
pub struct RedisFastStore {
    connection: ConnectionManager,
}

impl From<RedisError> for StorageError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StorageError::unavailable(err.to_string(), err)
        } else {
            StorageError::classify(err.to_string(), err)
        }
    }
}

impl RedisFastStore {
    /// Open a managed connection to `url`.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let client = Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl FastStore for RedisFastStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let value: Option<String> = cmd("GET").arg(&key).query_async(&mut conn).await?;
            Ok(value)
        })
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let mut command = cmd("SET");
            command.arg(&key).arg(value);
            if let Some(ttl) = ttl {
                command.arg("PX").arg(ttl_millis(ttl));
            }
            let _: () = command.query_async(&mut conn).await?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let removed: u64 = cmd("DEL").arg(&key).query_async(&mut conn).await?;
            Ok(removed > 0)
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let _: i64 = cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.conn();
        let (key, field) = (key.to_string(), field.to_string());
        Box::pin(async move {
            let _: i64 = cmd("HSET")
                .arg(&key)
                .arg(&field)
                .arg(value)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn hash_get(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let mut conn = self.conn();
        let (key, field) = (key.to_string(), field.to_string());
        Box::pin(async move {
            let value: Option<String> = cmd("HGET")
                .arg(&key)
                .arg(&field)
                .query_async(&mut conn)
                .await?;
            Ok(value)
        })
    }

    fn hash_get_all(&self, key: &str) -> BoxFuture<'static, StorageResult<Vec<(String, String)>>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let pairs: Vec<(String, String)> =
                cmd("HGETALL").arg(&key).query_async(&mut conn).await?;
            Ok(pairs)
        })
    }

    fn hash_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let len: u64 = cmd("HLEN").arg(&key).query_async(&mut conn).await?;
            Ok(len)
        })
    }

    fn hash_delete(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.conn();
        let (key, field) = (key.to_string(), field.to_string());
        Box::pin(async move {
            let removed: u64 = cmd("HDEL")
                .arg(&key)
                .arg(&field)
                .query_async(&mut conn)
                .await?;
            Ok(removed > 0)
        })
    }

    fn sorted_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
        only_new: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.conn();
        let (key, member) = (key.to_string(), member.to_string());
        Box::pin(async move {
            let mut command = cmd("ZADD");
            command.arg(&key);
            if only_new {
                command.arg("NX");
            }
            // ZADD counts newly added members only
            let added: i64 = command
                .arg(score)
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            Ok(added > 0)
        })
    }

    fn sorted_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        descending: bool,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoredMember>>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let name = if descending { "ZREVRANGE" } else { "ZRANGE" };
            let members: Vec<(String, f64)> = cmd(name)
                .arg(&key)
                .arg(start)
                .arg(stop)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await?;
            Ok(members)
        })
    }

    fn sorted_rank(
        &self,
        key: &str,
        member: &str,
        descending: bool,
    ) -> BoxFuture<'static, StorageResult<Option<u64>>> {
        let mut conn = self.conn();
        let (key, member) = (key.to_string(), member.to_string());
        Box::pin(async move {
            let name = if descending { "ZREVRANK" } else { "ZRANK" };
            let rank: Option<u64> = cmd(name)
                .arg(&key)
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            Ok(rank)
        })
    }

    fn sorted_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let len: u64 = cmd("ZCARD").arg(&key).query_async(&mut conn).await?;
            Ok(len)
        })
    }

    fn list_push(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<u64>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let len: u64 = cmd("RPUSH")
                .arg(&key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
            Ok(len)
        })
    }

    fn list_range(&self, key: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let items: Vec<String> = cmd("LRANGE")
                .arg(&key)
                .arg(0)
                .arg(-1)
                .query_async(&mut conn)
                .await?;
            Ok(items)
        })
    }

    fn list_pop_front(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let item: Option<String> = cmd("LPOP").arg(&key).query_async(&mut conn).await?;
            Ok(item)
        })
    }

    fn list_push_front(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let _: u64 = cmd("LPUSH")
                .arg(&key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn list_len(&self, key: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let mut conn = self.conn();
        let key = key.to_string();
        Box::pin(async move {
            let len: u64 = cmd("LLEN").arg(&key).query_async(&mut conn).await?;
            Ok(len)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.conn();
        Box::pin(async move {
            let _: String = cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
    }
}
