//! Redis-backed shared queue (behind the `redis` feature).
//!
//! # Key layout
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `{prefix}:seq` | string | sequence counter (`INCR`) |
//! | `{prefix}:index` | sorted set | record ids, score = id |
//! | `{prefix}:records` | hash | id → JSON record |
//! | `{prefix}:processed` | sorted set | processed ids, score = id |
//! | `{prefix}:cursor:{consumer}` | string | consumer cursor |
//! | `{prefix}:lock:{name}` | string | advisory lock token, with `PX` expiry |
//!
//! Every process pointed at the same Redis and prefix shares one event
//! stream.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::queue::{QueueStats, QueueStore, QueuedEvent, validate_name};

/// Default key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "courier:events";

/// Compare-and-delete so a consumer only releases a lock it still holds.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

fn map_redis_err(e: &redis::RedisError) -> StorageError {
    if e.is_connection_refusal()
        || e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
    {
        StorageError::Connection(e.to_string())
    } else {
        StorageError::Internal(e.to_string())
    }
}

/// Shared queue stored in Redis.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the client cannot be created
    /// or the initial connection fails, and [`StorageError::InvalidKey`] if
    /// the prefix is empty or contains whitespace.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> StorageResult<Self> {
        let prefix = prefix.into();
        validate_name("key prefix", &prefix)?;

        let client =
            redis::Client::open(url).map_err(|e| StorageError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(prefix = %prefix, "Connected Redis event queue");
        Ok(Self { conn, prefix })
    }

    /// The key prefix this store writes under.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }

    fn decode(raw: &str) -> StorageResult<QueuedEvent> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn next_id(&self) -> StorageResult<u64> {
        let mut conn = self.conn.clone();
        let id: u64 = conn
            .incr(self.key("seq"), 1_u64)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        Ok(id)
    }

    async fn append(&self, record: QueuedEvent) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&record)?;

        let _: () = redis::pipe()
            .atomic()
            .hset(self.key("records"), record.id, json)
            .ignore()
            .zadd(self.key("index"), record.id, record.id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        Ok(())
    }

    async fn range_after(&self, cursor: u64, limit: usize) -> StorageResult<Vec<QueuedEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let count = isize::try_from(limit).unwrap_or(isize::MAX);

        let ids: Vec<u64> = conn
            .zrangebyscore_limit(self.key("index"), format!("({cursor}"), "+inf", 0, count)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.key("records"))
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;

        // Index entries whose record vanished (concurrent clear) are skipped.
        raw.iter()
            .flatten()
            .map(|json| Self::decode(json))
            .collect()
    }

    async fn get(&self, id: u64) -> StorageResult<Option<QueuedEvent>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(self.key("records"), id)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        raw.as_deref().map(Self::decode).transpose()
    }

    async fn mark_processed(&self, id: u64, at: DateTime<Utc>) -> StorageResult<bool> {
        let Some(mut record) = self.get(id).await? else {
            return Ok(false);
        };
        if record.is_processed() {
            return Ok(true);
        }
        record.processed_at = Some(at);
        let json = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(self.key("records"), id, json)
            .ignore()
            .zadd(self.key("processed"), id, id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        Ok(true)
    }

    async fn cursor(&self, consumer: &str) -> StorageResult<u64> {
        validate_name("consumer", consumer)?;
        let mut conn = self.conn.clone();
        let cursor: Option<u64> = conn
            .get(self.key(&format!("cursor:{consumer}")))
            .await
            .map_err(|ref e| map_redis_err(e))?;
        Ok(cursor.unwrap_or_default())
    }

    async fn set_cursor(&self, consumer: &str, id: u64) -> StorageResult<()> {
        validate_name("consumer", consumer)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(self.key(&format!("cursor:{consumer}")), id)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        Ok(())
    }

    async fn clear(&self) -> StorageResult<u64> {
        let mut conn = self.conn.clone();
        let (removed, _, _, _): (u64, (), (), ()) = redis::pipe()
            .atomic()
            .zcard(self.key("index"))
            .del(self.key("index"))
            .del(self.key("records"))
            .del(self.key("processed"))
            .query_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        debug!(removed, prefix = %self.prefix, "Cleared Redis event queue");
        Ok(removed)
    }

    async fn clear_processed(&self) -> StorageResult<u64> {
        let mut conn = self.conn.clone();
        let ids: Vec<u64> = conn
            .zrange(self.key("processed"), 0, -1)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        if ids.is_empty() {
            return Ok(0);
        }

        let (removed, _): (u64, ()) = redis::pipe()
            .atomic()
            .zrem(self.key("index"), &ids)
            .hdel(self.key("records"), &ids)
            .ignore()
            .zrem(self.key("processed"), &ids)
            .query_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        debug!(removed, prefix = %self.prefix, "Cleared processed Redis queue records");
        Ok(removed)
    }

    async fn stats(&self) -> StorageResult<QueueStats> {
        let mut conn = self.conn.clone();
        let (total, processed, last_id): (u64, u64, Option<u64>) = redis::pipe()
            .zcard(self.key("index"))
            .zcard(self.key("processed"))
            .get(self.key("seq"))
            .query_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        Ok(QueueStats {
            total,
            pending: total.saturating_sub(processed),
            processed,
            last_id: last_id.unwrap_or_default(),
        })
    }

    async fn try_lock(&self, name: &str, token: &str, ttl: Duration) -> StorageResult<bool> {
        validate_name("lock name", name)?;
        let mut conn = self.conn.clone();
        let key = self.key(&format!("lock:{name}"));
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        if acquired.is_some() {
            return Ok(true);
        }

        // Already held: succeed only if we are the holder, refreshing expiry.
        let holder: Option<String> = conn.get(&key).await.map_err(|ref e| map_redis_err(e))?;
        if holder.as_deref() == Some(token) {
            let _: bool = conn
                .pexpire(&key, i64::try_from(ttl_ms).unwrap_or(i64::MAX))
                .await
                .map_err(|ref e| map_redis_err(e))?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn unlock(&self, name: &str, token: &str) -> StorageResult<bool> {
        let mut conn = self.conn.clone();
        let released: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(self.key(&format!("lock:{name}")))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|ref e| map_redis_err(e))?;
        Ok(released == 1)
    }
}
