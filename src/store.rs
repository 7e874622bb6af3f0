//! Coordination store client with connection management.
//!
//! Every piece of mutable state shared between instances lives behind this
//! wrapper: counters, sliding windows, sets, TTL'd strings, and the pub/sub
//! channel used by the broadcast bus.

use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};

/// Typed Redis client with automatic reconnection.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    client: Client,
}

impl RedisStore {
    /// Connect to the store.
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { manager, client })
    }

    /// Dedicated client for pub/sub connections, which cannot share the
    /// multiplexed command connection.
    pub fn pubsub_client(&self) -> Client {
        self.client.clone()
    }

    pub async fn ping(&self) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    // ========================================================================
    // Strings and counters
    // ========================================================================

    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.get(key).await
    }

    /// SETEX - set a key with an expiry in seconds
    pub async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, seconds).await
    }

    /// SET NX + EXPIRE - set only if absent, always refresh the TTL
    pub async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        seconds: u64,
    ) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        let was_set: bool = conn.set_nx(key, value).await?;
        conn.expire::<_, ()>(key, seconds as i64).await?;
        Ok(was_set)
    }

    pub async fn del(&self, key: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.del(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        conn.exists(key).await
    }

    pub async fn ttl(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.ttl(key).await
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        conn.expire(key, seconds).await
    }

    /// INCR - increment and return the new value
    pub async fn incr(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await
    }

    /// MGET - fetch multiple values preserving order
    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, RedisError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        if keys.len() == 1 {
            let value: Option<String> = conn.get(&keys[0]).await?;
            return Ok(vec![value]);
        }
        conn.get(keys).await
    }

    // ========================================================================
    // Sorted sets (sliding windows)
    // ========================================================================

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score).await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.zrem(key, member).await
    }

    pub async fn zremrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zrembyscore(key, min, max).await
    }

    pub async fn zcard(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zcard(key).await
    }

    pub async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zcount(key, min, max).await
    }

    pub async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
    }

    /// Sliding-window probe executed as one atomic unit.
    ///
    /// Prunes entries older than `window_seconds`, inserts `member` at
    /// `now`, and returns the cardinality *after* the insert. Two concurrent
    /// probes on the same key are serialized by the store, so the returned
    /// count is authoritative for admission decisions.
    pub async fn window_probe(
        &self,
        key: &str,
        now: f64,
        window_seconds: u64,
        member: &str,
    ) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        let window_start = now - window_seconds as f64;
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(window_start)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds + 10)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Sets
    // ========================================================================

    /// SADD - returns true when the member was new
    pub async fn sadd(&self, key: &str, member: &str) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    pub async fn scard(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.scard(key).await
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        conn.sismember(key, member).await
    }

    // ========================================================================
    // Lists (city indexes)
    // ========================================================================

    pub async fn lpush(&self, key: &str, value: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.lpush(key, value).await
    }

    pub async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.lrange(key, start, stop).await
    }

    pub async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.ltrim(key, start, stop).await
    }

    // ========================================================================
    // Pub/sub
    // ========================================================================

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.publish(channel, payload).await
    }
}
