use redis::RedisError;

use crate::models::unix_now_ms;
use crate::store::RedisStore;

const BURST_WINDOW_MS: u64 = 500;
const BURST_DISTINCT_ENDPOINTS: i64 = 5;

/// Behavioral bot detector.
///
/// Humans click one thing at a time; scripts enumerate the API. An identity
/// that touches five *distinct* endpoints inside half a second is flagged.
/// Raw request volume is already handled by the burst rate-limit class.
#[derive(Clone)]
pub struct BurstProfiler {
    store: RedisStore,
}

impl BurstProfiler {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    /// Record an endpoint access and check whether the pattern is bot-like.
    ///
    /// The sorted set is keyed by endpoint path, so its cardinality after
    /// pruning is exactly the distinct-endpoint count in the window.
    pub async fn observe(&self, composite_key: &str, endpoint: &str) -> Result<bool, RedisError> {
        let now_ms = unix_now_ms();
        let key = format!("burst:{}", composite_key);

        self.store.zadd(&key, now_ms as f64, endpoint).await?;
        let window_start = now_ms.saturating_sub(BURST_WINDOW_MS);
        self.store
            .zremrangebyscore(&key, 0.0, window_start as f64)
            .await?;
        // Cleanup after a minute of inactivity
        self.store.expire(&key, 60).await?;

        let distinct = self.store.zcard(&key).await?;

        if distinct >= BURST_DISTINCT_ENDPOINTS {
            tracing::warn!(
                composite_key = %composite_key,
                distinct_endpoints = distinct,
                window_ms = BURST_WINDOW_MS,
                "Burst profile triggered, flagging identity as bot"
            );
            return Ok(true);
        }

        Ok(false)
    }
}
