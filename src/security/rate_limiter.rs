use redis::RedisError;
use uuid::Uuid;

use crate::models::unix_now_f64;
use crate::store::RedisStore;

const IP_BLOCK_SECONDS: u64 = 1800;

/// Sliding-window rate limiter backed by sorted sets.
#[derive(Clone)]
pub struct RateLimiter {
    store: RedisStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitClass {
    /// 1 post per 60 seconds
    Post,
    /// 5 contact reveals per hour
    Reveal,
    /// 20 requests per 2 seconds (burst protection)
    Burst,
}

impl RateLimitClass {
    fn window_seconds(&self) -> u64 {
        match self {
            RateLimitClass::Post => 60,
            RateLimitClass::Reveal => 3600,
            RateLimitClass::Burst => 2,
        }
    }

    /// Weak identities (no fingerprint) share a single per-IP bucket, so the
    /// burst allowance is halved for them.
    fn capacity(&self, weak_identity: bool) -> i64 {
        match self {
            RateLimitClass::Post => 1,
            RateLimitClass::Reveal => 5,
            RateLimitClass::Burst => {
                if weak_identity {
                    10
                } else {
                    20
                }
            }
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            RateLimitClass::Post => "ratelimit:post",
            RateLimitClass::Reveal => "ratelimit:reveal",
            RateLimitClass::Burst => "ratelimit:burst",
        }
    }
}

#[derive(Debug)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub retry_after_seconds: u64,
    /// The recorded window member, present when the event was admitted.
    /// Handlers that later refuse the request (content rejection) pass it to
    /// [`RateLimiter::refund`] so the attempt does not consume the window.
    pub member: Option<String>,
}

impl RateLimiter {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    /// Admit or reject one event for `(composite_key, class)`.
    ///
    /// The prune + insert + count runs as a single atomic pipeline; the
    /// post-insert cardinality is the authoritative admission check even
    /// under concurrent probes on the same key. A rejected probe removes its
    /// own member again so denied attempts do not consume the window.
    pub async fn check(
        &self,
        composite_key: &str,
        class: RateLimitClass,
        weak_identity: bool,
    ) -> Result<RateLimitDecision, RedisError> {
        let now = unix_now_f64();
        let window = class.window_seconds();
        let capacity = class.capacity(weak_identity);
        let key = format!("{}:{}", class.key_prefix(), composite_key);

        // Unique member per event so repeated events in the same millisecond
        // are not collapsed.
        let member = Uuid::new_v4().to_string();
        let count = self.store.window_probe(&key, now, window, &member).await?;

        if count > capacity {
            // Best effort: a stray member only shortens the window for the
            // offender, never for a compliant client.
            let _ = self.store.zrem(&key, &member).await;
            let retry_after_seconds = self.seconds_until_slot(&key, now, window).await?;
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_seconds,
                member: None,
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: capacity - count,
            retry_after_seconds: 0,
            member: Some(member),
        })
    }

    /// Give an admitted event back, e.g. when the request was later refused
    /// by content moderation. Best effort.
    pub async fn refund(
        &self,
        composite_key: &str,
        class: RateLimitClass,
        member: &str,
    ) -> Result<(), RedisError> {
        let key = format!("{}:{}", class.key_prefix(), composite_key);
        self.store.zrem(&key, member).await
    }

    /// Read-only variant: reports the current state without recording an
    /// event. Used by the cooldown endpoint.
    pub async fn status(
        &self,
        composite_key: &str,
        class: RateLimitClass,
        weak_identity: bool,
    ) -> Result<RateLimitDecision, RedisError> {
        let now = unix_now_f64();
        let window = class.window_seconds();
        let capacity = class.capacity(weak_identity);
        let key = format!("{}:{}", class.key_prefix(), composite_key);

        let window_start = now - window as f64;
        let count = self.store.zcount(&key, window_start, f64::INFINITY).await?;

        if count >= capacity {
            let retry_after_seconds = self.seconds_until_slot(&key, now, window).await?;
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_seconds,
                member: None,
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: capacity - count,
            retry_after_seconds: 0,
            member: None,
        })
    }

    /// Time until the oldest event in the window expires out of it.
    async fn seconds_until_slot(
        &self,
        key: &str,
        now: f64,
        window: u64,
    ) -> Result<u64, RedisError> {
        let oldest = self.store.zrange_withscores(key, 0, 0).await?;
        let reset_at = oldest
            .first()
            .map(|(_, ts)| ts + window as f64)
            .unwrap_or(now + window as f64);
        Ok((reset_at - now).ceil().max(1.0) as u64)
    }

    // ========================================================================
    // Global IP block
    // ========================================================================

    /// Block an IP address globally for `duration_seconds`.
    pub async fn block_ip(&self, ip: &str, duration_seconds: u64) -> Result<(), RedisError> {
        tracing::warn!(ip = %ip, duration_seconds, "Blocking IP");
        let key = format!("blocked:ip:{}", ip);
        self.store.set_ex(&key, "1", duration_seconds).await
    }

    /// Block an IP for the standard 30 minute penalty.
    pub async fn block_ip_default(&self, ip: &str) -> Result<(), RedisError> {
        self.block_ip(ip, IP_BLOCK_SECONDS).await
    }

    pub async fn is_ip_blocked(&self, ip: &str) -> Result<bool, RedisError> {
        let key = format!("blocked:ip:{}", ip);
        self.store.exists(&key).await
    }

    pub async fn ip_block_ttl(&self, ip: &str) -> Result<i64, RedisError> {
        let key = format!("blocked:ip:{}", ip);
        self.store.ttl(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_parameters() {
        assert_eq!(RateLimitClass::Post.window_seconds(), 60);
        assert_eq!(RateLimitClass::Post.capacity(false), 1);

        assert_eq!(RateLimitClass::Reveal.window_seconds(), 3600);
        assert_eq!(RateLimitClass::Reveal.capacity(false), 5);

        assert_eq!(RateLimitClass::Burst.window_seconds(), 2);
        assert_eq!(RateLimitClass::Burst.capacity(false), 20);
    }

    #[test]
    fn weak_identity_halves_burst_capacity() {
        assert_eq!(RateLimitClass::Burst.capacity(true), 10);
        // Post and reveal allowances are unchanged
        assert_eq!(RateLimitClass::Post.capacity(true), 1);
        assert_eq!(RateLimitClass::Reveal.capacity(true), 5);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn rejects_at_capacity_and_reports_retry() -> Result<(), RedisError> {
        let store = RedisStore::connect("redis://localhost:6379").await?;
        let limiter = RateLimiter::new(store.clone());
        let ck = format!("test-{}", Uuid::new_v4());

        let first = limiter.check(&ck, RateLimitClass::Post, false).await?;
        assert!(first.allowed);

        let second = limiter.check(&ck, RateLimitClass::Post, false).await?;
        assert!(!second.allowed);
        assert!(second.retry_after_seconds >= 58 && second.retry_after_seconds <= 60);

        store.del(&format!("ratelimit:post:{}", ck)).await?;
        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn rejected_probe_does_not_consume_the_window() -> Result<(), RedisError> {
        let store = RedisStore::connect("redis://localhost:6379").await?;
        let limiter = RateLimiter::new(store.clone());
        let ck = format!("test-{}", Uuid::new_v4());
        let key = format!("ratelimit:post:{}", ck);

        limiter.check(&ck, RateLimitClass::Post, false).await?;
        limiter.check(&ck, RateLimitClass::Post, false).await?;
        // Only the accepted event remains in the window
        assert_eq!(store.zcard(&key).await?, 1);

        store.del(&key).await?;
        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn ip_block_round_trip() -> Result<(), RedisError> {
        let store = RedisStore::connect("redis://localhost:6379").await?;
        let limiter = RateLimiter::new(store.clone());
        let ip = "203.0.113.77";

        limiter.block_ip(ip, 60).await?;
        assert!(limiter.is_ip_blocked(ip).await?);
        assert!(limiter.ip_block_ttl(ip).await? > 0);

        store.del(&format!("blocked:ip:{}", ip)).await?;
        assert!(!limiter.is_ip_blocked(ip).await?);
        Ok(())
    }
}
