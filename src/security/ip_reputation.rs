use redis::RedisError;
use serde::{Deserialize, Serialize};

use crate::store::RedisStore;

/// Reports older than this are forgiven.
const REPORT_RETENTION_SECONDS: i64 = 604_800; // 7 days
/// Distinct reporters that shadow-hide a single message.
pub const MESSAGE_HIDE_THRESHOLD: i64 = 3;

/// Risk levels derived from the number of unique fingerprints reported
/// against an IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Level0 = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
}

impl RiskLevel {
    pub fn from_report_count(count: usize) -> Self {
        match count {
            0..=1 => RiskLevel::Level0,
            2 => RiskLevel::Level1,
            3..=5 => RiskLevel::Level2,
            _ => RiskLevel::Level3,
        }
    }

    /// Minimum delay between posts for identities on this IP.
    pub fn cooldown_seconds(&self) -> u64 {
        match self {
            RiskLevel::Level0 => 60,
            RiskLevel::Level1 => 300,
            RiskLevel::Level2 => 900,
            RiskLevel::Level3 => 7200,
        }
    }

    pub fn visibility(&self) -> VisibilityMode {
        match self {
            RiskLevel::Level0 | RiskLevel::Level1 => VisibilityMode::Normal,
            RiskLevel::Level2 => VisibilityMode::Throttled,
            RiskLevel::Level3 => VisibilityMode::Hidden,
        }
    }
}

/// Broadcast policy attached to an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    /// Full fan-out to every subscriber of the city.
    Normal,
    /// Fan-out only to sockets originating from the sender's own IP.
    Throttled,
    /// No broadcast at all.
    Hidden,
}

/// Progressive-friction engine: unique reports against an IP raise its
/// cooldown and narrow its visibility.
#[derive(Clone)]
pub struct IpReputation {
    store: RedisStore,
}

impl IpReputation {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    /// Record a report against `reported_ip`. Duplicate reporters are
    /// idempotent. Returns the unique-reporter count.
    pub async fn add_report(
        &self,
        reported_ip: &str,
        reporter_fingerprint: &str,
    ) -> Result<usize, RedisError> {
        let key = format!("reports:ip:{}", reported_ip);
        self.store.sadd(&key, reporter_fingerprint).await?;
        self.store.expire(&key, REPORT_RETENTION_SECONDS).await?;
        let count = self.store.scard(&key).await?;
        Ok(count as usize)
    }

    pub async fn report_count(&self, ip: &str) -> Result<usize, RedisError> {
        let key = format!("reports:ip:{}", ip);
        Ok(self.store.scard(&key).await? as usize)
    }

    pub async fn risk_level(&self, ip: &str) -> Result<RiskLevel, RedisError> {
        Ok(RiskLevel::from_report_count(self.report_count(ip).await?))
    }

    // ========================================================================
    // Per-message reports
    // ========================================================================

    /// Count a report on a single message, deduplicated by reporter
    /// fingerprint. Returns the distinct-reporter count.
    pub async fn add_message_report(
        &self,
        message_id: &str,
        reporter_fingerprint: &str,
    ) -> Result<i64, RedisError> {
        let seen_key = format!("reports:message:{}:by", message_id);
        let count_key = format!("reports:message:{}", message_id);

        let count = if self.store.sadd(&seen_key, reporter_fingerprint).await? {
            self.store.incr(&count_key).await?
        } else {
            self.store
                .get(&count_key)
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        self.store.expire(&seen_key, REPORT_RETENTION_SECONDS).await?;
        self.store.expire(&count_key, REPORT_RETENTION_SECONDS).await?;
        Ok(count)
    }

    /// A message with three or more distinct reporters is shadow-hidden:
    /// filtered from fetches and broadcasts but never deleted, so the
    /// evidence survives.
    pub async fn is_message_hidden(&self, message_id: &str) -> Result<bool, RedisError> {
        let count_key = format!("reports:message:{}", message_id);
        let count: i64 = self
            .store
            .get(&count_key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(count >= MESSAGE_HIDE_THRESHOLD)
    }

    // ========================================================================
    // Cooldown timer
    // ========================================================================

    /// Remaining cooldown for an identity, if any.
    pub async fn cooldown_remaining(
        &self,
        composite_key: &str,
    ) -> Result<Option<u64>, RedisError> {
        let key = format!("cooldown:{}", composite_key);
        match self.store.ttl(&key).await? {
            ttl if ttl > 0 => Ok(Some(ttl as u64)),
            _ => Ok(None),
        }
    }

    /// Start a cooldown. Conditional set-if-newer: an existing longer
    /// cooldown is never shortened.
    pub async fn start_cooldown(
        &self,
        composite_key: &str,
        duration_seconds: u64,
    ) -> Result<(), RedisError> {
        let key = format!("cooldown:{}", composite_key);
        let current = self.store.ttl(&key).await?;
        if current >= duration_seconds as i64 {
            return Ok(());
        }
        self.store.set_ex(&key, "1", duration_seconds).await
    }
}
