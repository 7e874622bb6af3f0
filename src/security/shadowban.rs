use redis::RedisError;

use crate::store::RedisStore;

/// A "permanent" ban is a very long TTL, so the key still expires eventually.
const PERMANENT_SECONDS: u64 = 315_360_000; // ~10 years
const VIOLATION_WINDOW_SECONDS: i64 = 86_400;
const VIOLATION_THRESHOLD: i64 = 3;
pub const AUTO_BAN_SECONDS: u64 = 86_400;

/// Ghost-ban manager.
///
/// Shadowbanned identities keep receiving 2xx responses but their messages
/// never reach the broadcast bus. The ban must stay invisible so abusers do
/// not rotate identities.
#[derive(Clone)]
pub struct ShadowbanManager {
    store: RedisStore,
}

impl ShadowbanManager {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    pub async fn is_shadowbanned(&self, composite_key: &str) -> Result<bool, RedisError> {
        let key = format!("shadowban:{}", composite_key);
        self.store.exists(&key).await
    }

    /// Shadowban an identity. `duration_seconds = None` means permanent.
    pub async fn shadowban(
        &self,
        composite_key: &str,
        reason: &str,
        duration_seconds: Option<u64>,
    ) -> Result<(), RedisError> {
        let key = format!("shadowban:{}", composite_key);
        let duration = duration_seconds.unwrap_or(PERMANENT_SECONDS);
        tracing::info!(
            composite_key = %composite_key,
            reason = %reason,
            duration_seconds = duration,
            "Shadowbanning identity"
        );
        self.store.set_ex(&key, reason, duration).await
    }

    /// Remove the ban and the violation counter.
    pub async fn clear(&self, composite_key: &str) -> Result<(), RedisError> {
        self.store
            .del(&format!("shadowban:{}", composite_key))
            .await?;
        self.store
            .del(&format!("violations:{}", composite_key))
            .await
    }

    /// Count one content violation against the identity.
    ///
    /// The counter lives for 24 hours from its first increment; reaching
    /// three violations inside that window auto-shadowbans for 24 hours.
    /// Returns (violation count, whether an auto-ban was applied).
    pub async fn record_violation(&self, composite_key: &str) -> Result<(i64, bool), RedisError> {
        let key = format!("violations:{}", composite_key);
        let count = self.store.incr(&key).await?;
        if count == 1 {
            self.store.expire(&key, VIOLATION_WINDOW_SECONDS).await?;
        }

        if count >= VIOLATION_THRESHOLD {
            self.shadowban(
                composite_key,
                &format!("{} content violations", count),
                Some(AUTO_BAN_SECONDS),
            )
            .await?;
            return Ok((count, true));
        }

        Ok((count, false))
    }
}
