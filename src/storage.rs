use redis::RedisError;

use crate::models::{ChatMessage, StoredMessage};
use crate::security::ip_reputation::IpReputation;
use crate::store::RedisStore;

/// Messages vanish after 48 hours.
pub const MESSAGE_TTL_SECONDS: u64 = 172_800;
/// Upper bound on ids kept per city index.
const CITY_INDEX_CAP: isize = 500;
/// Default feed page size.
pub const DEFAULT_FEED_LIMIT: usize = 100;

/// Outcome of a phone lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum PhoneLookup {
    Phone(String),
    /// The message exists but was posted without a phone.
    NoContact,
    NotFound,
}

/// City index keys are case-insensitive so "Bangalore" and "bangalore"
/// share one board.
pub fn city_key(city: &str) -> String {
    city.trim().to_lowercase()
}

/// Message persistence: `msg:<id>` records with TTL, a capped newest-first
/// id list per city, and the phone stored under its own key for lazy reveal.
#[derive(Clone)]
pub struct MessageStore {
    store: RedisStore,
    reputation: IpReputation,
}

impl MessageStore {
    pub fn new(store: RedisStore, reputation: IpReputation) -> Self {
        Self { store, reputation }
    }

    pub async fn put(
        &self,
        stored: &StoredMessage,
        phone: Option<&str>,
    ) -> Result<(), RedisError> {
        let record = serde_json::to_string(stored).map_err(serde_to_redis_err)?;
        let id = &stored.message.id;

        self.store
            .set_ex(&format!("msg:{}", id), &record, MESSAGE_TTL_SECONDS)
            .await?;

        let index = format!("city:{}", city_key(&stored.message.location));
        self.store.lpush(&index, id).await?;
        self.store.ltrim(&index, 0, CITY_INDEX_CAP - 1).await?;
        self.store.expire(&index, MESSAGE_TTL_SECONDS as i64).await?;

        if let Some(phone) = phone {
            self.store
                .set_ex(&format!("phone:{}", id), phone, MESSAGE_TTL_SECONDS)
                .await?;
        }

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredMessage>, RedisError> {
        let raw = self.store.get(&format!("msg:{}", id)).await?;
        Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
    }

    /// Newest-first feed for a city.
    ///
    /// Ids whose record expired are skipped, as are messages shadow-hidden
    /// by distinct reports. Over-fetches the index because of those gaps.
    pub async fn get_by_city(
        &self,
        city: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RedisError> {
        let index = format!("city:{}", city_key(city));
        let fetch = (limit * 2).max(limit + 16) as isize;
        let ids = self.store.lrange(&index, 0, fetch - 1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| format!("msg:{}", id)).collect();
        let records = self.store.mget(&keys).await?;

        let mut messages = Vec::with_capacity(limit);
        for (id, raw) in ids.iter().zip(records) {
            let Some(json) = raw else { continue };
            let Ok(stored) = serde_json::from_str::<StoredMessage>(&json) else {
                tracing::warn!(message_id = %id, "Dropping unparsable stored message");
                continue;
            };
            if self.reputation.is_message_hidden(id).await? {
                continue;
            }
            messages.push(stored.message);
            if messages.len() >= limit {
                break;
            }
        }

        Ok(messages)
    }

    pub async fn get_phone(&self, id: &str) -> Result<PhoneLookup, RedisError> {
        if let Some(phone) = self.store.get(&format!("phone:{}", id)).await? {
            return Ok(PhoneLookup::Phone(phone));
        }
        if self.store.exists(&format!("msg:{}", id)).await? {
            return Ok(PhoneLookup::NoContact);
        }
        Ok(PhoneLookup::NotFound)
    }
}

fn serde_to_redis_err(e: serde_json::Error) -> RedisError {
    RedisError::from((
        redis::ErrorKind::TypeError,
        "message serialization failed",
        e.to_string(),
    ))
}
