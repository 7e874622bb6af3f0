use anyhow::Result;
use std::sync::Arc;

use crate::broadcast::BroadcastBus;
use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::security::{
    BurstProfiler, CompositeKeyGenerator, ContentModerator, IpReputation, RateLimiter,
    ShadowbanManager,
};
use crate::stats::StatsTracker;
use crate::storage::MessageStore;
use crate::store::RedisStore;

/// Shared application context. Cheap to clone; all fields are handles.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: RedisStore,
    pub keys: CompositeKeyGenerator,
    pub rate_limiter: RateLimiter,
    pub burst_profiler: BurstProfiler,
    pub shadowban: ShadowbanManager,
    pub reputation: IpReputation,
    pub moderator: ContentModerator,
    pub messages: MessageStore,
    pub bus: BroadcastBus,
    pub registry: Arc<ConnectionRegistry>,
    pub stats: StatsTracker,
    pub instance_id: String,
}

impl AppContext {
    pub async fn new(config: Config) -> Result<Self> {
        let store = RedisStore::connect(&config.redis_url).await?;

        let keys = CompositeKeyGenerator::new(config.server_secret.clone());
        let rate_limiter = RateLimiter::new(store.clone());
        let burst_profiler = BurstProfiler::new(store.clone());
        let shadowban = ShadowbanManager::new(store.clone());
        let reputation = IpReputation::new(store.clone());
        let moderator = ContentModerator::new(config.moderation_api_key.clone());
        let messages = MessageStore::new(store.clone(), reputation.clone());
        let stats = StatsTracker::new(store.clone());

        let instance_id = uuid::Uuid::new_v4().to_string();
        let bus = BroadcastBus::new(store.clone(), instance_id.clone());
        let registry = Arc::new(ConnectionRegistry::new());

        Ok(Self {
            config: Arc::new(config),
            store,
            keys,
            rate_limiter,
            burst_profiler,
            shadowban,
            reputation,
            moderator,
            messages,
            bus,
            registry,
            stats,
            instance_id,
        })
    }
}
