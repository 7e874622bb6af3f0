pub mod burst_profiler;
pub mod identity;
pub mod ip_reputation;
pub mod moderation;
pub mod pipeline;
pub mod rate_limiter;
pub mod shadowban;

pub use burst_profiler::BurstProfiler;
pub use identity::CompositeKeyGenerator;
pub use ip_reputation::IpReputation;
pub use moderation::ContentModerator;
pub use rate_limiter::RateLimiter;
pub use shadowban::ShadowbanManager;
