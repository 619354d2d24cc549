mod loader;
mod moderation;
mod types;

pub use loader::{load_from_path, parse, validate, MAX_SHIFT_LIMIT};
pub use moderation::{
    default_buckets, DurationBucket, EscalationConfig, GuardConfig, LimitPolicy, RateLimitConfig,
    ResourceLimit, VoteConfig,
};
pub use types::{CacheConfig, Config, LoggingConfig, PersistenceConfig, TelemetryConfig};
