pub mod settings;

pub use crate::intelligent::IntelligentCacheConfig;
pub use settings::{CacheSettings, LoggingSettings, RedisSettings};
