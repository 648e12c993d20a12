//! # Predictive Cache
//!
//! A two-layer caching system for Rust services backed by Redis.
//!
//! ## Features
//!
//! - **Durable Cache Manager**: namespaced entries wrapped in timestamped envelopes,
//!   size-aware gzip compression, tag-based bulk invalidation and pattern deletion
//! - **Resilient Connections**: request-level timeouts and background reconnection
//!   with linear backoff; a degraded store turns into misses, never errors
//! - **Intelligent Layer**: per-user access tracking, weighted prediction strategies,
//!   prefetch and warmup signals, adaptive TTLs from observed access rhythm
//! - **Pluggable Stores**: Redis standalone or cluster, or an in-memory store for
//!   tests and local development
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use predictive_cache::{CacheSettings, GetOptions, IntelligentCache, RedisCacheManager, SetOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = CacheSettings::from_env()?;
//!     let manager = Arc::new(RedisCacheManager::from_settings(settings.redis).await?);
//!     let cache = IntelligentCache::new(manager, settings.intelligent)?;
//!     cache.start().await;
//!
//!     cache
//!         .set("tracks", "t1", &serde_json::json!({"title": "So What"}), &SetOptions::new())
//!         .await;
//!     let track: Option<serde_json::Value> = cache
//!         .get("tracks", "t1", &GetOptions::for_user("u1").in_session("s1"))
//!         .await;
//!     println!("{:?}", track);
//!
//!     cache.stop().await;
//!     Ok(())
//! }
//! ```

pub mod caching;
pub mod config;
pub mod intelligent;
pub mod utils;

// Re-export main types for convenience
pub use caching::{
    CacheEntry, CacheOptions, CacheStats, ConnectionStatus, HealthReport, MemoryStore, Priority,
    RedisCacheManager, RedisStore, StatsSnapshot, StoreAdapter,
};
pub use config::{CacheSettings, LoggingSettings, RedisSettings};
pub use intelligent::{
    CachePrediction, CacheReport, GetOptions, IntelligentCache, IntelligentCacheConfig,
    IntelligentMetrics, PrefetchSignal, SetOptions,
};
pub use utils::error::{CacheError, Result};

/// Initialize the cache system with default logging
pub fn init() -> Result<()> {
    utils::logging::init_logging()
}

/// Initialize the cache system with custom logging configuration
pub fn init_with_logging(level: tracing::Level) -> Result<()> {
    utils::logging::init_logging_with_level(level)
}
