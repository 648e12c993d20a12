// Durable Cache Layer
// Namespaced entry envelopes over a remote key/value store with compression, tag indexes and reconnection

use crate::utils::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

pub mod backends;
pub mod clock;
pub mod compression;
pub mod connection;
pub mod invalidation;
pub mod memory_cache;
pub mod metrics;
pub mod redis_cache;
pub mod store;


pub use backends::RedisStore;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use connection::{ConnectionState, ConnectionStatus, ReconnectPolicy};
pub use memory_cache::MemoryStore;
pub use metrics::{CacheStats, StatsSnapshot};
pub use redis_cache::{HealthReport, RedisCacheManager};
pub use store::StoreAdapter;

/// Envelope stored in the remote store for every cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Serialized payload, gzip-compressed when `compressed` is set
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Write time
    pub timestamp: DateTime<Utc>,
    /// Declared lifetime in seconds
    pub ttl: u64,
    /// Whether `data` is compressed
    pub compressed: bool,
    /// Stored payload size in bytes
    pub size: usize,
    /// Reads served from this entry
    pub access_count: u64,
    /// Last read time
    pub last_accessed: DateTime<Utc>,
    /// Tags the entry is indexed under
    #[serde(default)]
    pub tags: Vec<String>,
    /// Caller supplied priority
    #[serde(default)]
    pub priority: Priority,
}

impl CacheEntry {
    /// Logically expired once more than `ttl` seconds have passed since the write,
    /// regardless of what the store's own expiry says
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) > ChronoDuration::seconds(self.ttl as i64)
    }

    /// Seconds left before logical expiry, rounded up and never below one
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> u64 {
        let elapsed_ms = now
            .signed_duration_since(self.timestamp)
            .num_milliseconds()
            .max(0) as u64;
        let left_ms = (self.ttl * 1000).saturating_sub(elapsed_ms);
        ((left_ms + 999) / 1000).max(1)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Entry priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-call options for the cache manager
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheOptions {
    /// Lifetime in seconds; the configured default when absent or zero
    pub ttl: Option<u64>,
    /// Tags to index the entry under
    pub tags: Vec<String>,
    /// `Some(false)` skips compression for this write
    pub compress: Option<bool>,
    pub priority: Priority,
    /// Extra key segment between the namespace and the key
    pub namespace: Option<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Builds fully qualified store keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Logical key: `namespace:[sub:]key`
    pub fn logical_key(namespace: &str, key: &str, sub_namespace: Option<&str>) -> String {
        match sub_namespace {
            Some(sub) => format!("{}:{}:{}", namespace, sub, key),
            None => format!("{}:{}", namespace, key),
        }
    }

    /// Store key for an entry
    pub fn cache_key(&self, namespace: &str, key: &str, sub_namespace: Option<&str>) -> String {
        format!(
            "{}{}",
            self.prefix,
            Self::logical_key(namespace, key, sub_namespace)
        )
    }

    /// Store key of a tag index set
    pub fn tag_key(&self, namespace: &str, tag: &str) -> String {
        format!("{}tag:{}:{}", self.prefix, namespace, tag)
    }

    /// Glob for KEYS over one namespace
    pub fn pattern(&self, namespace: &str, pattern: &str) -> String {
        format!("{}{}:{}", self.prefix, namespace, pattern)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
