// Redis Cache Manager
// Namespaced get/set over the remote store with envelopes, compression, tag invalidation and statistics

use super::backends::RedisStore;
use super::clock::{system_clock, SharedClock};
use super::compression::PayloadCodec;
use super::connection::{ConnectionState, ConnectionStatus, ConnectionSupervisor};
use super::invalidation::{invalidate_pattern, TagIndex};
use super::metrics::{parse_server_info, CacheStats, StatsRecorder, StatsSnapshot};
use super::store::StoreAdapter;
use super::{CacheEntry, CacheOptions, KeyBuilder};
use crate::config::RedisSettings;
use crate::utils::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Result of a store health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// Round trip of the PING in milliseconds
    pub latency_ms: u64,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Outcome of reading one entry
enum Lookup<T> {
    Hit(T),
    Miss,
    /// Present in the store but past its declared lifetime; already removed
    Expired,
    /// Envelope or payload could not be decoded
    Corrupt(CacheError),
}

/// Durable cache over a remote key/value store.
///
/// Every value is wrapped in a [`CacheEntry`] envelope, optionally gzip
/// compressed, and written with a store-side expiry matching its TTL. Reads
/// additionally check the envelope timestamp so an entry never outlives its
/// declared TTL even when the store's expiry lags.
///
/// Store failures never surface to callers: reads degrade to misses and
/// writes to `false`/`0`, while the connection supervisor reconnects in the
/// background.
pub struct RedisCacheManager {
    store: Arc<dyn StoreAdapter>,
    connection: Arc<ConnectionSupervisor>,
    settings: RedisSettings,
    keys: KeyBuilder,
    codec: PayloadCodec,
    stats: Arc<RwLock<StatsRecorder>>,
    clock: SharedClock,
}

impl RedisCacheManager {
    /// Create a manager over an existing store adapter. Call [`connect`](Self::connect) before use.
    pub fn new(settings: RedisSettings, store: Arc<dyn StoreAdapter>) -> Self {
        Self::with_clock(settings, store, system_clock())
    }

    /// Create a manager with an explicit time source
    pub fn with_clock(
        settings: RedisSettings,
        store: Arc<dyn StoreAdapter>,
        clock: SharedClock,
    ) -> Self {
        let connection = Arc::new(ConnectionSupervisor::new(Arc::clone(&store), &settings));
        Self {
            keys: KeyBuilder::new(settings.key_prefix.clone()),
            codec: PayloadCodec::new(settings.enable_compression, settings.compression_threshold),
            store,
            connection,
            settings,
            stats: Arc::new(RwLock::new(StatsRecorder::new())),
            clock,
        }
    }

    /// Build a Redis-backed manager from settings and connect.
    ///
    /// A failed initial connection is not an error: the manager starts in a
    /// degraded state and keeps reconnecting in the background.
    pub async fn from_settings(settings: RedisSettings) -> Result<Self> {
        settings.validate()?;
        let store: Arc<dyn StoreAdapter> = Arc::new(RedisStore::new(&settings)?);
        let manager = Self::new(settings, store);
        if !manager.connect().await {
            warn!("Cache manager started without a store connection");
        }
        Ok(manager)
    }

    /// Ping the store and mark the manager connected
    pub async fn connect(&self) -> bool {
        self.connection.connect().await
    }

    /// Reset the reconnect budget and try to connect immediately
    pub async fn reconnect_now(&self) -> bool {
        self.connection.reconnect_now().await
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_available()
    }

    pub fn settings(&self) -> &RedisSettings {
        &self.settings
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    /// Read a value. Misses, expired or corrupt entries and store failures all yield `None`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        options: &CacheOptions,
    ) -> Option<T> {
        if !self.ready() {
            self.stats.write().await.record_miss();
            return None;
        }

        let cache_key = self.cache_key(namespace, key, options);
        match self.run("get", self.fetch::<T>(&cache_key)).await {
            Ok(Lookup::Hit(value)) => {
                self.stats.write().await.record_hit();
                debug!("Cache hit: {}", cache_key);
                Some(value)
            }
            Ok(Lookup::Miss) => {
                self.stats.write().await.record_miss();
                debug!("Cache miss: {}", cache_key);
                None
            }
            Ok(Lookup::Expired) => {
                let mut stats = self.stats.write().await;
                stats.record_miss();
                stats.record_eviction();
                debug!("Cache entry expired: {}", cache_key);
                None
            }
            Ok(Lookup::Corrupt(reason)) => {
                warn!("Evicting undecodable entry {}: {}", cache_key, reason);
                let evicted = self
                    .run("get", self.store.del(std::slice::from_ref(&cache_key)))
                    .await;
                let mut stats = self.stats.write().await;
                stats.record_miss();
                match evicted {
                    Ok(_) => stats.record_eviction(),
                    Err(_) => stats.record_error(),
                }
                None
            }
            Err(e) => {
                error!("Cache get error for {}: {}", cache_key, e);
                let mut stats = self.stats.write().await;
                stats.record_miss();
                if !matches!(e, CacheError::Timeout { .. }) {
                    stats.record_error();
                }
                None
            }
        }
    }

    /// Read the raw envelope without touching access metadata or hit counters
    pub async fn inspect(
        &self,
        namespace: &str,
        key: &str,
        options: &CacheOptions,
    ) -> Option<CacheEntry> {
        if !self.ready() {
            return None;
        }
        let cache_key = self.cache_key(namespace, key, options);
        match self.run("inspect", self.store.get(&cache_key)).await {
            Ok(Some(raw)) => CacheEntry::decode(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!("Inspect failed for {}: {}", cache_key, e);
                None
            }
        }
    }

    /// Write a value, indexing it under any tags in `options`
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        data: &T,
        options: &CacheOptions,
    ) -> bool {
        if !self.ready() {
            return false;
        }

        let cache_key = self.cache_key(namespace, key, options);
        let ttl = self.ttl_for(options);
        let (entry, original_size) = match self.build_entry(data, ttl, options) {
            Ok(built) => built,
            Err(e) => {
                error!("Failed to encode cache value for {}: {}", cache_key, e);
                self.stats.write().await.record_error();
                return false;
            }
        };

        let result = self
            .run("set", async {
                self.store.set_ex(&cache_key, ttl, &entry.encode()?).await?;
                if !entry.tags.is_empty() {
                    self.tag_index()
                        .add(namespace, &cache_key, &entry.tags)
                        .await?;
                }
                Ok::<_, CacheError>(())
            })
            .await;

        match result {
            Ok(()) => {
                let mut stats = self.stats.write().await;
                stats.record_sets(1);
                if entry.compressed {
                    stats.record_compression(original_size, entry.size);
                }
                debug!(
                    "Cache set: {} ({} bytes, ttl {}s, compressed: {})",
                    cache_key, entry.size, ttl, entry.compressed
                );
                true
            }
            Err(e) => {
                error!("Cache set error for {}: {}", cache_key, e);
                self.stats.write().await.record_error();
                false
            }
        }
    }

    /// Remove one entry. True when a key was actually removed.
    pub async fn delete(&self, namespace: &str, key: &str, options: &CacheOptions) -> bool {
        if !self.ready() {
            return false;
        }

        let cache_key = self.cache_key(namespace, key, options);
        match self
            .run("delete", self.store.del(std::slice::from_ref(&cache_key)))
            .await
        {
            Ok(removed) => {
                self.stats.write().await.record_deletes(removed);
                debug!("Cache delete: {} (removed: {})", cache_key, removed);
                removed > 0
            }
            Err(e) => {
                error!("Cache delete error for {}: {}", cache_key, e);
                self.stats.write().await.record_error();
                false
            }
        }
    }

    /// Remove every entry of `namespace` whose key matches a glob pattern
    pub async fn delete_by_pattern(&self, namespace: &str, pattern: &str) -> u64 {
        if !self.ready() {
            return 0;
        }

        let result = self
            .run(
                "delete_by_pattern",
                invalidate_pattern(self.store.as_ref(), &self.keys, namespace, pattern),
            )
            .await;
        self.count_deletes("delete_by_pattern", result).await
    }

    /// Remove every entry indexed under any of `tags`, then the tag indexes
    pub async fn delete_by_tags(&self, namespace: &str, tags: &[String]) -> u64 {
        if !self.ready() || tags.is_empty() {
            return 0;
        }

        let result = self
            .run("delete_by_tags", async {
                self.tag_index().invalidate(namespace, tags).await
            })
            .await;
        self.count_deletes("delete_by_tags", result).await
    }

    /// Whether the store holds the key. Does not check logical expiry.
    pub async fn exists(&self, namespace: &str, key: &str, options: &CacheOptions) -> bool {
        if !self.ready() {
            return false;
        }

        let cache_key = self.cache_key(namespace, key, options);
        match self.run("exists", self.store.exists(&cache_key)).await {
            Ok(found) => found,
            Err(e) => {
                error!("Cache exists error for {}: {}", cache_key, e);
                self.stats.write().await.record_error();
                false
            }
        }
    }

    /// Read several keys at once; the result is positionally aligned with `keys`
    pub async fn mget<T, K>(&self, namespace: &str, keys: &[K], options: &CacheOptions) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        if keys.is_empty() {
            return Vec::new();
        }
        if !self.ready() {
            let mut stats = self.stats.write().await;
            for _ in keys {
                stats.record_miss();
            }
            return keys.iter().map(|_| None).collect();
        }

        let cache_keys: Vec<String> = keys
            .iter()
            .map(|k| self.cache_key(namespace, k.as_ref(), options))
            .collect();

        let raw = match self.run("mget", self.store.mget(&cache_keys)).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Cache mget error in {}: {}", namespace, e);
                let mut stats = self.stats.write().await;
                stats.record_error();
                for _ in keys {
                    stats.record_miss();
                }
                return keys.iter().map(|_| None).collect();
            }
        };

        let now = self.clock.now();
        let mut results = Vec::with_capacity(raw.len());
        let mut unusable = Vec::new();
        for (cache_key, slot) in cache_keys.iter().zip(raw) {
            let value = slot.and_then(|bytes| match self.decode_entry::<T>(&bytes) {
                Ok((entry, _)) if entry.is_expired(now) => {
                    debug!("Cache entry expired: {}", cache_key);
                    unusable.push(cache_key.clone());
                    None
                }
                Ok((_, value)) => Some(value),
                Err(e) => {
                    warn!("Evicting undecodable entry {}: {}", cache_key, e);
                    unusable.push(cache_key.clone());
                    None
                }
            });
            results.push(value);
        }

        let evicted = if unusable.is_empty() {
            Ok(0)
        } else {
            self.run("mget", self.store.del(&unusable)).await
        };

        let mut stats = self.stats.write().await;
        for value in &results {
            if value.is_some() {
                stats.record_hit();
            } else {
                stats.record_miss();
            }
        }
        match evicted {
            Ok(_) => {
                for _ in &unusable {
                    stats.record_eviction();
                }
            }
            Err(e) => {
                error!("Failed to evict unusable entries in {}: {}", namespace, e);
                stats.record_error();
            }
        }
        results
    }

    /// Write several entries in one pipelined batch sharing the same options
    pub async fn mset<K, T>(&self, namespace: &str, entries: &[(K, T)], options: &CacheOptions) -> bool
    where
        K: AsRef<str>,
        T: Serialize,
    {
        if !self.ready() {
            return false;
        }
        if entries.is_empty() {
            return true;
        }

        let ttl = self.ttl_for(options);
        let mut batch = Vec::with_capacity(entries.len());
        let mut compressed = Vec::new();
        for (key, data) in entries {
            let cache_key = self.cache_key(namespace, key.as_ref(), options);
            let encoded = self
                .build_entry(data, ttl, options)
                .and_then(|(entry, original)| Ok((entry.encode()?, entry, original)));
            match encoded {
                Ok((bytes, entry, original)) => {
                    if entry.compressed {
                        compressed.push((original, entry.size));
                    }
                    batch.push((cache_key, bytes));
                }
                Err(e) => {
                    error!("Failed to encode cache value for {}: {}", cache_key, e);
                    self.stats.write().await.record_error();
                    return false;
                }
            }
        }

        let result = self
            .run("mset", async {
                self.store.set_ex_batch(&batch, ttl).await?;
                if !options.tags.is_empty() {
                    let index = self.tag_index();
                    for (cache_key, _) in &batch {
                        index.add(namespace, cache_key, &options.tags).await?;
                    }
                }
                Ok::<_, CacheError>(())
            })
            .await;

        match result {
            Ok(()) => {
                let mut stats = self.stats.write().await;
                stats.record_sets(batch.len() as u64);
                for (original, stored) in compressed {
                    stats.record_compression(original, stored);
                }
                debug!("Cache mset: {} entries in {}", batch.len(), namespace);
                true
            }
            Err(e) => {
                error!("Cache mset error in {}: {}", namespace, e);
                self.stats.write().await.record_error();
                false
            }
        }
    }

    /// Atomically add `delta` to a counter, setting the TTL when `options.ttl` is given.
    /// Returns the new value, or 0 on failure.
    pub async fn increment(
        &self,
        namespace: &str,
        key: &str,
        delta: i64,
        options: &CacheOptions,
    ) -> i64 {
        if !self.ready() {
            return 0;
        }

        let cache_key = self.cache_key(namespace, key, options);
        let ttl = options.ttl.filter(|ttl| *ttl > 0);
        let result = self
            .run("increment", async {
                let value = self.store.incr_by(&cache_key, delta).await?;
                if let Some(ttl) = ttl {
                    self.store.expire(&cache_key, ttl).await?;
                }
                Ok::<_, CacheError>(value)
            })
            .await;

        match result {
            Ok(value) => value,
            Err(e) => {
                error!("Cache increment error for {}: {}", cache_key, e);
                self.stats.write().await.record_error();
                0
            }
        }
    }

    /// Change the store-side expiry of a key. True when the key existed.
    pub async fn expire(&self, namespace: &str, key: &str, ttl: u64, options: &CacheOptions) -> bool {
        if !self.ready() {
            return false;
        }

        let cache_key = self.cache_key(namespace, key, options);
        match self.run("expire", self.store.expire(&cache_key, ttl)).await {
            Ok(existed) => existed,
            Err(e) => {
                error!("Cache expire error for {}: {}", cache_key, e);
                self.stats.write().await.record_error();
                false
            }
        }
    }

    /// Counters merged with live memory usage and key count from the store
    pub async fn get_stats(&self) -> StatsSnapshot {
        let mut stats: CacheStats = self.stats.read().await.stats();
        let mut server_info = None;

        if self.ready() {
            match self
                .run("stats", async {
                    let info = self.store.info("memory").await?;
                    let key_count = self.store.dbsize().await?;
                    Ok::<_, CacheError>((info, key_count))
                })
                .await
            {
                Ok((info, key_count)) => {
                    let parsed = parse_server_info(&info);
                    if let Some(used) = parsed.get("used_memory").and_then(|v| v.parse().ok()) {
                        stats.memory_usage = used;
                    }
                    stats.key_count = key_count;
                    server_info = Some(parsed);
                }
                Err(e) => warn!("Failed to collect store statistics: {}", e),
            }
        }

        StatsSnapshot {
            hit_ratio: stats.hit_ratio(),
            stats,
            server_info,
            collected_at: self.clock.now(),
        }
    }

    /// Reset local counters
    pub async fn reset_stats(&self) {
        self.stats.write().await.reset();
    }

    /// Check the store with a PING
    pub async fn health_check(&self) -> HealthReport {
        let start = Instant::now();
        let result = self.run("health_check", self.store.ping()).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        let status = self.connection_status();

        match result {
            Ok(()) => {
                if matches!(
                    status,
                    ConnectionStatus::Disconnected | ConnectionStatus::Unavailable
                ) {
                    // Store answers again before the reconnect loop noticed
                    self.connection.connect().await;
                }
                HealthReport {
                    healthy: true,
                    latency_ms,
                    status: self.connection_status(),
                    error: None,
                    checked_at: self.clock.now(),
                }
            }
            Err(e) => HealthReport {
                healthy: false,
                latency_ms,
                status,
                error: Some(e.to_string()),
                checked_at: self.clock.now(),
            },
        }
    }

    /// Drop every key in the selected database and reset local counters
    pub async fn clear(&self) -> bool {
        if !self.ready() {
            return false;
        }

        match self.run("clear", self.store.flushdb()).await {
            Ok(()) => {
                self.stats.write().await.reset();
                info!("Cache cleared");
                true
            }
            Err(e) => {
                error!("Cache clear error: {}", e);
                self.stats.write().await.record_error();
                false
            }
        }
    }

    /// Stop reconnecting and release the store connection
    pub async fn close(&self) {
        self.connection.close().await;
        info!("Cache manager closed");
    }

    /// Whether commands can be sent now. A manager that has not connected yet
    /// starts connecting in the background on first use.
    fn ready(&self) -> bool {
        if self.connection.is_available() {
            return true;
        }
        self.connection.ensure_connecting();
        false
    }

    fn cache_key(&self, namespace: &str, key: &str, options: &CacheOptions) -> String {
        self.keys
            .cache_key(namespace, key, options.namespace.as_deref())
    }

    fn ttl_for(&self, options: &CacheOptions) -> u64 {
        options
            .ttl
            .filter(|ttl| *ttl > 0)
            .unwrap_or(self.settings.default_ttl)
    }

    fn tag_index(&self) -> TagIndex<'_> {
        TagIndex::new(self.store.as_ref(), &self.keys, self.settings.default_ttl)
    }

    fn build_entry<T: Serialize + ?Sized>(
        &self,
        data: &T,
        ttl: u64,
        options: &CacheOptions,
    ) -> Result<(CacheEntry, usize)> {
        let raw = serde_json::to_vec(data)?;
        let payload = self.codec.encode(raw, options.compress);
        let now = self.clock.now();

        let mut tags = Vec::with_capacity(options.tags.len());
        for tag in &options.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let entry = CacheEntry {
            size: payload.bytes.len(),
            data: payload.bytes,
            timestamp: now,
            ttl,
            compressed: payload.compressed,
            access_count: 0,
            last_accessed: now,
            tags,
            priority: options.priority,
        };
        Ok((entry, payload.original_size))
    }

    /// Decode envelope and payload. Any failure here means the stored bytes are unusable.
    fn decode_entry<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<(CacheEntry, T)> {
        let entry = CacheEntry::decode(raw)?;
        let payload = self.codec.decode(&entry.data, entry.compressed)?;
        let value = serde_json::from_slice(&payload)?;
        Ok((entry, value))
    }

    async fn fetch<T: DeserializeOwned>(&self, cache_key: &str) -> Result<Lookup<T>> {
        let Some(raw) = self.store.get(cache_key).await? else {
            return Ok(Lookup::Miss);
        };

        let (mut entry, value) = match self.decode_entry::<T>(&raw) {
            Ok(decoded) => decoded,
            Err(e) => return Ok(Lookup::Corrupt(e)),
        };

        let now = self.clock.now();
        if entry.is_expired(now) {
            self.store.del(&[cache_key.to_string()]).await?;
            return Ok(Lookup::Expired);
        }

        entry.access_count += 1;
        entry.last_accessed = now;
        let remaining = entry.remaining_ttl(now);
        // Only write back over the exact bytes read, never over a concurrent delete or set
        match self
            .store
            .replace_if_unchanged(cache_key, &raw, remaining, &entry.encode()?)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Entry {} changed during read, access metadata skipped", cache_key),
            Err(e) => {
                // The value is still good; only the access metadata is lost
                warn!("Failed to update access metadata for {}: {}", cache_key, e);
                if e.is_connectivity() {
                    self.connection.connection_lost(&e.to_string());
                }
            }
        }

        Ok(Lookup::Hit(value))
    }

    async fn count_deletes(&self, operation: &str, result: Result<u64>) -> u64 {
        match result {
            Ok(removed) => {
                self.stats.write().await.record_deletes(removed);
                removed
            }
            Err(e) => {
                error!("Cache {} error: {}", operation, e);
                self.stats.write().await.record_error();
                0
            }
        }
    }

    /// Run one logical operation under the command timeout, recording latency
    /// and reporting connectivity failures to the supervisor
    async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.settings.command_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::timeout(operation)),
        };
        self.stats
            .write()
            .await
            .record_response_time(start.elapsed());

        if let Err(e) = &result {
            if e.is_connectivity() {
                self.connection.connection_lost(&e.to_string());
            }
        }
        result
    }
}
