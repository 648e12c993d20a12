// Intelligent Cache
// Predictive layer over the cache manager: access tracking, scored predictions, prefetch signals and adaptive TTLs

use crate::caching::{
    CacheOptions, HealthReport, Priority, RedisCacheManager, SharedClock, StatsSnapshot,
};
use crate::utils::error::{CacheError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub mod patterns;
pub mod policies;
pub mod predictions;
pub mod scheduler;
pub mod strategies;

#[cfg(test)]
mod tests;

pub use patterns::{AccessPattern, AccessTracker, TrackedKey};
pub use predictions::{CachePrediction, PrefetchSignal, SignalReason};
pub use strategies::{default_strategies, CacheStrategy, StrategyKind};

use predictions::{PendingPredictions, PredictionSet};
use scheduler::BackgroundTasks;

/// Related keys must have at least this user overlap with the key just read
pub const RELATED_SIMILARITY: f64 = 0.7;
/// Upper bound on related keys considered per read
pub const MAX_RELATED_KEYS: usize = 10;
/// Related keys above this probability are prefetched
pub const PREFETCH_PROBABILITY: f64 = 0.8;
/// Warmup candidates above this probability are prefetched
pub const WARMUP_PROBABILITY: f64 = 0.9;
/// Predictions considered per warmup sweep
pub const WARMUP_BATCH: usize = 50;
/// Predictions included in a report
pub const REPORT_TOP_PREDICTIONS: usize = 20;

const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// Intelligent cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligentCacheConfig {
    /// Run prediction refresh and emit prefetch signals
    pub enable_predictive_caching: bool,
    /// Record access patterns on reads carrying a user context
    pub enable_access_pattern_analysis: bool,
    /// Track which keys each session visits
    pub enable_user_behavior_tracking: bool,
    /// Maximum number of retained predictions
    pub max_prediction_cache_size: usize,
    /// Minimum probability for a prediction to survive a refresh
    pub prediction_accuracy_threshold: f64,
    /// Run the periodic warmup sweep
    pub cache_warmup_enabled: bool,
    /// Scoring rules
    pub strategies: Vec<CacheStrategy>,
    /// Seconds between prediction refreshes
    pub refresh_interval_secs: u64,
    /// Seconds between warmup sweeps
    pub warmup_interval_secs: u64,
    /// A read within this many seconds of a prefetch signal confirms it
    pub prediction_window_secs: u64,
    /// Access patterns idle for longer than this are dropped
    pub pattern_retention_secs: u64,
    /// Access timestamps kept per key
    pub max_access_history: usize,
}

impl Default for IntelligentCacheConfig {
    fn default() -> Self {
        Self {
            enable_predictive_caching: true,
            enable_access_pattern_analysis: true,
            enable_user_behavior_tracking: true,
            max_prediction_cache_size: 1000,
            prediction_accuracy_threshold: 0.7,
            cache_warmup_enabled: true,
            strategies: default_strategies(),
            refresh_interval_secs: 30,
            warmup_interval_secs: 300,
            prediction_window_secs: 600,
            pattern_retention_secs: 86_400,
            max_access_history: 100,
        }
    }
}

impl IntelligentCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.prediction_accuracy_threshold) {
            return Err(CacheError::config(format!(
                "prediction_accuracy_threshold must be within [0, 1], got {}",
                self.prediction_accuracy_threshold
            )));
        }
        if self.max_prediction_cache_size == 0 {
            return Err(CacheError::config("max_prediction_cache_size must be positive"));
        }
        if self.strategies.is_empty() {
            return Err(CacheError::config("At least one strategy is required"));
        }
        if let Some(bad) = self
            .strategies
            .iter()
            .find(|s| !s.weight.is_finite() || s.weight < 0.0)
        {
            return Err(CacheError::config(format!(
                "Strategy {:?} has invalid weight {}",
                bad.name, bad.weight
            )));
        }
        if !self.strategies.iter().any(|s| s.enabled && s.weight > 0.0) {
            return Err(CacheError::config(
                "At least one enabled strategy needs a positive weight",
            ));
        }
        if self.refresh_interval_secs == 0 || self.warmup_interval_secs == 0 {
            return Err(CacheError::config("Background intervals must be positive"));
        }
        if self.max_access_history < 2 {
            return Err(CacheError::config("max_access_history must be at least 2"));
        }
        Ok(())
    }
}

/// Options for [`IntelligentCache::get`]
#[derive(Debug, Clone, PartialEq)]
pub struct GetOptions {
    pub user_context: Option<String>,
    pub session_id: Option<String>,
    /// Emit prefetch signals for related keys on a hit
    pub enable_prediction: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            user_context: None,
            session_id: None,
            enable_prediction: true,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user<S: Into<String>>(user_context: S) -> Self {
        Self {
            user_context: Some(user_context.into()),
            ..Self::default()
        }
    }

    pub fn in_session<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn without_prediction(mut self) -> Self {
        self.enable_prediction = false;
        self
    }
}

/// Options for [`IntelligentCache::set`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    pub user_context: Option<String>,
    /// Explicit TTL; adaptive when absent or zero
    pub ttl: Option<u64>,
    pub priority: Priority,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user<S: Into<String>>(user_context: S) -> Self {
        Self {
            user_context: Some(user_context.into()),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Request and prediction counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntelligentMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    /// Prefetch signals issued
    pub predictions: u64,
    /// Signals followed by a real read of the key within the prediction window
    pub successful_predictions: u64,
    pub hit_rate: f64,
    pub prediction_accuracy: f64,
}

impl IntelligentMetrics {
    fn with_rates(mut self) -> Self {
        self.hit_rate = ratio(self.cache_hits, self.total_requests);
        self.prediction_accuracy = ratio(self.successful_predictions, self.predictions);
        self
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64
    } else {
        0.0
    }
}

/// Combined view for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    pub stats: StatsSnapshot,
    pub health: HealthReport,
    pub metrics: IntelligentMetrics,
    pub top_predictions: Vec<CachePrediction>,
    pub total_predictions: usize,
    pub tracked_keys: usize,
    pub active_sessions: usize,
    pub generated_at: DateTime<Utc>,
}

/// In-process prediction state, guarded as one unit
struct PredictionEngine {
    tracker: AccessTracker,
    predictions: PredictionSet,
    pending: PendingPredictions,
}

/// Score one tracked key with the configured strategies
fn predict(
    tracker: &AccessTracker,
    key: &TrackedKey,
    strategies: &[CacheStrategy],
    now: DateTime<Utc>,
) -> Option<CachePrediction> {
    let activity = tracker.activity(key)?;
    let probability = strategies::combined_score(strategies, tracker, key, activity, now);
    let intervals = activity.intervals();

    Some(CachePrediction {
        namespace: key.namespace.clone(),
        key: key.key.clone(),
        probability,
        priority: probability * 100.0,
        estimated_next_access: now + policies::estimate_next_access(&intervals),
        estimated_data_size: policies::estimate_data_size(&key.key, activity.last_size),
    })
}

/// Predictive cache service.
///
/// Cheap to clone; clones share state. Background refresh and warmup run
/// only between [`start`](Self::start) and [`stop`](Self::stop), and the
/// running tasks keep the service alive until stopped.
#[derive(Clone)]
pub struct IntelligentCache {
    cache: Arc<RedisCacheManager>,
    config: Arc<IntelligentCacheConfig>,
    engine: Arc<RwLock<PredictionEngine>>,
    metrics: Arc<RwLock<IntelligentMetrics>>,
    signals: broadcast::Sender<PrefetchSignal>,
    tasks: Arc<Mutex<Option<BackgroundTasks>>>,
    clock: SharedClock,
}

impl IntelligentCache {
    pub fn new(cache: Arc<RedisCacheManager>, config: IntelligentCacheConfig) -> Result<Self> {
        config.validate()?;
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let engine = PredictionEngine {
            tracker: AccessTracker::new(config.max_access_history),
            predictions: PredictionSet::new(config.max_prediction_cache_size),
            pending: PendingPredictions::new(),
        };

        Ok(Self {
            clock: cache.clock(),
            cache,
            config: Arc::new(config),
            engine: Arc::new(RwLock::new(engine)),
            metrics: Arc::new(RwLock::new(IntelligentMetrics::default())),
            signals,
            tasks: Arc::new(Mutex::new(None)),
        })
    }

    pub fn manager(&self) -> &Arc<RedisCacheManager> {
        &self.cache
    }

    pub fn config(&self) -> &IntelligentCacheConfig {
        &self.config
    }

    /// Receive prefetch and warmup signals. Loading the data is up to the subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<PrefetchSignal> {
        self.signals.subscribe()
    }

    /// Read through the cache, recording the access
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        options: &GetOptions,
    ) -> Option<T> {
        self.lookup(namespace, key, options).await
    }

    /// Read through the cache and on a miss load the value with `loader`,
    /// caching it with an adaptive TTL. Loader failures are logged and
    /// yield `None`.
    pub async fn get_or_load<T, F, Fut, E>(
        &self,
        namespace: &str,
        key: &str,
        options: &GetOptions,
        loader: F,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        if let Some(cached) = self.lookup(namespace, key, options).await {
            return Some(cached);
        }

        let tracked = TrackedKey::new(namespace, key);
        match loader().await {
            Ok(data) => {
                let ttl = self.optimal_ttl(namespace, key).await;
                let cache_options = CacheOptions::new().with_ttl(ttl).with_tags(
                    policies::generate_tags(namespace, key, options.user_context.as_deref()),
                );
                if self.cache.set(namespace, key, &data, &cache_options).await {
                    self.record_written_size(&tracked, &data).await;
                } else {
                    warn!("Loaded value for {} could not be cached", tracked);
                }
                Some(data)
            }
            Err(e) => {
                error!("Fallback data loading failed for {}: {}", tracked, e);
                None
            }
        }
    }

    /// Write through the cache with generated tags and an explicit or
    /// adaptive TTL, then rescore the key
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        data: &T,
        options: &SetOptions,
    ) -> bool {
        let tracked = TrackedKey::new(namespace, key);
        let ttl = match options.ttl.filter(|ttl| *ttl > 0) {
            Some(ttl) => ttl,
            None => self.optimal_ttl(namespace, key).await,
        };
        let cache_options = CacheOptions::new()
            .with_ttl(ttl)
            .with_tags(policies::generate_tags(
                namespace,
                key,
                options.user_context.as_deref(),
            ))
            .with_priority(options.priority);

        let stored = self.cache.set(namespace, key, data, &cache_options).await;
        if stored {
            self.record_written_size(&tracked, data).await;
            if self.config.enable_predictive_caching {
                let now = self.clock.now();
                let mut engine = self.engine.write().await;
                if let Some(prediction) =
                    predict(&engine.tracker, &tracked, &self.config.strategies, now)
                {
                    engine.predictions.upsert(prediction);
                }
            }
        }
        stored
    }

    /// Adaptive TTL for a key from its observed read intervals
    pub async fn optimal_ttl(&self, namespace: &str, key: &str) -> u64 {
        let engine = self.engine.read().await;
        let intervals = engine
            .tracker
            .activity(&TrackedKey::new(namespace, key))
            .map(|a| a.intervals())
            .unwrap_or_default();
        policies::optimal_ttl(&intervals)
    }

    /// Score a key now without touching the retained predictions
    pub async fn calculate_prediction(&self, namespace: &str, key: &str) -> Option<CachePrediction> {
        let engine = self.engine.read().await;
        predict(
            &engine.tracker,
            &TrackedKey::new(namespace, key),
            &self.config.strategies,
            self.clock.now(),
        )
    }

    /// Recorded per-user patterns for a key
    pub async fn access_patterns(&self, namespace: &str, key: &str) -> Vec<AccessPattern> {
        let engine = self.engine.read().await;
        engine
            .tracker
            .activity(&TrackedKey::new(namespace, key))
            .map(|a| a.patterns.clone())
            .unwrap_or_default()
    }

    /// Prune stale state and rescore every tracked key. Returns the number of
    /// predictions retained.
    pub async fn refresh_predictions(&self) -> usize {
        if !self.config.enable_predictive_caching {
            return 0;
        }

        let now = self.clock.now();
        let retention = ChronoDuration::seconds(self.config.pattern_retention_secs as i64);
        let window = ChronoDuration::seconds(self.config.prediction_window_secs as i64);

        let (pruned, lapsed) = {
            let mut engine = self.engine.write().await;
            let pruned = engine.tracker.prune(now, retention);
            let lapsed = engine.pending.expire(now, window);
            (pruned, lapsed)
        };

        // Score under the read lock, only the swap below takes the write lock
        let candidates: Vec<CachePrediction> = {
            let engine = self.engine.read().await;
            engine
                .tracker
                .tracked_keys()
                .filter_map(|key| predict(&engine.tracker, key, &self.config.strategies, now))
                .collect()
        };
        let scored = candidates.len();

        let mut engine = self.engine.write().await;
        engine
            .predictions
            .replace(candidates, self.config.prediction_accuracy_threshold);

        debug!(
            "Predictions refreshed: {} scored, {} retained, {} keys pruned, {} signals lapsed",
            scored,
            engine.predictions.len(),
            pruned,
            lapsed
        );
        engine.predictions.len()
    }

    /// Signal the top predictions that are likely but not cached.
    /// Returns the number of signals sent.
    pub async fn perform_warmup(&self) -> usize {
        if !self.config.cache_warmup_enabled || !self.cache.is_connected() {
            return 0;
        }

        let candidates: Vec<CachePrediction> = {
            let engine = self.engine.read().await;
            engine
                .predictions
                .ranked(WARMUP_BATCH)
                .into_iter()
                .filter(|p| p.probability > WARMUP_PROBABILITY)
                .collect()
        };

        let issued = self.signal_uncached(candidates, SignalReason::Warmup).await;
        if issued > 0 {
            info!("Cache warmup requested {} keys", issued);
        }
        issued
    }

    /// Signal related keys of `key` that are likely to be read next and are
    /// not cached. Returns the number of signals sent.
    pub async fn trigger_predictive(&self, key: &TrackedKey, session_id: Option<&str>) -> usize {
        if !self.config.enable_predictive_caching || !self.cache.is_connected() {
            return 0;
        }

        let candidates: Vec<CachePrediction> = {
            let engine = self.engine.read().await;
            engine
                .tracker
                .related_keys(key, session_id, RELATED_SIMILARITY, MAX_RELATED_KEYS)
                .into_iter()
                .filter_map(|related| engine.predictions.get(&related).cloned())
                .filter(|p| p.probability > PREFETCH_PROBABILITY)
                .collect()
        };

        self.signal_uncached(candidates, SignalReason::Predictive)
            .await
    }

    /// Counters with derived rates
    pub async fn metrics(&self) -> IntelligentMetrics {
        self.metrics.read().await.clone().with_rates()
    }

    /// Retained predictions, highest priority first
    pub async fn predictions(&self) -> Vec<CachePrediction> {
        self.engine.read().await.predictions.ranked(usize::MAX)
    }

    pub async fn report(&self) -> CacheReport {
        let stats = self.cache.get_stats().await;
        let health = self.cache.health_check().await;
        let metrics = self.metrics().await;
        let engine = self.engine.read().await;

        CacheReport {
            stats,
            health,
            metrics,
            top_predictions: engine.predictions.ranked(REPORT_TOP_PREDICTIONS),
            total_predictions: engine.predictions.len(),
            tracked_keys: engine.tracker.key_count(),
            active_sessions: engine.tracker.session_count(),
            generated_at: self.clock.now(),
        }
    }

    /// Forget all tracking state and counters. Cached entries are untouched.
    pub async fn clear(&self) {
        {
            let mut engine = self.engine.write().await;
            engine.tracker.clear();
            engine.predictions.clear();
            engine.pending.clear();
        }
        *self.metrics.write().await = IntelligentMetrics::default();
        info!("Intelligent cache state cleared");
    }

    /// Spawn the refresh task, and the warmup task when enabled.
    /// False when already running or prediction is disabled.
    pub async fn start(&self) -> bool {
        let mut running = self.tasks.lock().await;
        if running.is_some() || !self.config.enable_predictive_caching {
            return false;
        }

        let mut tasks = BackgroundTasks::new();

        let cache = self.clone();
        tasks.spawn_periodic(
            "prediction-refresh",
            Duration::from_secs(self.config.refresh_interval_secs),
            move || {
                let cache = cache.clone();
                async move {
                    cache.refresh_predictions().await;
                }
            },
        );

        if self.config.cache_warmup_enabled {
            let cache = self.clone();
            tasks.spawn_periodic(
                "cache-warmup",
                Duration::from_secs(self.config.warmup_interval_secs),
                move || {
                    let cache = cache.clone();
                    async move {
                        cache.perform_warmup().await;
                    }
                },
            );
        }

        info!("Intelligent cache started with {} background tasks", tasks.len());
        *running = Some(tasks);
        true
    }

    /// Stop background tasks, waiting for in-flight cycles to finish
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
            info!("Intelligent cache stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        options: &GetOptions,
    ) -> Option<T> {
        let tracked = TrackedKey::new(namespace, key);
        let now = self.clock.now();

        let confirmed = {
            let mut engine = self.engine.write().await;
            if self.config.enable_access_pattern_analysis {
                if let Some(user) = options.user_context.as_deref() {
                    let session = options
                        .session_id
                        .as_deref()
                        .filter(|_| self.config.enable_user_behavior_tracking);
                    engine.tracker.record(&tracked, user, session, now);
                }
            }
            let window = ChronoDuration::seconds(self.config.prediction_window_secs as i64);
            engine.pending.confirm(&tracked, now, window)
        };

        {
            let mut metrics = self.metrics.write().await;
            metrics.total_requests += 1;
            if confirmed {
                metrics.successful_predictions += 1;
            }
        }

        let cached = self
            .cache
            .get::<T>(namespace, key, &CacheOptions::default())
            .await;

        if cached.is_some() {
            self.metrics.write().await.cache_hits += 1;

            if self.config.enable_predictive_caching && options.enable_prediction {
                let cache = self.clone();
                let session = options.session_id.clone();
                tokio::spawn(async move {
                    cache.trigger_predictive(&tracked, session.as_deref()).await;
                });
            }
        }

        cached
    }

    async fn signal_uncached(&self, candidates: Vec<CachePrediction>, reason: SignalReason) -> usize {
        let plain = CacheOptions::default();
        let presence = join_all(
            candidates
                .iter()
                .map(|p| self.cache.exists(&p.namespace, &p.key, &plain)),
        )
        .await;

        let mut issued = 0;
        for (prediction, cached) in candidates.into_iter().zip(presence) {
            if !cached {
                self.emit(prediction, reason).await;
                issued += 1;
            }
        }
        issued
    }

    async fn emit(&self, prediction: CachePrediction, reason: SignalReason) {
        let tracked = prediction.tracked_key();
        self.engine
            .write()
            .await
            .pending
            .issue(tracked.clone(), self.clock.now());
        self.metrics.write().await.predictions += 1;

        info!(
            "Prefetch signal for {} ({:?}, probability {:.3})",
            tracked, reason, prediction.probability
        );
        let signal = PrefetchSignal {
            namespace: prediction.namespace,
            key: prediction.key,
            probability: prediction.probability,
            reason,
        };
        if self.signals.send(signal).is_err() {
            debug!("No subscribers for prefetch signal {}", tracked);
        }
    }

    async fn record_written_size<T: Serialize + ?Sized>(&self, key: &TrackedKey, data: &T) {
        if let Ok(bytes) = serde_json::to_vec(data) {
            self.engine.write().await.tracker.record_size(key, bytes.len());
        }
    }
}
