// Intelligent Cache Tests
// Prediction scoring, adaptive TTLs, prefetch signals and lifecycle against the in-memory store

use super::patterns::AccessTracker;
use super::policies::{
    estimate_data_size, generate_tags, optimal_ttl, MAX_TTL_SECS, MIN_TTL_SECS,
};
use super::predictions::{PendingPredictions, PredictionSet};
use super::strategies::{combined_score, temporal_score};
use super::*;
use crate::caching::{CacheOptions, ManualClock, MemoryStore, RedisCacheManager};
use crate::config::RedisSettings;
use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    cache: IntelligentCache,
    clock: Arc<ManualClock>,
}

async fn fixture(config: IntelligentCacheConfig) -> Fixture {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryStore::with_clock("memory", clock.clone()));
    let settings = RedisSettings {
        key_prefix: "test:".to_string(),
        ..RedisSettings::default()
    };
    let manager = RedisCacheManager::with_clock(settings, store, clock.clone());
    assert!(manager.connect().await);

    Fixture {
        cache: IntelligentCache::new(Arc::new(manager), config).unwrap(),
        clock,
    }
}

/// Frequency and recency only, so a hot key can reach probability ~1
fn eager_config() -> IntelligentCacheConfig {
    let mut strategies = default_strategies();
    for strategy in strategies.iter_mut() {
        strategy.enabled = matches!(strategy.name, StrategyKind::Frequency | StrategyKind::Recency);
    }
    IntelligentCacheConfig {
        prediction_accuracy_threshold: 0.0,
        strategies,
        ..IntelligentCacheConfig::default()
    }
}

fn user(ctx: &str) -> GetOptions {
    GetOptions::for_user(ctx)
}

async fn read_n(fx: &Fixture, namespace: &str, key: &str, options: &GetOptions, n: usize, gap: i64) {
    for _ in 0..n {
        let _: Option<Value> = fx.cache.get(namespace, key, options).await;
        fx.clock.advance_secs(gap);
    }
}

#[tokio::test]
async fn test_config_defaults() {
    let config = IntelligentCacheConfig::default();
    assert!(config.enable_predictive_caching);
    assert_eq!(config.max_prediction_cache_size, 1000);
    assert!((config.prediction_accuracy_threshold - 0.7).abs() < f64::EPSILON);
    assert_eq!(config.refresh_interval_secs, 30);
    assert_eq!(config.warmup_interval_secs, 300);

    let weights: Vec<(StrategyKind, f64)> = config.strategies.iter().map(|s| (s.name, s.weight)).collect();
    assert_eq!(
        weights,
        vec![
            (StrategyKind::Frequency, 0.3),
            (StrategyKind::Recency, 0.2),
            (StrategyKind::UserSimilarity, 0.25),
            (StrategyKind::Temporal, 0.25),
        ]
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation() {
    let bad_threshold = IntelligentCacheConfig {
        prediction_accuracy_threshold: 1.5,
        ..IntelligentCacheConfig::default()
    };
    assert!(bad_threshold.validate().is_err());

    let mut all_disabled = IntelligentCacheConfig::default();
    all_disabled.strategies.iter_mut().for_each(|s| s.enabled = false);
    assert!(all_disabled.validate().is_err());

    let negative = IntelligentCacheConfig {
        strategies: vec![CacheStrategy::new(StrategyKind::Frequency, -1.0)],
        ..IntelligentCacheConfig::default()
    };
    assert!(negative.validate().is_err());

    let empty = IntelligentCacheConfig {
        strategies: Vec::new(),
        ..IntelligentCacheConfig::default()
    };
    assert!(empty.validate().is_err());
}

#[tokio::test]
async fn test_get_records_access_patterns() {
    let fx = fixture(IntelligentCacheConfig::default()).await;

    read_n(&fx, "tracks", "t1", &user("u1").in_session("s1"), 3, 10).await;
    read_n(&fx, "tracks", "t1", &user("u2"), 1, 10).await;
    // No user context: nothing recorded
    read_n(&fx, "tracks", "t1", &GetOptions::new(), 2, 10).await;

    let patterns = fx.cache.access_patterns("tracks", "t1").await;
    assert_eq!(patterns.len(), 2);
    let u1 = patterns.iter().find(|p| p.user_context == "u1").unwrap();
    assert_eq!(u1.frequency, 3);
    assert_eq!(u1.session_id, "s1");
    let u2 = patterns.iter().find(|p| p.user_context == "u2").unwrap();
    assert_eq!(u2.session_id, "anonymous");

    let metrics = fx.cache.metrics().await;
    assert_eq!(metrics.total_requests, 6);
    assert_eq!(metrics.cache_hits, 0);
}

#[tokio::test]
async fn test_pattern_analysis_can_be_disabled() {
    let config = IntelligentCacheConfig {
        enable_access_pattern_analysis: false,
        ..IntelligentCacheConfig::default()
    };
    let fx = fixture(config).await;

    read_n(&fx, "tracks", "t1", &user("u1"), 3, 1).await;
    assert!(fx.cache.access_patterns("tracks", "t1").await.is_empty());
    assert!(fx.cache.calculate_prediction("tracks", "t1").await.is_none());
}

#[tokio::test]
async fn test_hot_key_outranks_cold_key() {
    let config = IntelligentCacheConfig {
        prediction_accuracy_threshold: 0.0,
        ..IntelligentCacheConfig::default()
    };
    let fx = fixture(config).await;
    let options = user("u1").in_session("s1");

    read_n(&fx, "ns", "k1", &options, 10, 5).await;
    read_n(&fx, "ns", "k2", &options, 1, 0).await;
    fx.cache.refresh_predictions().await;

    let predictions = fx.cache.predictions().await;
    let k1 = predictions.iter().find(|p| p.key == "k1").unwrap();
    let k2 = predictions.iter().find(|p| p.key == "k2").unwrap();
    assert!(k1.priority > k2.priority);
    assert_eq!(predictions[0].key, "k1");
    assert!((k1.priority - k1.probability * 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_refresh_applies_threshold() {
    let fx = fixture(IntelligentCacheConfig::default()).await;
    let options = user("u1").in_session("s1");

    read_n(&fx, "ns", "k1", &options, 10, 5).await;
    read_n(&fx, "ns", "k2", &options, 1, 0).await;
    let retained = fx.cache.refresh_predictions().await;

    assert_eq!(retained, 1);
    let predictions = fx.cache.predictions().await;
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].key, "k1");
    assert!(predictions[0].probability >= 0.7);
}

#[tokio::test]
async fn test_prediction_set_keeps_top_n() {
    let config = IntelligentCacheConfig {
        max_prediction_cache_size: 3,
        ..eager_config()
    };
    let fx = fixture(config).await;

    for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        read_n(&fx, "ns", key, &user("u1"), i + 1, 0).await;
    }
    fx.cache.refresh_predictions().await;

    let keys: Vec<String> = fx.cache.predictions().await.into_iter().map(|p| p.key).collect();
    assert_eq!(keys, vec!["e", "d", "c"]);
}

#[tokio::test]
async fn test_prediction_estimates() {
    let fx = fixture(eager_config()).await;
    read_n(&fx, "tracks", "track:7", &user("u1"), 3, 120).await;

    let prediction = fx.cache.calculate_prediction("tracks", "track:7").await.unwrap();
    let now = clock_now(&fx.clock);
    assert_eq!(prediction.estimated_next_access, now + ChronoDuration::seconds(120));
    // Nothing written yet, so the key name decides
    assert_eq!(prediction.estimated_data_size, 1024 * 1024);

    fx.cache
        .set("tracks", "track:7", &json!({"title": "x"}), &SetOptions::new())
        .await;
    let prediction = fx.cache.calculate_prediction("tracks", "track:7").await.unwrap();
    assert_eq!(prediction.estimated_data_size, br#"{"title":"x"}"#.len());
}

#[tokio::test]
async fn test_size_estimate_ignores_namespace() {
    let fx = fixture(eager_config()).await;
    read_n(&fx, "tracks", "42", &user("u1"), 1, 0).await;
    read_n(&fx, "tracks", "playlist:3", &user("u1"), 1, 0).await;

    let bare = fx.cache.calculate_prediction("tracks", "42").await.unwrap();
    assert_eq!(bare.estimated_data_size, 1024);
    let playlist = fx.cache.calculate_prediction("tracks", "playlist:3").await.unwrap();
    assert_eq!(playlist.estimated_data_size, 10 * 1024);
}

#[tokio::test]
async fn test_refresh_runs_alongside_reads() {
    let fx = fixture(eager_config()).await;
    for i in 0..20 {
        read_n(&fx, "ns", &format!("k{}", i), &user("u1").in_session("s1"), 2, 1).await;
    }

    let reads = async {
        for i in 0..20 {
            let _: Option<Value> = fx.cache.get("ns", &format!("k{}", i), &user("u2")).await;
        }
    };
    let (retained, ()) = tokio::join!(fx.cache.refresh_predictions(), reads);

    assert_eq!(retained, 20);
    assert_eq!(fx.cache.predictions().await.len(), 20);
    assert_eq!(fx.cache.metrics().await.total_requests, 60);
}

fn clock_now(clock: &ManualClock) -> chrono::DateTime<chrono::Utc> {
    use crate::caching::Clock;
    clock.now()
}

#[tokio::test]
async fn test_hit_triggers_prefetch_of_related_key() {
    let fx = fixture(eager_config()).await;
    let mut signals = fx.cache.subscribe();
    let options = user("u1").in_session("s1");

    fx.cache.set("ns", "k1", &json!("cached"), &SetOptions::new()).await;
    read_n(&fx, "ns", "k2", &options, 10, 0).await;
    fx.cache.refresh_predictions().await;

    let hit: Option<Value> = fx.cache.get("ns", "k1", &options).await;
    assert_eq!(hit, Some(json!("cached")));

    let signal = tokio::time::timeout(Duration::from_secs(2), signals.recv())
        .await
        .expect("prefetch signal")
        .unwrap();
    assert_eq!(signal.namespace, "ns");
    assert_eq!(signal.key, "k2");
    assert_eq!(signal.reason, SignalReason::Predictive);
    assert!(signal.probability > PREFETCH_PROBABILITY);

    assert_eq!(fx.cache.metrics().await.predictions, 1);

    // The predicted read arrives inside the window
    let _: Option<Value> = fx.cache.get("ns", "k2", &options).await;
    let metrics = fx.cache.metrics().await;
    assert_eq!(metrics.successful_predictions, 1);
    assert!((metrics.prediction_accuracy - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_prefetch_skips_cached_and_disabled() {
    let fx = fixture(eager_config()).await;
    let options = user("u1").in_session("s1");

    read_n(&fx, "ns", "k1", &options, 1, 0).await;
    read_n(&fx, "ns", "k2", &options, 10, 0).await;
    fx.cache.refresh_predictions().await;

    let k1 = TrackedKey::new("ns", "k1");
    assert_eq!(fx.cache.trigger_predictive(&k1, Some("s1")).await, 1);

    fx.cache.manager().set("ns", "k2", &json!(2), &CacheOptions::new()).await;
    assert_eq!(fx.cache.trigger_predictive(&k1, Some("s1")).await, 0);

    let quiet = GetOptions::for_user("u1").in_session("s1").without_prediction();
    fx.cache.set("ns", "k1", &json!(1), &SetOptions::new()).await;
    let before = fx.cache.metrics().await.predictions;
    let _: Option<Value> = fx.cache.get("ns", "k1", &quiet).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.cache.metrics().await.predictions, before);
}

#[tokio::test]
async fn test_pending_predictions_expire() {
    let fx = fixture(eager_config()).await;
    let options = user("u1").in_session("s1");
    read_n(&fx, "ns", "k1", &options, 1, 0).await;
    read_n(&fx, "ns", "k2", &options, 10, 0).await;
    fx.cache.refresh_predictions().await;
    fx.cache
        .trigger_predictive(&TrackedKey::new("ns", "k1"), Some("s1"))
        .await;

    fx.clock.advance_secs(601);
    let _: Option<Value> = fx.cache.get("ns", "k2", &options).await;

    let metrics = fx.cache.metrics().await;
    assert_eq!(metrics.predictions, 1);
    assert_eq!(metrics.successful_predictions, 0);
    assert_eq!(metrics.prediction_accuracy, 0.0);
}

#[tokio::test]
async fn test_warmup_signals_uncached_hot_keys() {
    let fx = fixture(eager_config()).await;
    let mut signals = fx.cache.subscribe();

    read_n(&fx, "ns", "cold", &user("u1"), 1, 3600).await;
    read_n(&fx, "ns", "hot", &user("u1"), 10, 0).await;
    fx.cache.refresh_predictions().await;

    assert_eq!(fx.cache.perform_warmup().await, 1);
    let signal = signals.try_recv().unwrap();
    assert_eq!(signal.key, "hot");
    assert_eq!(signal.reason, SignalReason::Warmup);

    fx.cache.set("ns", "hot", &json!(1), &SetOptions::new()).await;
    assert_eq!(fx.cache.perform_warmup().await, 0);
}

#[tokio::test]
async fn test_warmup_disabled() {
    let config = IntelligentCacheConfig {
        cache_warmup_enabled: false,
        ..eager_config()
    };
    let fx = fixture(config).await;
    read_n(&fx, "ns", "hot", &user("u1"), 10, 0).await;
    fx.cache.refresh_predictions().await;

    assert_eq!(fx.cache.perform_warmup().await, 0);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_signals_are_logged_at_info() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let fx = fixture(eager_config()).await;
    read_n(&fx, "ns", "hot", &user("u1"), 10, 0).await;
    fx.cache.refresh_predictions().await;
    assert_eq!(fx.cache.perform_warmup().await, 1);

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let line = output
        .lines()
        .find(|line| line.contains("Prefetch signal for"))
        .expect("signal log line");
    assert!(line.contains("INFO"));
    assert!(line.contains("Warmup"));
}

#[tokio::test]
async fn test_get_or_load_caches_fallback() {
    let fx = fixture(IntelligentCacheConfig::default()).await;
    let calls = AtomicUsize::new(0);
    let options = user("42");

    for _ in 0..2 {
        let value: Option<Value> = fx
            .cache
            .get_or_load("tracks", "album:7", &options, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!({"title": "Kind of Blue"}))
            })
            .await;
        assert_eq!(value, Some(json!({"title": "Kind of Blue"})));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let entry = fx
        .cache
        .manager()
        .inspect("tracks", "album:7", &CacheOptions::new())
        .await
        .unwrap();
    assert_eq!(entry.ttl, 3600);
    assert!(entry.tags.contains(&"intelligent-cache".to_string()));
    assert!(entry.tags.contains(&"album".to_string()));
    assert!(entry.tags.contains(&"user:42".to_string()));

    let removed = fx
        .cache
        .manager()
        .delete_by_tags("tracks", &["user:42".to_string()])
        .await;
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn test_get_or_load_failure_yields_none() {
    let fx = fixture(IntelligentCacheConfig::default()).await;

    let value: Option<Value> = fx
        .cache
        .get_or_load("tracks", "t1", &GetOptions::new(), || async {
            Err::<Value, _>("upstream down")
        })
        .await;

    assert!(value.is_none());
    assert!(!fx
        .cache
        .manager()
        .exists("tracks", "t1", &CacheOptions::new())
        .await);
}

#[tokio::test]
async fn test_adaptive_ttl_follows_access_rhythm() {
    let fx = fixture(IntelligentCacheConfig::default()).await;
    assert_eq!(fx.cache.optimal_ttl("tracks", "new").await, 3600);

    read_n(&fx, "tracks", "slow", &user("u1"), 3, 900).await;
    assert_eq!(fx.cache.optimal_ttl("tracks", "slow").await, 900);

    read_n(&fx, "tracks", "fast", &user("u1"), 5, 10).await;
    assert_eq!(fx.cache.optimal_ttl("tracks", "fast").await, MIN_TTL_SECS);

    fx.cache.set("tracks", "slow", &json!(1), &SetOptions::new()).await;
    let entry = fx
        .cache
        .manager()
        .inspect("tracks", "slow", &CacheOptions::new())
        .await
        .unwrap();
    assert_eq!(entry.ttl, 900);
}

#[tokio::test]
async fn test_set_uses_explicit_ttl_and_rescores() {
    let fx = fixture(IntelligentCacheConfig::default()).await;
    read_n(&fx, "playlists", "p1", &user("u1"), 1, 0).await;

    let stored = fx
        .cache
        .set(
            "playlists",
            "p1",
            &json!(["t1", "t2"]),
            &SetOptions::for_user("u1").with_ttl(120).with_priority(Priority::High),
        )
        .await;
    assert!(stored);

    let entry = fx
        .cache
        .manager()
        .inspect("playlists", "p1", &CacheOptions::new())
        .await
        .unwrap();
    assert_eq!(entry.ttl, 120);
    assert_eq!(entry.priority, Priority::High);
    assert_eq!(
        entry.tags,
        vec!["intelligent-cache".to_string(), "playlists".to_string(), "user:u1".to_string()]
    );

    // Rescored immediately even below the retention threshold
    let predictions = fx.cache.predictions().await;
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].key, "p1");
}

#[tokio::test]
async fn test_hit_rate_metrics() {
    let fx = fixture(IntelligentCacheConfig::default()).await;
    fx.cache.set("ns", "k", &json!(1), &SetOptions::new()).await;

    let _: Option<Value> = fx.cache.get("ns", "k", &GetOptions::new()).await;
    let _: Option<Value> = fx.cache.get("ns", "k", &GetOptions::new()).await;
    let _: Option<Value> = fx.cache.get("ns", "missing", &GetOptions::new()).await;

    let metrics = fx.cache.metrics().await;
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.cache_hits, 2);
    assert!((metrics.hit_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_cleanup_prunes_stale_patterns() {
    let fx = fixture(eager_config()).await;
    read_n(&fx, "ns", "old", &user("u1").in_session("s1"), 2, 0).await;
    fx.cache.refresh_predictions().await;
    assert_eq!(fx.cache.predictions().await.len(), 1);

    fx.clock.advance_secs(86_401);
    read_n(&fx, "ns", "fresh", &user("u2"), 1, 0).await;
    fx.cache.refresh_predictions().await;

    assert!(fx.cache.access_patterns("ns", "old").await.is_empty());
    let keys: Vec<String> = fx.cache.predictions().await.into_iter().map(|p| p.key).collect();
    assert_eq!(keys, vec!["fresh"]);

    let report = fx.cache.report().await;
    assert_eq!(report.tracked_keys, 1);
    assert_eq!(report.active_sessions, 0);
}

#[tokio::test]
async fn test_report() {
    let fx = fixture(eager_config()).await;
    for i in 0..25 {
        read_n(&fx, "ns", &format!("k{}", i), &user("u1"), 1, 0).await;
    }
    fx.cache.set("ns", "k0", &json!(0), &SetOptions::new()).await;
    fx.cache.refresh_predictions().await;

    let report = fx.cache.report().await;
    assert_eq!(report.total_predictions, 25);
    assert_eq!(report.top_predictions.len(), REPORT_TOP_PREDICTIONS);
    assert!(report.health.healthy);
    assert_eq!(report.metrics.total_requests, 25);
    assert_eq!(report.stats.stats.sets, 1);
}

#[tokio::test]
async fn test_clear_resets_state() {
    let fx = fixture(eager_config()).await;
    fx.cache.set("ns", "k", &json!(1), &SetOptions::new()).await;
    read_n(&fx, "ns", "k", &user("u1"), 3, 0).await;
    fx.cache.refresh_predictions().await;

    fx.cache.clear().await;

    assert!(fx.cache.predictions().await.is_empty());
    assert!(fx.cache.access_patterns("ns", "k").await.is_empty());
    assert_eq!(fx.cache.metrics().await, IntelligentMetrics::default());
    // Cached data survives
    assert!(fx.cache.manager().exists("ns", "k", &CacheOptions::new()).await);
}

#[tokio::test]
async fn test_disconnected_store_degrades() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryStore::with_clock("memory", clock.clone()));
    store.set_online(false);
    let manager = RedisCacheManager::with_clock(RedisSettings::default(), store.clone(), clock);
    let cache = IntelligentCache::new(Arc::new(manager), eager_config()).unwrap();

    let value: Option<Value> = cache.get("ns", "k", &user("u1")).await;
    assert!(value.is_none());
    assert!(!cache.set("ns", "k", &json!(1), &SetOptions::new()).await);
    assert_eq!(cache.perform_warmup().await, 0);

    let loaded: Option<Value> = cache
        .get_or_load("ns", "k", &GetOptions::new(), || async { Ok::<_, String>(json!(5)) })
        .await;
    assert_eq!(loaded, Some(json!(5)));
}

#[tokio::test]
async fn test_start_and_stop() {
    let fx = fixture(IntelligentCacheConfig::default()).await;

    assert!(fx.cache.start().await);
    assert!(fx.cache.is_running().await);
    assert!(!fx.cache.start().await);

    fx.cache.stop().await;
    assert!(!fx.cache.is_running().await);
    // Stopping twice is harmless
    fx.cache.stop().await;
}

#[tokio::test]
async fn test_start_refused_when_prediction_disabled() {
    let config = IntelligentCacheConfig {
        enable_predictive_caching: false,
        ..IntelligentCacheConfig::default()
    };
    let fx = fixture(config).await;

    assert!(!fx.cache.start().await);
    assert_eq!(fx.cache.refresh_predictions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_refresh_runs_on_interval() {
    let fx = fixture(eager_config()).await;
    read_n(&fx, "ns", "k", &user("u1"), 3, 0).await;
    assert!(fx.cache.predictions().await.is_empty());

    fx.cache.start().await;
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(fx.cache.predictions().await.len(), 1);
    fx.cache.stop().await;
}

#[test]
fn test_generate_tags() {
    assert_eq!(
        generate_tags("tracks", "t1", None),
        vec!["intelligent-cache", "tracks"]
    );
    assert_eq!(
        generate_tags("cache", "user:42", Some("42")),
        vec!["intelligent-cache", "cache", "user", "user:42"]
    );
    assert_eq!(
        generate_tags("tracks", "tracks:9", None),
        vec!["intelligent-cache", "tracks"]
    );
}

#[test]
fn test_estimate_data_size() {
    assert_eq!(estimate_data_size("tracks:1", None), 1024 * 1024);
    assert_eq!(estimate_data_size("playlists:1", None), 10 * 1024);
    assert_eq!(estimate_data_size("user:1", None), 1024);
    assert_eq!(estimate_data_size("user_playlist:1", None), 1024);
    assert_eq!(estimate_data_size("anything", None), 1024);
    assert_eq!(estimate_data_size("tracks:1", Some(77)), 77);
}

#[test]
fn test_temporal_score() {
    assert_eq!(temporal_score(&[]), 0.0);
    assert!((temporal_score(&[60.0, 60.0, 60.0]) - 1.0).abs() < f64::EPSILON);
    let irregular = temporal_score(&[1.0, 100.0, 5.0, 400.0]);
    assert!(irregular > 0.0 && irregular < 0.6);
}

#[test]
fn test_user_similarity() {
    let mut tracker = AccessTracker::new(100);
    let now = chrono::Utc::now();
    let song = TrackedKey::new("tracks", "song");
    let album = TrackedKey::new("albums", "a1");
    let other = TrackedKey::new("tracks", "other");

    tracker.record(&song, "u1", Some("s1"), now);
    tracker.record(&album, "u1", Some("s1"), now);
    // s2 browses the same album, s3 is unrelated
    tracker.record(&album, "u2", Some("s2"), now);
    tracker.record(&other, "u3", Some("s3"), now);

    assert!((tracker.user_similarity(&song) - 0.5).abs() < f64::EPSILON);
    assert_eq!(tracker.user_similarity(&TrackedKey::new("x", "y")), 0.0);
}

#[test]
fn test_related_keys_prefers_session_then_similarity() {
    let mut tracker = AccessTracker::new(100);
    let now = chrono::Utc::now();
    let a = TrackedKey::new("ns", "a");
    let b = TrackedKey::new("ns", "b");
    let c = TrackedKey::new("ns", "c");
    let d = TrackedKey::new("ns", "d");

    tracker.record(&a, "u1", Some("s1"), now);
    tracker.record(&b, "u1", Some("s1"), now);
    tracker.record(&c, "u1", None, now);
    tracker.record(&d, "u9", None, now);

    let related = tracker.related_keys(&a, Some("s1"), 0.7, 10);
    assert_eq!(related, vec![b.clone(), c.clone()]);
    assert_eq!(tracker.related_keys(&a, Some("s1"), 0.7, 1), vec![b]);
    assert!((tracker.pattern_similarity(&a, &c) - 1.0).abs() < f64::EPSILON);
    assert_eq!(tracker.pattern_similarity(&a, &d), 0.0);
}

#[test]
fn test_access_history_is_bounded() {
    let mut tracker = AccessTracker::new(5);
    let start = chrono::Utc::now();
    let key = TrackedKey::new("ns", "k");
    for i in 0..20 {
        tracker.record(&key, "u1", None, start + ChronoDuration::seconds(i));
    }

    let activity = tracker.activity(&key).unwrap();
    assert_eq!(activity.history.len(), 5);
    assert_eq!(activity.total_frequency(), 20);
    assert_eq!(activity.intervals(), vec![1.0; 4]);
}

#[test]
fn test_prediction_set_replace_and_upsert() {
    let prediction = |key: &str, probability: f64| CachePrediction {
        namespace: "ns".to_string(),
        key: key.to_string(),
        probability,
        priority: probability * 100.0,
        estimated_next_access: chrono::Utc::now(),
        estimated_data_size: 1024,
    };
    let mut set = PredictionSet::new(2);

    set.replace(
        vec![prediction("a", 0.9), prediction("b", 0.7), prediction("c", 0.69), prediction("d", 0.95)],
        0.7,
    );
    let keys: Vec<String> = set.ranked(10).into_iter().map(|p| p.key).collect();
    assert_eq!(keys, vec!["d", "a"]);

    set.upsert(prediction("e", 0.1));
    assert_eq!(set.len(), 2);
    assert!(set.get(&TrackedKey::new("ns", "e")).is_none());
}

#[test]
fn test_pending_predictions_window() {
    let mut pending = PendingPredictions::new();
    let now = chrono::Utc::now();
    let window = ChronoDuration::seconds(600);
    let key = TrackedKey::new("ns", "k");

    pending.issue(key.clone(), now);
    assert!(pending.confirm(&key, now + ChronoDuration::seconds(600), window));
    // Consumed
    assert!(!pending.confirm(&key, now, window));

    pending.issue(key.clone(), now);
    assert_eq!(pending.expire(now + ChronoDuration::seconds(601), window), 1);
    assert!(pending.is_empty());
}

proptest! {
    #[test]
    fn prop_prediction_probability_is_bounded(
        accesses in proptest::collection::vec((0usize..4, 0usize..3, 0usize..3, 0i64..100_000), 1..60),
        age in 0i64..1_000_000,
    ) {
        let mut tracker = AccessTracker::new(100);
        let mut now = chrono::Utc::now();
        let keys: Vec<TrackedKey> = (0..4).map(|i| TrackedKey::new("ns", format!("k{}", i))).collect();
        let sessions = ["s0", "s1", "s2"];

        for (key, user, session, gap) in accesses {
            now = now + ChronoDuration::seconds(gap);
            tracker.record(&keys[key], &format!("u{}", user), Some(sessions[session]), now);
        }
        now = now + ChronoDuration::seconds(age);

        let strategies = default_strategies();
        for key in &keys {
            if let Some(activity) = tracker.activity(key) {
                let p = combined_score(&strategies, &tracker, key, activity, now);
                prop_assert!((0.0..=1.0).contains(&p), "probability {} out of range", p);
            }
        }
    }

    #[test]
    fn prop_adaptive_ttl_is_clamped(intervals in proptest::collection::vec(0.0f64..10_000_000.0, 0..50)) {
        let ttl = optimal_ttl(&intervals);
        prop_assert!((MIN_TTL_SECS..=MAX_TTL_SECS).contains(&ttl));
    }
}
