// Prediction Strategies
// Weighted scoring rules combined into an access probability for a tracked key

use super::patterns::{AccessTracker, KeyActivity, TrackedKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scoring rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Total reads across users, saturating
    Frequency,
    /// Exponential decay since the last read
    Recency,
    /// How many other sessions browse the same neighbourhood
    UserSimilarity,
    /// Regularity of the gaps between reads
    Temporal,
}

/// Named, weighted, independently toggleable scoring rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStrategy {
    pub name: StrategyKind,
    pub weight: f64,
    pub enabled: bool,
    /// Tuning knobs; missing entries fall back to built-in defaults
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

impl CacheStrategy {
    pub fn new(name: StrategyKind, weight: f64) -> Self {
        Self {
            name,
            weight,
            enabled: true,
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    fn parameter(&self, name: &str, default: f64) -> f64 {
        self.parameters
            .get(name)
            .copied()
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(default)
    }

    /// Score in [0, 1] for one key
    pub fn score(
        &self,
        tracker: &AccessTracker,
        key: &TrackedKey,
        activity: &KeyActivity,
        now: DateTime<Utc>,
    ) -> f64 {
        let score = match self.name {
            StrategyKind::Frequency => {
                frequency_score(activity.total_frequency(), self.parameter("saturation", 10.0))
            }
            StrategyKind::Recency => match activity.latest_access() {
                Some(latest) => recency_score(latest, now, self.parameter("decay_secs", 3600.0)),
                None => 0.0,
            },
            StrategyKind::UserSimilarity => tracker.user_similarity(key),
            StrategyKind::Temporal => temporal_score(&activity.intervals()),
        };
        score.clamp(0.0, 1.0)
    }
}

/// Frequency, recency, user similarity and temporal rules with the stock weights
pub fn default_strategies() -> Vec<CacheStrategy> {
    vec![
        CacheStrategy::new(StrategyKind::Frequency, 0.3).with_parameter("saturation", 10.0),
        CacheStrategy::new(StrategyKind::Recency, 0.2).with_parameter("decay_secs", 3600.0),
        CacheStrategy::new(StrategyKind::UserSimilarity, 0.25),
        CacheStrategy::new(StrategyKind::Temporal, 0.25),
    ]
}

/// Weighted average of the enabled strategies, normalized by their total weight
pub fn combined_score(
    strategies: &[CacheStrategy],
    tracker: &AccessTracker,
    key: &TrackedKey,
    activity: &KeyActivity,
    now: DateTime<Utc>,
) -> f64 {
    let mut total_score = 0.0;
    let mut total_weight = 0.0;

    for strategy in strategies.iter().filter(|s| s.enabled && s.weight > 0.0) {
        total_score += strategy.score(tracker, key, activity, now) * strategy.weight;
        total_weight += strategy.weight;
    }

    if total_weight > 0.0 {
        (total_score / total_weight).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn frequency_score(total: u64, saturation: f64) -> f64 {
    (total as f64 / saturation).min(1.0)
}

pub fn recency_score(latest: DateTime<Utc>, now: DateTime<Utc>, decay_secs: f64) -> f64 {
    let age = now.signed_duration_since(latest).num_milliseconds().max(0) as f64 / 1000.0;
    (-age / decay_secs).exp()
}

/// `1 / (1 + stddev / mean)` over the gaps; zero with fewer than two reads
pub fn temporal_score(intervals: &[f64]) -> f64 {
    if intervals.is_empty() {
        return 0.0;
    }

    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        // every read landed in the same instant
        return 1.0;
    }

    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
    1.0 / (1.0 + variance.sqrt() / mean)
}
