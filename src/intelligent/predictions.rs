// Cache Predictions
// Scored access predictions, the bounded prediction set and prediction outcome tracking

use super::patterns::TrackedKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Estimate of how likely a key is to be read again soon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePrediction {
    pub namespace: String,
    pub key: String,
    /// Access probability in [0, 1]
    pub probability: f64,
    /// Ranking score, `probability * 100`
    pub priority: f64,
    pub estimated_next_access: DateTime<Utc>,
    /// Expected payload size in bytes
    pub estimated_data_size: usize,
}

impl CachePrediction {
    pub fn tracked_key(&self) -> TrackedKey {
        TrackedKey::new(self.namespace.clone(), self.key.clone())
    }
}

fn by_priority_desc(a: &CachePrediction, b: &CachePrediction) -> Ordering {
    b.priority
        .partial_cmp(&a.priority)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.namespace.cmp(&b.namespace))
        .then_with(|| a.key.cmp(&b.key))
}

/// Current predictions, at most `capacity` of them
#[derive(Debug)]
pub struct PredictionSet {
    predictions: HashMap<TrackedKey, CachePrediction>,
    capacity: usize,
}

impl PredictionSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            predictions: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Replace the whole set with the candidates at or above `threshold`,
    /// keeping the top `capacity` by priority
    pub fn replace(&mut self, candidates: Vec<CachePrediction>, threshold: f64) {
        self.predictions = candidates
            .into_iter()
            .filter(|p| p.probability >= threshold)
            .map(|p| (p.tracked_key(), p))
            .collect();
        self.enforce_capacity();
    }

    /// Insert or refresh one prediction regardless of threshold
    pub fn upsert(&mut self, prediction: CachePrediction) {
        self.predictions.insert(prediction.tracked_key(), prediction);
        self.enforce_capacity();
    }

    pub fn get(&self, key: &TrackedKey) -> Option<&CachePrediction> {
        self.predictions.get(key)
    }

    /// Highest priority first
    pub fn ranked(&self, limit: usize) -> Vec<CachePrediction> {
        let mut ranked: Vec<CachePrediction> = self.predictions.values().cloned().collect();
        ranked.sort_by(by_priority_desc);
        ranked.truncate(limit);
        ranked
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn clear(&mut self) {
        self.predictions.clear();
    }

    fn enforce_capacity(&mut self) {
        if self.predictions.len() <= self.capacity {
            return;
        }
        let keep = self.ranked(self.capacity);
        self.predictions = keep.into_iter().map(|p| (p.tracked_key(), p)).collect();
    }
}

/// Signals issued and not yet confirmed by a real read
#[derive(Debug, Default)]
pub struct PendingPredictions {
    issued: HashMap<TrackedKey, DateTime<Utc>>,
}

impl PendingPredictions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signal; a repeated signal restarts the window
    pub fn issue(&mut self, key: TrackedKey, now: DateTime<Utc>) {
        self.issued.insert(key, now);
    }

    /// Consume a pending prediction for `key` if it is still inside `window`
    pub fn confirm(&mut self, key: &TrackedKey, now: DateTime<Utc>, window: Duration) -> bool {
        match self.issued.remove(key) {
            Some(issued_at) => now.signed_duration_since(issued_at) <= window,
            None => false,
        }
    }

    /// Forget signals older than `window`, returning how many were dropped
    pub fn expire(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let before = self.issued.len();
        self.issued
            .retain(|_, issued_at| now.signed_duration_since(*issued_at) <= window);
        before - self.issued.len()
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    pub fn clear(&mut self) {
        self.issued.clear();
    }
}

/// Why a prefetch was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalReason {
    /// Related to a key that was just read
    Predictive,
    /// Part of the periodic warmup sweep
    Warmup,
}

/// Request for a consumer to load a key into the cache ahead of demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchSignal {
    pub namespace: String,
    pub key: String,
    pub probability: f64,
    pub reason: SignalReason,
}
