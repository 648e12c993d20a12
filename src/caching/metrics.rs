// Cache Metrics
// Running operation counters plus a rolling latency window for the cache manager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Number of latency samples kept for the rolling average
pub const RESPONSE_TIME_WINDOW: usize = 100;

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    /// Total hits
    pub hits: u64,
    /// Total misses
    pub misses: u64,
    /// Total successful writes
    pub sets: u64,
    /// Total keys removed
    pub deletes: u64,
    /// Entries removed because they were logically expired or undecodable
    pub evictions: u64,
    /// Failed store operations
    pub errors: u64,
    /// Stored bytes / original bytes across compressed writes (0 when nothing was compressed)
    pub compression_ratio: f64,
    /// Store memory usage in bytes, from INFO memory
    pub memory_usage: u64,
    /// Store key count, from DBSIZE
    pub key_count: u64,
    /// Average latency of the last operations in milliseconds
    pub average_response_time: f64,
}

/// Statistics merged with live server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit ratio in [0, 1]
    pub hit_ratio: f64,
    /// Parsed INFO fields, absent when the store could not be queried
    pub server_info: Option<HashMap<String, String>>,
    /// Snapshot time
    pub collected_at: DateTime<Utc>,
}

/// Mutable statistics state guarded by the manager
#[derive(Debug, Default)]
pub struct StatsRecorder {
    stats: CacheStats,
    response_times: VecDeque<f64>,
    compressed_original_bytes: u64,
    compressed_stored_bytes: u64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.stats.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.stats.misses += 1;
    }

    pub fn record_sets(&mut self, count: u64) {
        self.stats.sets += count;
    }

    pub fn record_deletes(&mut self, count: u64) {
        self.stats.deletes += count;
    }

    pub fn record_eviction(&mut self) {
        self.stats.evictions += 1;
    }

    pub fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    /// Track a compressed write for the compression ratio
    pub fn record_compression(&mut self, original: usize, stored: usize) {
        self.compressed_original_bytes += original as u64;
        self.compressed_stored_bytes += stored as u64;
        self.stats.compression_ratio =
            self.compressed_stored_bytes as f64 / self.compressed_original_bytes.max(1) as f64;
    }

    /// Push a latency sample, keeping only the last [`RESPONSE_TIME_WINDOW`]
    pub fn record_response_time(&mut self, elapsed: Duration) {
        self.response_times.push_back(elapsed.as_secs_f64() * 1000.0);
        while self.response_times.len() > RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
        self.stats.average_response_time =
            self.response_times.iter().sum::<f64>() / self.response_times.len() as f64;
    }

    pub fn samples(&self) -> usize {
        self.response_times.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl CacheStats {
    /// Hit ratio in [0, 1]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Parse `INFO` output (`key:value` lines, `#` section headers) into a map
pub fn parse_server_info(info: &str) -> HashMap<String, String> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
