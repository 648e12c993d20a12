// Access Pattern Tracking
// Per-key, per-user access counters, bounded access histories and session key lists

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Session id used when a caller does not supply one
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// Identity of a tracked cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackedKey {
    pub namespace: String,
    pub key: String,
}

impl TrackedKey {
    pub fn new<N: Into<String>, K: Into<String>>(namespace: N, key: K) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for TrackedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

/// How one user context has been reading one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPattern {
    pub user_context: String,
    /// Session of the most recent access
    pub session_id: String,
    /// Accesses recorded for this user
    pub frequency: u64,
    /// Most recent access
    pub recency: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
}

/// Everything recorded about one key
#[derive(Debug, Clone, Default)]
pub struct KeyActivity {
    pub patterns: Vec<AccessPattern>,
    /// Access timestamps, oldest first, bounded by the tracker's history limit
    pub history: VecDeque<DateTime<Utc>>,
    /// Serialized size of the last value written through the intelligent cache
    pub last_size: Option<usize>,
}

impl KeyActivity {
    /// Accesses summed across all users
    pub fn total_frequency(&self) -> u64 {
        self.patterns.iter().map(|p| p.frequency).sum()
    }

    pub fn latest_access(&self) -> Option<DateTime<Utc>> {
        self.patterns.iter().map(|p| p.recency).max()
    }

    /// Gaps between consecutive recorded accesses, in seconds
    pub fn intervals(&self) -> Vec<f64> {
        self.history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(earlier, later)| {
                later.signed_duration_since(*earlier).num_milliseconds().max(0) as f64 / 1000.0
            })
            .collect()
    }

    fn users(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.user_context.as_str())
    }
}

#[derive(Debug, Clone)]
struct SessionActivity {
    /// Keys visited, in first-visit order, without duplicates
    keys: Vec<TrackedKey>,
    last_seen: DateTime<Utc>,
}

/// In-process record of who read what and when
#[derive(Debug)]
pub struct AccessTracker {
    activity: HashMap<TrackedKey, KeyActivity>,
    sessions: HashMap<String, SessionActivity>,
    max_history: usize,
}

impl AccessTracker {
    pub fn new(max_history: usize) -> Self {
        Self {
            activity: HashMap::new(),
            sessions: HashMap::new(),
            max_history: max_history.max(2),
        }
    }

    /// Record one read of `key` by `user_context`
    pub fn record(
        &mut self,
        key: &TrackedKey,
        user_context: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let activity = self.activity.entry(key.clone()).or_default();
        let session = session_id.unwrap_or(ANONYMOUS_SESSION);

        match activity
            .patterns
            .iter_mut()
            .find(|p| p.user_context == user_context)
        {
            Some(pattern) => {
                pattern.frequency += 1;
                pattern.recency = now;
                pattern.session_id = session.to_string();
            }
            None => activity.patterns.push(AccessPattern {
                user_context: user_context.to_string(),
                session_id: session.to_string(),
                frequency: 1,
                recency: now,
                first_seen: now,
            }),
        }

        activity.history.push_back(now);
        while activity.history.len() > self.max_history {
            activity.history.pop_front();
        }

        if let Some(session_id) = session_id {
            let session = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionActivity {
                    keys: Vec::new(),
                    last_seen: now,
                });
            session.last_seen = now;
            if !session.keys.contains(key) {
                session.keys.push(key.clone());
            }
        }
    }

    /// Remember the serialized size of a value written for `key`
    pub fn record_size(&mut self, key: &TrackedKey, size: usize) {
        if let Some(activity) = self.activity.get_mut(key) {
            activity.last_size = Some(size);
        }
    }

    pub fn activity(&self, key: &TrackedKey) -> Option<&KeyActivity> {
        self.activity.get(key)
    }

    pub fn is_tracked(&self, key: &TrackedKey) -> bool {
        self.activity.contains_key(key)
    }

    pub fn tracked_keys(&self) -> impl Iterator<Item = &TrackedKey> {
        self.activity.keys()
    }

    pub fn key_count(&self) -> usize {
        self.activity.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Keys visited in a session, in first-visit order
    pub fn session_keys(&self, session_id: &str) -> Vec<TrackedKey> {
        self.sessions
            .get(session_id)
            .map(|s| s.keys.clone())
            .unwrap_or_default()
    }

    /// Share of the other sessions that wander into this key's neighbourhood.
    ///
    /// The neighbourhood is every key visited by a session that visited `key`.
    /// Zero when no session touched the key or every session did.
    pub fn user_similarity(&self, key: &TrackedKey) -> f64 {
        let touching: HashSet<&str> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.keys.contains(key))
            .map(|(id, _)| id.as_str())
            .collect();
        if touching.is_empty() {
            return 0.0;
        }

        let neighbourhood: HashSet<&TrackedKey> = touching
            .iter()
            .filter_map(|id| self.sessions.get(*id))
            .flat_map(|s| s.keys.iter())
            .collect();

        let others: Vec<&SessionActivity> = self
            .sessions
            .iter()
            .filter(|(id, _)| !touching.contains(id.as_str()))
            .map(|(_, s)| s)
            .collect();
        if others.is_empty() {
            return 0.0;
        }

        let similar = others
            .iter()
            .filter(|s| s.keys.iter().any(|k| neighbourhood.contains(k)))
            .count();
        (similar as f64 / others.len() as f64).min(1.0)
    }

    /// Overlap of the user contexts reading two keys, in [0, 1]
    pub fn pattern_similarity(&self, a: &TrackedKey, b: &TrackedKey) -> f64 {
        let (Some(a), Some(b)) = (self.activity.get(a), self.activity.get(b)) else {
            return 0.0;
        };
        if a.patterns.is_empty() || b.patterns.is_empty() {
            return 0.0;
        }

        let b_users: HashSet<&str> = b.users().collect();
        let common = a.users().filter(|u| b_users.contains(u)).count();
        common as f64 / a.patterns.len().max(b.patterns.len()) as f64
    }

    /// Keys likely to be read next after `key`: other keys of the same
    /// session first, then keys read by the same set of users
    pub fn related_keys(
        &self,
        key: &TrackedKey,
        session_id: Option<&str>,
        min_similarity: f64,
        limit: usize,
    ) -> Vec<TrackedKey> {
        let mut related: Vec<TrackedKey> = Vec::new();

        if let Some(session) = session_id.and_then(|id| self.sessions.get(id)) {
            related.extend(session.keys.iter().filter(|k| *k != key).cloned());
        }

        let mut similar: Vec<&TrackedKey> = self
            .activity
            .keys()
            .filter(|other| *other != key && !related.contains(*other))
            .filter(|other| self.pattern_similarity(key, other) >= min_similarity)
            .collect();
        similar.sort();
        related.extend(similar.into_iter().cloned());

        related.truncate(limit);
        related
    }

    /// Drop patterns last seen before `now - retention`, then keys left
    /// without patterns and sessions idle for as long. Returns the number of
    /// keys removed.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let cutoff = now - retention;
        let before = self.activity.len();

        self.activity.retain(|_, activity| {
            activity.patterns.retain(|p| p.recency >= cutoff);
            activity.history.retain(|at| *at >= cutoff);
            !activity.patterns.is_empty()
        });

        let activity = &self.activity;
        self.sessions.retain(|_, session| {
            session.keys.retain(|k| activity.contains_key(k));
            session.last_seen >= cutoff && !session.keys.is_empty()
        });

        before - self.activity.len()
    }

    pub fn clear(&mut self) {
        self.activity.clear();
        self.sessions.clear();
    }
}
