// In-Memory Store Adapter
// Process-local stand-in for the remote store with TTL expiry, outage simulation and glob key scans

use super::clock::{system_clock, SharedClock};
use super::store::StoreAdapter;
use crate::utils::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory store adapter
pub struct MemoryStore {
    /// Store name
    name: String,
    /// Stored values
    storage: RwLock<HashMap<String, StoredValue>>,
    /// Time source for expiry
    clock: SharedClock,
    /// Whether the store currently accepts commands
    online: AtomicBool,
    /// Artificial latency added to every command, in milliseconds
    latency_ms: AtomicU64,
    /// Configuration applied through CONFIG SET
    server_config: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

impl StoredValue {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    fn size(&self, key: &str) -> usize {
        key.len()
            + match &self.value {
                Value::Bytes(bytes) => bytes.len(),
                Value::Set(members) => members.iter().map(|m| m.len()).sum(),
            }
    }
}

impl MemoryStore {
    /// Create a new in-memory store using the system clock
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, system_clock())
    }

    /// Create a new in-memory store driven by the given clock
    pub fn with_clock(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            storage: RwLock::new(HashMap::new()),
            clock,
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            server_config: RwLock::new(HashMap::new()),
        }
    }

    /// Simulate the store going away or coming back
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        debug!("Memory store {} online={}", self.name, online);
    }

    /// Whether the store is accepting commands
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Add artificial latency to every command
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Write raw bytes without expiry, bypassing the envelope format
    pub async fn insert_raw(&self, key: &str, value: &[u8]) {
        let mut storage = self.storage.write().await;
        storage.insert(
            key.to_string(),
            StoredValue {
                value: Value::Bytes(value.to_vec()),
                expires_at: None,
            },
        );
    }

    /// Remaining time to live of a key, if it has one
    pub async fn ttl(&self, key: &str) -> Option<ChronoDuration> {
        let now = self.clock.now();
        let storage = self.storage.read().await;
        storage
            .get(key)
            .filter(|v| !v.is_expired(now))
            .and_then(|v| v.expires_at)
            .map(|at| at - now)
    }

    /// Value applied through CONFIG SET
    pub async fn config_value(&self, parameter: &str) -> Option<String> {
        self.server_config.read().await.get(parameter).cloned()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let storage = self.storage.read().await;
        storage.values().filter(|v| !v.is_expired(now)).count()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn check(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.is_online() {
            return Err(CacheError::connection(format!(
                "Memory store {} is offline",
                self.name
            )));
        }
        Ok(())
    }

    fn expiry(&self, ttl_seconds: u64) -> Option<DateTime<Utc>> {
        Some(self.clock.now() + ChronoDuration::seconds(ttl_seconds as i64))
    }

    /// Drop the key if it has expired, returning the live value otherwise
    fn live<'a>(
        storage: &'a mut HashMap<String, StoredValue>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut StoredValue> {
        if storage.get(key).map(|v| v.is_expired(now)).unwrap_or(false) {
            storage.remove(key);
        }
        storage.get_mut(key)
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        self.check().await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check().await?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        match Self::live(&mut storage, key, now) {
            Some(StoredValue {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(CacheError::store(
                "GET",
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            )),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, ttl_seconds: u64, value: &[u8]) -> Result<()> {
        self.check().await?;
        if ttl_seconds == 0 {
            return Err(CacheError::store("SETEX", "invalid expire time in 'setex' command"));
        }
        let expires_at = self.expiry(ttl_seconds);
        let mut storage = self.storage.write().await;
        storage.insert(
            key.to_string(),
            StoredValue {
                value: Value::Bytes(value.to_vec()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &[u8],
        ttl_seconds: u64,
        value: &[u8],
    ) -> Result<bool> {
        self.check().await?;
        if ttl_seconds == 0 {
            return Err(CacheError::store("SETEX", "invalid expire time in 'setex' command"));
        }
        let now = self.clock.now();
        let expires_at = self.expiry(ttl_seconds);
        let mut storage = self.storage.write().await;

        let unchanged = matches!(
            Self::live(&mut storage, key, now),
            Some(StoredValue {
                value: Value::Bytes(current),
                ..
            }) if current.as_slice() == expected
        );
        if !unchanged {
            return Ok(false);
        }

        storage.insert(
            key.to_string(),
            StoredValue {
                value: Value::Bytes(value.to_vec()),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check().await?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        let mut removed = 0;
        for key in keys {
            if let Some(value) = storage.remove(key) {
                if !value.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check().await?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;
        Ok(Self::live(&mut storage, key, now).is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check().await?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        Ok(keys
            .iter()
            .map(|key| match Self::live(&mut storage, key, now) {
                Some(StoredValue {
                    value: Value::Bytes(bytes),
                    ..
                }) => Some(bytes.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set_ex_batch(&self, entries: &[(String, Vec<u8>)], ttl_seconds: u64) -> Result<()> {
        self.check().await?;
        if ttl_seconds == 0 {
            return Err(CacheError::store("SETEX", "invalid expire time in 'setex' command"));
        }
        let expires_at = self.expiry(ttl_seconds);
        let mut storage = self.storage.write().await;
        for (key, value) in entries {
            storage.insert(
                key.clone(),
                StoredValue {
                    value: Value::Bytes(value.clone()),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.check().await?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        let (current, expires_at) = match Self::live(&mut storage, key, now) {
            Some(StoredValue {
                value: Value::Bytes(bytes),
                expires_at,
            }) => {
                let parsed = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| {
                        CacheError::store("INCRBY", "value is not an integer or out of range")
                    })?;
                (parsed, *expires_at)
            }
            Some(_) => {
                return Err(CacheError::store(
                    "INCRBY",
                    "WRONGTYPE Operation against a key holding the wrong kind of value",
                ))
            }
            None => (0, None),
        };

        let next = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::store("INCRBY", "increment or decrement would overflow"))?;
        storage.insert(
            key.to_string(),
            StoredValue {
                value: Value::Bytes(next.to_string().into_bytes()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.check().await?;
        let now = self.clock.now();
        let expires_at = self.expiry(ttl_seconds);
        let mut storage = self.storage.write().await;

        match Self::live(&mut storage, key, now) {
            Some(value) => {
                value.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.check().await?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        match Self::live(&mut storage, key, now) {
            Some(StoredValue {
                value: Value::Set(members),
                ..
            }) => {
                members.insert(member.to_string());
                Ok(())
            }
            Some(_) => Err(CacheError::store(
                "SADD",
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            )),
            None => {
                let mut members = HashSet::new();
                members.insert(member.to_string());
                storage.insert(
                    key.to_string(),
                    StoredValue {
                        value: Value::Set(members),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check().await?;
        let now = self.clock.now();
        let mut storage = self.storage.write().await;

        match Self::live(&mut storage, key, now) {
            Some(StoredValue {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(CacheError::store(
                "SMEMBERS",
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            )),
            None => Ok(Vec::new()),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check().await?;
        let now = self.clock.now();
        let storage = self.storage.read().await;

        let mut matched: Vec<String> = storage
            .iter()
            .filter(|(key, value)| !value.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn config_set(&self, parameter: &str, value: &str) -> Result<()> {
        self.check().await?;
        let mut config = self.server_config.write().await;
        config.insert(parameter.to_string(), value.to_string());
        Ok(())
    }

    async fn info(&self, section: &str) -> Result<String> {
        self.check().await?;
        let now = self.clock.now();
        let storage = self.storage.read().await;

        let used_memory: usize = storage
            .iter()
            .filter(|(_, v)| !v.is_expired(now))
            .map(|(k, v)| v.size(k))
            .sum();
        let config = self.server_config.read().await;
        let policy = config
            .get("maxmemory-policy")
            .cloned()
            .unwrap_or_else(|| "noeviction".to_string());

        Ok(format!(
            "# {}\r\nused_memory:{}\r\nused_memory_human:{}B\r\nmaxmemory_policy:{}\r\n",
            capitalize(section),
            used_memory,
            used_memory,
            policy
        ))
    }

    async fn dbsize(&self) -> Result<u64> {
        self.check().await?;
        let now = self.clock.now();
        let storage = self.storage.read().await;
        Ok(storage.values().filter(|v| !v.is_expired(now)).count() as u64)
    }

    async fn flushdb(&self) -> Result<()> {
        self.check().await?;
        self.storage.write().await.clear();
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        Ok(())
    }
}

fn capitalize(section: &str) -> String {
    let mut chars = section.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Redis-style glob matching supporting `*`, `?`, `[...]` classes and `\` escapes
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            let rest = &pattern[1..];
            (0..=text.len()).any(|skip| glob_match_from(rest, &text[skip..]))
        }
        Some('?') => !text.is_empty() && glob_match_from(&pattern[1..], &text[1..]),
        Some('[') => {
            let Some(&c) = text.first() else {
                return false;
            };
            match match_class(&pattern[1..], c) {
                Some((matched, consumed)) => {
                    matched && glob_match_from(&pattern[1 + consumed..], &text[1..])
                }
                // Unterminated class is treated as a literal '['
                None => c == '[' && glob_match_from(&pattern[1..], &text[1..]),
            }
        }
        Some('\\') if pattern.len() > 1 => {
            !text.is_empty() && text[0] == pattern[1] && glob_match_from(&pattern[2..], &text[1..])
        }
        Some(&p) => !text.is_empty() && text[0] == p && glob_match_from(&pattern[1..], &text[1..]),
    }
}

/// Match `c` against a class body (after '['); returns (matched, chars consumed incl. ']')
fn match_class(class: &[char], c: char) -> Option<(bool, usize)> {
    let negated = class.first() == Some(&'^');
    let mut i = usize::from(negated);
    let mut matched = false;

    while i < class.len() {
        match class[i] {
            ']' => return Some((matched != negated, i + 1)),
            '\\' if i + 1 < class.len() => {
                matched |= class[i + 1] == c;
                i += 2;
            }
            lo if i + 2 < class.len() && class[i + 1] == '-' && class[i + 2] != ']' => {
                let hi = class[i + 2];
                matched |= lo <= c && c <= hi;
                i += 3;
            }
            other => {
                matched |= other == c;
                i += 1;
            }
        }
    }
    None
}
