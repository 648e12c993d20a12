// Intelligent Cache Policies
// Adaptive TTLs, generated tags and size estimates derived from observed access

use chrono::Duration;

/// TTL used when a key has no usable access history
pub const DEFAULT_TTL_SECS: u64 = 3600;
/// Shortest adaptive TTL
pub const MIN_TTL_SECS: u64 = 300;
/// Longest adaptive TTL
pub const MAX_TTL_SECS: u64 = 86_400;

/// Tag carried by every entry written through the intelligent cache
pub const INTELLIGENT_TAG: &str = "intelligent-cache";

/// TTL close to the expected gap before the next read: mean interval clamped
/// to [`MIN_TTL_SECS`, `MAX_TTL_SECS`]
pub fn optimal_ttl(intervals_secs: &[f64]) -> u64 {
    if intervals_secs.is_empty() {
        return DEFAULT_TTL_SECS;
    }

    let mean = intervals_secs.iter().sum::<f64>() / intervals_secs.len() as f64;
    if !mean.is_finite() {
        return DEFAULT_TTL_SECS;
    }
    (mean.round() as u64).clamp(MIN_TTL_SECS, MAX_TTL_SECS)
}

/// Expected wait until the next read; one hour without history
pub fn estimate_next_access(intervals_secs: &[f64]) -> Duration {
    if intervals_secs.is_empty() {
        return Duration::seconds(DEFAULT_TTL_SECS as i64);
    }
    let mean = intervals_secs.iter().sum::<f64>() / intervals_secs.len() as f64;
    Duration::milliseconds((mean * 1000.0).round() as i64)
}

/// Tags for an entry: the marker tag, the namespace, the key's own prefix
/// (text before the first `:`) and the user when known
pub fn generate_tags(namespace: &str, key: &str, user_context: Option<&str>) -> Vec<String> {
    let mut tags = vec![INTELLIGENT_TAG.to_string(), namespace.to_string()];

    if let Some((prefix, _)) = key.split_once(':') {
        if !prefix.is_empty() && prefix != namespace {
            tags.push(prefix.to_string());
        }
    }

    if let Some(user) = user_context {
        tags.push(user_tag(user));
    }

    tags
}

/// Tag grouping everything a user touched
pub fn user_tag(user_context: &str) -> String {
    format!("user:{}", user_context)
}

/// Payload size estimate in bytes: the last observed size when known,
/// otherwise a guess from the kind of key. `key` is the bare key, without
/// its namespace.
pub fn estimate_data_size(key: &str, last_size: Option<usize>) -> usize {
    if let Some(size) = last_size {
        return size;
    }

    if key.contains("track") {
        1024 * 1024
    } else if key.contains("user") {
        1024
    } else if key.contains("playlist") {
        10 * 1024
    } else {
        1024
    }
}
