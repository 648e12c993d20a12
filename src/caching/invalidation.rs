// Cache Invalidation
// Tag index maintenance and bulk invalidation by tag or key pattern

use super::store::StoreAdapter;
use super::KeyBuilder;
use crate::utils::error::Result;
use std::collections::HashSet;
use tracing::{debug, info};

/// Inverted index from tag to the store keys carrying it.
///
/// Index sets live in the store next to the entries. Members may outlive
/// their entries; DEL only counts keys that still exist, so a stale member
/// never produces a false hit or an inflated count.
pub struct TagIndex<'a> {
    store: &'a dyn StoreAdapter,
    keys: &'a KeyBuilder,
    /// Lifetime of an index set, refreshed on every add
    index_ttl: u64,
}

impl<'a> TagIndex<'a> {
    pub fn new(store: &'a dyn StoreAdapter, keys: &'a KeyBuilder, index_ttl: u64) -> Self {
        Self {
            store,
            keys,
            index_ttl,
        }
    }

    /// Register `cache_key` under every tag and refresh each index expiry
    pub async fn add(&self, namespace: &str, cache_key: &str, tags: &[String]) -> Result<()> {
        for tag in unique(tags) {
            let tag_key = self.keys.tag_key(namespace, tag);
            self.store.sadd(&tag_key, cache_key).await?;
            self.store.expire(&tag_key, self.index_ttl).await?;
        }
        Ok(())
    }

    /// Keys currently listed under a tag
    pub async fn members(&self, namespace: &str, tag: &str) -> Result<Vec<String>> {
        self.store.smembers(&self.keys.tag_key(namespace, tag)).await
    }

    /// Delete every key listed under each tag, then the index sets themselves.
    /// Returns the number of cache entries removed.
    pub async fn invalidate(&self, namespace: &str, tags: &[String]) -> Result<u64> {
        let mut deleted = 0u64;

        for tag in unique(tags) {
            let tag_key = self.keys.tag_key(namespace, tag);
            let members = self.store.smembers(&tag_key).await?;

            if !members.is_empty() {
                let removed = self.store.del(&members).await?;
                debug!(
                    "Tag {}:{} listed {} keys, {} removed",
                    namespace,
                    tag,
                    members.len(),
                    removed
                );
                deleted += removed;
            }
            self.store.del(&[tag_key]).await?;
        }

        info!("Tag invalidation {:?} in {}: {} keys removed", tags, namespace, deleted);
        Ok(deleted)
    }
}

/// Delete every key under `namespace` matching a glob pattern.
///
/// Uses KEYS, which walks the whole keyspace: fine for administration,
/// not for hot-path invalidation.
pub async fn invalidate_pattern(
    store: &dyn StoreAdapter,
    keys: &KeyBuilder,
    namespace: &str,
    pattern: &str,
) -> Result<u64> {
    let search = keys.pattern(namespace, pattern);
    let matched = store.keys(&search).await?;
    if matched.is_empty() {
        return Ok(0);
    }

    let removed = store.del(&matched).await?;
    info!("Pattern invalidation {}: {} keys removed", search, removed);
    Ok(removed)
}

fn unique(tags: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(String::as_str)
        .filter(move |tag| seen.insert(*tag))
}
