// Remote Store Adapter
// Thin async interface over the key/value commands the cache layer issues

use crate::utils::error::Result;
use async_trait::async_trait;

/// Wire-level store operations used by the cache manager.
///
/// Keys are passed fully qualified (prefix already applied). Implementations
/// must be safe to share across tasks; the manager adds no locking of its own.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// PING
    async fn ping(&self) -> Result<()>;

    /// GET
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// SETEX key ttl value
    async fn set_ex(&self, key: &str, ttl_seconds: u64, value: &[u8]) -> Result<()>;

    /// SETEX only if the key still holds exactly `expected`, checked and
    /// written atomically. True when the value was replaced.
    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &[u8],
        ttl_seconds: u64,
        value: &[u8],
    ) -> Result<bool>;

    /// DEL key... returning the number of keys actually removed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// EXISTS
    async fn exists(&self, key: &str) -> Result<bool>;

    /// MGET, one slot per requested key
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Pipelined batch of SETEX sharing one TTL
    async fn set_ex_batch(&self, entries: &[(String, Vec<u8>)], ttl_seconds: u64) -> Result<()>;

    /// INCRBY
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// EXPIRE, true when the key existed
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool>;

    /// SADD
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// SMEMBERS
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// KEYS pattern (O(keyspace), administrative use only)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// CONFIG SET parameter value
    async fn config_set(&self, parameter: &str, value: &str) -> Result<()>;

    /// INFO section
    async fn info(&self, section: &str) -> Result<String>;

    /// DBSIZE
    async fn dbsize(&self) -> Result<u64>;

    /// FLUSHDB
    async fn flushdb(&self) -> Result<()>;

    /// QUIT / release connections
    async fn quit(&self) -> Result<()>;
}
