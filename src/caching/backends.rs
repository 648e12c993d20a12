// Redis Store Adapter
// Pooled single-node connections via deadpool-redis, or a cluster connection when clustering is enabled

use super::store::StoreAdapter;
use crate::config::RedisSettings;
use crate::utils::error::{CacheError, Result};
use async_trait::async_trait;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::FromRedisValue;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Compare-and-set on the raw value, so a concurrent write or delete is never overwritten
const REPLACE_IF_UNCHANGED: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SETEX', KEYS[1], ARGV[2], ARGV[3])
    return 1
end
return 0
";

/// Redis-backed store adapter
pub struct RedisStore {
    /// Adapter name
    name: String,
    /// Connection backend
    backend: Backend,
}

enum Backend {
    /// Single node behind a connection pool
    Pooled(deadpool_redis::Pool),
    /// Cluster connection, created on first use and dropped after connectivity errors
    Cluster {
        client: ClusterClient,
        connection: Mutex<Option<ClusterConnection>>,
    },
}

impl RedisStore {
    /// Create a store for the given settings. Connections are established lazily.
    pub fn new(settings: &RedisSettings) -> Result<Self> {
        let url = settings.connection_url();

        let backend = if settings.enable_clustering {
            info!("Using Redis cluster mode with seed node {}:{}", settings.host, settings.port);
            let client = ClusterClient::new(vec![url])
                .map_err(|e| CacheError::config(format!("Invalid Redis cluster config: {}", e)))?;
            Backend::Cluster {
                client,
                connection: Mutex::new(None),
            }
        } else {
            let pool_config = deadpool_redis::Config::from_url(url);
            let pool = pool_config
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .map_err(|e| CacheError::config(format!("Failed to create Redis pool: {}", e)))?;
            Backend::Pooled(pool)
        };

        Ok(Self {
            name: format!("redis://{}:{}/{}", settings.host, settings.port, settings.db),
            backend,
        })
    }

    async fn query<T>(&self, command: &redis::Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        match &self.backend {
            Backend::Pooled(pool) => {
                let mut conn = pool.get().await?;
                Ok(command.query_async(&mut conn).await?)
            }
            Backend::Cluster { .. } => {
                let mut conn = self.cluster_connection().await?;
                let result = command.query_async(&mut conn).await;
                self.settle_cluster(result).await
            }
        }
    }

    async fn query_pipeline(&self, pipeline: &mut redis::Pipeline) -> Result<()> {
        match &self.backend {
            Backend::Pooled(pool) => {
                let mut conn = pool.get().await?;
                pipeline.atomic();
                let _: () = pipeline.query_async(&mut conn).await?;
                Ok(())
            }
            Backend::Cluster { .. } => {
                // MULTI cannot span hash slots, so cluster batches stay non-atomic
                let mut conn = self.cluster_connection().await?;
                let result: redis::RedisResult<()> = pipeline.query_async(&mut conn).await;
                self.settle_cluster(result).await
            }
        }
    }

    async fn cluster_connection(&self) -> Result<ClusterConnection> {
        let Backend::Cluster { client, connection } = &self.backend else {
            return Err(CacheError::config("Not a cluster backend"));
        };

        let mut slot = connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = client.get_async_connection().await?;
        debug!("Opened Redis cluster connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn settle_cluster<T>(&self, result: redis::RedisResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = CacheError::from(e);
                if err.is_connectivity() {
                    if let Backend::Cluster { connection, .. } = &self.backend {
                        *connection.lock().await = None;
                    }
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl StoreAdapter for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set_ex(&self, key: &str, ttl_seconds: u64, value: &[u8]) -> Result<()> {
        self.query(redis::cmd("SETEX").arg(key).arg(ttl_seconds).arg(value))
            .await
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &[u8],
        ttl_seconds: u64,
        value: &[u8],
    ) -> Result<bool> {
        let replaced: i64 = self
            .query(
                redis::cmd("EVAL")
                    .arg(REPLACE_IF_UNCHANGED)
                    .arg(1)
                    .arg(key)
                    .arg(expected)
                    .arg(ttl_seconds)
                    .arg(value),
            )
            .await?;
        Ok(replaced == 1)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("MGET").arg(keys)).await
    }

    async fn set_ex_batch(&self, entries: &[(String, Vec<u8>)], ttl_seconds: u64) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut pipeline = redis::pipe();
        for (key, value) in entries {
            pipeline
                .cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds)
                .arg(value.as_slice())
                .ignore();
        }
        self.query_pipeline(&mut pipeline).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(delta)).await
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.query(redis::cmd("EXPIRE").arg(key).arg(ttl_seconds))
            .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let _: i64 = self.query(redis::cmd("SADD").arg(key).arg(member)).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.query(redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        if matches!(self.backend, Backend::Cluster { .. }) {
            warn!("KEYS in cluster mode only scans the node serving the request");
        }
        self.query(redis::cmd("KEYS").arg(pattern)).await
    }

    async fn config_set(&self, parameter: &str, value: &str) -> Result<()> {
        self.query(redis::cmd("CONFIG").arg("SET").arg(parameter).arg(value))
            .await
    }

    async fn info(&self, section: &str) -> Result<String> {
        self.query(redis::cmd("INFO").arg(section)).await
    }

    async fn dbsize(&self) -> Result<u64> {
        self.query(&redis::cmd("DBSIZE")).await
    }

    async fn flushdb(&self) -> Result<()> {
        self.query(&redis::cmd("FLUSHDB")).await
    }

    async fn quit(&self) -> Result<()> {
        match &self.backend {
            Backend::Pooled(pool) => pool.close(),
            Backend::Cluster { connection, .. } => {
                *connection.lock().await = None;
            }
        }
        info!("Closed Redis store: {}", self.name);
        Ok(())
    }
}
