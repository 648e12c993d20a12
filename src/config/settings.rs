use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::intelligent::IntelligentCacheConfig;
use crate::utils::error::{CacheError, Result};

/// Main configuration for the cache system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Remote store and envelope configuration
    pub redis: RedisSettings,
    /// Predictive layer configuration
    #[serde(default)]
    pub intelligent: IntelligentCacheConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Remote store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisSettings {
    /// Store host
    pub host: String,
    /// Store port
    pub port: u16,
    /// Optional password
    pub password: Option<String>,
    /// Logical database index
    pub db: i64,
    /// Prefix applied to every store key
    pub key_prefix: String,
    /// Default entry lifetime in seconds
    pub default_ttl: u64,
    /// Memory budget handed to the store at connect time
    pub max_memory: String,
    /// Store-side eviction policy applied at connect time
    pub eviction_policy: String,
    /// Serialized size at which payloads get compressed
    pub compression_threshold: usize,
    /// Enable payload compression
    pub enable_compression: bool,
    /// Use a cluster connection instead of a pooled single node
    pub enable_clustering: bool,
    /// Base reconnect delay in milliseconds (multiplied by the attempt number)
    pub retry_delay_ms: u64,
    /// Reconnect attempts before the store is declared unavailable
    pub max_reconnect_attempts: u32,
    /// Per-command timeout in milliseconds
    pub command_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is not set
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key_prefix: "cache:".to_string(),
            default_ttl: 3600,
            max_memory: "256mb".to_string(),
            eviction_policy: "allkeys-lru".to_string(),
            compression_threshold: 1024,
            enable_compression: true,
            enable_clustering: false,
            retry_delay_ms: 100,
            max_reconnect_attempts: 5,
            command_timeout_ms: 2000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RedisSettings {
    /// Build settings from `REDIS_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            host: std::env::var("REDIS_HOST").unwrap_or(defaults.host),
            port: env_or("REDIS_PORT", defaults.port)?,
            password: std::env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            db: env_or("REDIS_DB", defaults.db)?,
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            default_ttl: env_or("REDIS_DEFAULT_TTL", defaults.default_ttl)?,
            max_memory: std::env::var("REDIS_MAX_MEMORY").unwrap_or(defaults.max_memory),
            eviction_policy: std::env::var("REDIS_EVICTION_POLICY")
                .unwrap_or(defaults.eviction_policy),
            compression_threshold: env_or(
                "REDIS_COMPRESSION_THRESHOLD",
                defaults.compression_threshold,
            )?,
            enable_compression: env_or("REDIS_ENABLE_COMPRESSION", defaults.enable_compression)?,
            enable_clustering: env_or("REDIS_ENABLE_CLUSTERING", defaults.enable_clustering)?,
            retry_delay_ms: env_or("REDIS_RETRY_DELAY", defaults.retry_delay_ms)?,
            max_reconnect_attempts: env_or(
                "REDIS_MAX_RETRIES",
                defaults.max_reconnect_attempts,
            )?,
            command_timeout_ms: env_or("REDIS_COMMAND_TIMEOUT", defaults.command_timeout_ms)?,
        })
    }

    /// Connection URL in `redis://[:password@]host:port/db` form, password percent-encoded
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password),
                self.host,
                self.port,
                self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Per-command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Base delay between reconnect attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Validate the store settings
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CacheError::config("Redis host is required"));
        }
        if self.port == 0 {
            return Err(CacheError::config("Redis port must be non-zero"));
        }
        if self.default_ttl == 0 {
            return Err(CacheError::config("Default TTL must be greater than 0"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(CacheError::config(
                "Max reconnect attempts must be greater than 0",
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(CacheError::config("Command timeout must be greater than 0"));
        }
        Ok(())
    }
}

impl CacheSettings {
    /// Load settings from the environment (a `.env` file is read first when present)
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut settings = Self {
            redis: RedisSettings::from_env()?,
            ..Self::default()
        };
        if let Ok(level) = std::env::var("CACHE_LOG_LEVEL") {
            settings.logging.level = level;
        }
        settings.logging.json = env_or("CACHE_LOG_JSON", settings.logging.json)?;
        settings.intelligent.cache_warmup_enabled = env_or(
            "CACHE_WARMUP_ENABLED",
            settings.intelligent.cache_warmup_enabled,
        )?;

        Ok(settings)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.into())?;
        let settings: CacheSettings = toml::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse config file: {}", e)))?;
        Ok(settings)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: Into<PathBuf>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CacheError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.into(), content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.redis.validate()?;
        self.intelligent.validate()?;
        Ok(())
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| CacheError::config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
