use thiserror::Error;

/// Result type alias for the cache system
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types for the cache system
#[derive(Error, Debug)]
pub enum CacheError {
    /// Remote store unreachable or connection lost mid-operation
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Store call exceeded the command timeout
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Reconnection attempts exhausted or connection closed
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// Store replied with an error that is not a connectivity problem
    #[error("Store error: {command}: {message}")]
    Store { command: String, message: String },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload compression/decompression errors
    #[error("Compression error: {message}")]
    Compression { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// File system errors
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Generic errors
    #[error("Cache error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl CacheError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a new unavailable error
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a new store error
    pub fn store<S: Into<String>>(command: S, message: S) -> Self {
        Self::Store {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a new compression error
    pub fn compression<S: Into<String>>(message: S) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Check if this error means the store connection is gone
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CacheError::Connection { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Connection { .. } | CacheError::Timeout { .. }
        )
    }

    /// Check if this error is a decode problem with a stored entry
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(
            self,
            CacheError::Serialization(_) | CacheError::Compression { .. }
        )
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            CacheError::connection(e.to_string())
        } else {
            let command = e.code().unwrap_or("redis").to_string();
            CacheError::store(command, e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CacheError::connection(format!("Failed to get connection: {}", e))
    }
}
