// Logging Setup
// tracing subscriber installation for the library and the admin CLI

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::utils::error::{CacheError, Result};

/// RUST_LOG wins over the configured default level
fn filter_for(level: tracing::Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

fn parse_level(raw: &str) -> Result<tracing::Level> {
    raw.trim()
        .parse::<tracing::Level>()
        .map_err(|e| CacheError::config(format!("Invalid log level '{}': {}", raw, e)))
}

/// Initialize logging with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_level(tracing::Level::INFO)
}

/// Initialize human readable logging at `level`
pub fn init_logging_with_level(level: tracing::Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .with(filter_for(level))
        .try_init()
        .map_err(|e| CacheError::config(format!("Failed to initialize logging: {}", e)))
}

/// Initialize JSON-lines logging at `level`, for log shippers
pub fn init_json_logging(level: tracing::Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false),
        )
        .with(filter_for(level))
        .try_init()
        .map_err(|e| CacheError::config(format!("Failed to initialize JSON logging: {}", e)))
}

/// Initialize logging from the `[logging]` settings section
pub fn init_from_settings(settings: &LoggingSettings) -> Result<()> {
    let level = parse_level(&settings.level)?;
    if settings.json {
        init_json_logging(level)
    } else {
        init_logging_with_level(level)
    }
}
