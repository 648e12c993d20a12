use clap::{Parser, Subcommand};
use predictive_cache::utils::logging;
use predictive_cache::{CacheOptions, CacheSettings, RedisCacheManager};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cache-admin")]
#[command(about = "Inspect and maintain the predictive Redis cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, env = "CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the store answers and report latency
    Ping,

    /// Read a value
    Get {
        namespace: String,
        key: String,
    },

    /// Write a JSON value
    Set {
        namespace: String,
        key: String,

        /// Value as JSON (bare words are stored as strings)
        value: String,

        /// Lifetime in seconds
        #[arg(long)]
        ttl: Option<u64>,

        /// Tags (comma-separated)
        #[arg(short, long)]
        tags: Option<String>,
    },

    /// Remove a single entry
    Delete {
        namespace: String,
        key: String,
    },

    /// Remove every entry indexed under the given tags
    DeleteTags {
        namespace: String,

        /// Tags (comma-separated)
        tags: String,
    },

    /// Remove every entry whose key matches a glob pattern
    DeletePattern {
        namespace: String,
        pattern: String,
    },

    /// Add to a counter
    Incr {
        namespace: String,
        key: String,

        #[arg(short, long, default_value = "1", allow_negative_numbers = true)]
        by: i64,

        /// Lifetime in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Show cache statistics
    Stats,

    /// Drop every key in the configured database
    Clear {
        /// Confirm the flush
        #[arg(long)]
        yes: bool,
    },

    /// Write a default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "cache_config.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut settings = match &cli.config {
        Some(path) => CacheSettings::from_file(path.clone())?,
        None => CacheSettings::from_env()?,
    };
    if cli.verbose {
        settings.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    logging::init_from_settings(&settings.logging)?;

    if let Commands::Init { output } = &cli.command {
        return run_init(output).await;
    }

    settings.validate()?;
    let manager = RedisCacheManager::from_settings(settings.redis.clone()).await?;

    let result = match cli.command {
        Commands::Ping => run_ping(&manager).await,
        Commands::Get { namespace, key } => run_get(&manager, &namespace, &key).await,
        Commands::Set {
            namespace,
            key,
            value,
            ttl,
            tags,
        } => run_set(&manager, &namespace, &key, &value, ttl, tags).await,
        Commands::Delete { namespace, key } => {
            let removed = manager
                .delete(&namespace, &key, &CacheOptions::new())
                .await;
            print_json(&serde_json::json!({ "deleted": removed }))
        }
        Commands::DeleteTags { namespace, tags } => {
            let removed = manager
                .delete_by_tags(&namespace, &split_tags(&tags))
                .await;
            print_json(&serde_json::json!({ "deleted": removed }))
        }
        Commands::DeletePattern { namespace, pattern } => {
            let removed = manager.delete_by_pattern(&namespace, &pattern).await;
            print_json(&serde_json::json!({ "deleted": removed }))
        }
        Commands::Incr {
            namespace,
            key,
            by,
            ttl,
        } => {
            let mut options = CacheOptions::new();
            options.ttl = ttl;
            let value = manager.increment(&namespace, &key, by, &options).await;
            print_json(&serde_json::json!({ "value": value }))
        }
        Commands::Stats => {
            let stats = manager.get_stats().await;
            print_json(&stats)
        }
        Commands::Clear { yes } => run_clear(&manager, yes).await,
        Commands::Init { .. } => Ok(()),
    };

    manager.close().await;
    result
}

async fn run_ping(manager: &RedisCacheManager) -> anyhow::Result<()> {
    let report = manager.health_check().await;
    print_json(&report)?;
    if !report.healthy {
        anyhow::bail!("store is not reachable");
    }
    Ok(())
}

async fn run_get(manager: &RedisCacheManager, namespace: &str, key: &str) -> anyhow::Result<()> {
    if !manager.is_connected() {
        anyhow::bail!("store is not reachable");
    }

    let value: Option<serde_json::Value> = manager.get(namespace, key, &CacheOptions::new()).await;
    match value {
        Some(value) => print_json(&value),
        None => {
            println!("No entry found for {}:{}", namespace, key);
            Ok(())
        }
    }
}

async fn run_set(
    manager: &RedisCacheManager,
    namespace: &str,
    key: &str,
    raw_value: &str,
    ttl: Option<u64>,
    tags: Option<String>,
) -> anyhow::Result<()> {
    let value = serde_json::from_str::<serde_json::Value>(raw_value)
        .unwrap_or_else(|_| serde_json::Value::String(raw_value.to_string()));

    let mut options = CacheOptions::new();
    options.ttl = ttl;
    if let Some(tags) = tags {
        options.tags = split_tags(&tags);
    }

    if !manager.set(namespace, key, &value, &options).await {
        anyhow::bail!("failed to write {}:{}", namespace, key);
    }
    info!("Stored {}:{}", namespace, key);
    print_json(&serde_json::json!({ "stored": true }))
}

async fn run_clear(manager: &RedisCacheManager, confirmed: bool) -> anyhow::Result<()> {
    if !confirmed {
        warn!("Refusing to clear the cache without --yes");
        anyhow::bail!("pass --yes to flush the configured database");
    }
    let cleared = manager.clear().await;
    print_json(&serde_json::json!({ "cleared": cleared }))
}

async fn run_init(output: &Path) -> anyhow::Result<()> {
    let settings = CacheSettings::default();
    settings.save_to_file(output)?;

    println!("Created configuration file: {}", output.display());
    println!("Edit the [redis] section to point at your store.");

    Ok(())
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
