//! blobtier - Cache Inspection CLI
//!
//! Opens a namespaced cache root and runs one maintenance or lookup command
//! against it.
//!
//! ```text
//! blobtier --dir ~/.cache/app --namespace feeds get "GET /feeds/1"
//! blobtier --namespace feeds put "GET /feeds/1" '{"id":1}'
//! blobtier trim
//! blobtier migrate --from ~/.cache/app-v1 --to ~/.cache/app-v2
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blobtier::cache::{
    default_cache_directory, move_cache_directory, CacheBackendExt, CacheCombine, CacheConfig,
    CacheType, CacheValue, DiskCache, QueryContext, QueryOptions, StoreOptions,
};
use blobtier::error::Result;

// =============================================================================
// CLI Arguments
// =============================================================================

/// blobtier - two-tier blob cache tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Parent directory of cache roots
    #[arg(long, env = "BLOBTIER_DIR")]
    dir: Option<PathBuf>,

    /// Cache namespace (root is {dir}/{namespace})
    #[arg(long, env = "BLOBTIER_NAMESPACE", default_value = "default")]
    namespace: String,

    /// YAML configuration file
    #[arg(long, env = "BLOBTIER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show entry count, size and location
    Stats,
    /// Print the value stored for a key
    Get { key: String },
    /// Store a value (JSON if it parses, raw text otherwise)
    Put { key: String, value: String },
    /// Remove a key from the cache
    Remove { key: String },
    /// Print the file path used for a key
    Path { key: String },
    /// Remove expired entries and enforce the size budget
    Trim,
    /// Wipe the cache root
    Clear,
    /// Move a cache root, merging into an existing destination
    Migrate {
        #[arg(long)]
        from: PathBuf,
        #[arg(long)]
        to: PathBuf,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)?,
        None => CacheConfig::default(),
    };
    let directory = args.dir.clone().unwrap_or_else(default_cache_directory);

    match &args.command {
        Command::Migrate { from, to } => {
            let report = move_cache_directory(from, to)?;
            info!(
                moved = report.moved,
                skipped = report.skipped,
                failed = report.failed,
                "Migration finished"
            );
            return Ok(());
        }
        Command::Trim => {
            let disk = DiskCache::new(directory.join(&args.namespace), &config)?;
            let report = disk.trim()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "expired": report.expired,
                    "oversize": report.oversize,
                    "orphans": report.orphans,
                    "retained_size": report.retained_size,
                }))?
            );
            return Ok(());
        }
        _ => {}
    }

    let cache = Arc::new(
        CacheCombine::builder(args.namespace.clone())
            .directory(directory)
            .config(config)
            .build(),
    );
    cache.require_disk()?;

    match args.command {
        Command::Stats => {
            let size = cache.calculate_size_async().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "namespace": cache.namespace(),
                    "root": cache.disk_root().display().to_string(),
                    "file_count": size.file_count,
                    "total_size": size.total_size,
                }))?
            );
        }
        Command::Get { key } => {
            let (value, tier) = cache
                .query_async(&key, QueryOptions::default(), QueryContext::default())
                .await;
            match value.as_deref() {
                Some(CacheValue::Json(value)) => {
                    println!("{}", serde_json::to_string_pretty(value)?)
                }
                Some(CacheValue::Bytes(data)) => println!("{}", String::from_utf8_lossy(data)),
                Some(CacheValue::Opaque(_)) => println!("<opaque>"),
                None => warn!(key = %key, "Key not found"),
            }
            info!(key = %key, %tier, "Lookup finished");
        }
        Command::Put { key, value } => {
            let value = match serde_json::from_str::<serde_json::Value>(&value) {
                Ok(json) => CacheValue::json(json),
                Err(_) => CacheValue::bytes(value.into_bytes()),
            };
            cache
                .store_async(Arc::new(value), &key, StoreOptions::wait_for_disk())
                .await;
            info!(key = %key, "Stored");
        }
        Command::Remove { key } => {
            cache.remove_async(&key, CacheType::All).await;
            cache.wait_for_pending_io();
            info!(key = %key, "Removed");
        }
        Command::Path { key } => {
            if let Some(path) = cache.cache_path_for_key(&key) {
                println!("{}", path.display());
            }
        }
        Command::Clear => {
            cache.clear_async(CacheType::All).await;
            cache.wait_for_pending_io();
            info!(namespace = %cache.namespace(), "Cache cleared");
        }
        Command::Trim | Command::Migrate { .. } => {}
    }

    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
