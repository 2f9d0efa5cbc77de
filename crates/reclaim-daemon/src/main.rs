//! Reclaim Daemon - standalone host for the reclaim memory subsystem.
//!
//! Runs the pressure monitor, profile adjuster and cleanup schedules against
//! the local machine until interrupted. Useful for observing how the
//! subsystem reacts to real memory pressure.

use anyhow::{Context, Result};
use clap::Parser;
use reclaim_core::{ReclaimConfig, ReclaimRuntime};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_DIR_NAME: &str = "reclaim";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Parser, Debug)]
#[command(name = "reclaim-daemon")]
#[command(about = "Memory-pressure-aware cache and cleanup daemon")]
struct Args {
    /// Configuration file (defaults to <config dir>/reclaim/config.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    /// Print every event as a JSON line on stdout
    #[arg(long)]
    emit_events: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load the configuration. An explicit path must exist; the default path
/// is optional.
fn load_config(explicit: Option<&Path>, fallback: Option<&Path>) -> Result<ReclaimConfig> {
    if let Some(path) = explicit {
        return ReclaimConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    match fallback {
        Some(path) if path.exists() => ReclaimConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        _ => Ok(ReclaimConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json);

    let config = load_config(args.config.as_deref(), default_config_path().as_deref())?;

    if args.print_config {
        // Intentional stdout: the config is the program output.
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("Starting reclaim daemon");

    let runtime = ReclaimRuntime::builder(config).build()?;

    let event_printer = args.emit_events.then(|| {
        let mut events = runtime.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event printer lagged, {} events dropped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    runtime.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown();
    if let Some(printer) = event_printer {
        printer.abort();
    }

    let cache = runtime.cache().stats();
    let cleanup = runtime.orchestrator().stats();
    info!(
        "Final stats: cache {:.1}/{:.1} MB, {} items, hit rate {:.2}; {} cleanups freed {} bytes",
        cache.current_cache_size_mb(),
        cache.max_cache_size_mb(),
        cache.item_count,
        cache.hit_rate(),
        cleanup.total_cleanups,
        cleanup.total_memory_freed
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["reclaim-daemon", "--debug", "--config", "/tmp/r.json"]);
        assert!(args.debug);
        assert!(!args.json);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/r.json")));
    }

    #[test]
    fn test_missing_default_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(None, Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config, ReclaimConfig::default());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.json")), None).is_err());
    }

    #[test]
    fn test_explicit_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_cache_size_mb": 256, "adaptive_profiles": false }"#)
            .unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.max_cache_size_mb, 256);
        assert!(!config.adaptive_profiles);
    }
}
