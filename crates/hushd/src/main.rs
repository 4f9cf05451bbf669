use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "hushd",
    about = "Hushd: self-destructing secret server daemon",
    version
)]
struct Cli {
    /// Directory holding hush.db (default: $HUSH_DATA_DIR or the platform data dir)
    #[arg(long, env = "HUSH_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Hush HTTP server
    Serve {
        /// Port to listen on (default: $HUSH_PORT or 8080)
        #[arg(long, env = "HUSH_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $HUSH_HOST or 0.0.0.0)
        #[arg(long, env = "HUSH_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Log level: error, warn, info, debug, verbose (default: $HUSH_LOG_LEVEL or warn)
        #[arg(long, env = "HUSH_LOG_LEVEL")]
        log_level: Option<String>,
        /// Upper bound on a single store call, e.g. 500ms, 5s
        #[arg(long, env = "HUSH_STORE_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
        store_timeout: Duration,
    },
    /// Remove expired secrets from the database (offline). Stop the server
    /// first: the database file is locked while it runs.
    Prune,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let effective_log_level = if let Commands::Serve { ref log_level, .. } = cli.command {
        resolve_log_level(log_level.clone())
    } else {
        resolve_log_level(None)
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&effective_log_level))
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            log_level: _,
            store_timeout,
        } => cmd_serve(host, port, cli.data_dir, store_timeout, effective_log_level).await,

        Commands::Prune => cmd_prune(cli.data_dir),
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(
    host: String,
    port: u16,
    data_dir: Option<PathBuf>,
    store_timeout: Duration,
    log_level: String,
) -> Result<()> {
    let cfg = hush_server::ServerConfig {
        host,
        port,
        data_dir,
        store_timeout,
        log_level,
        ..Default::default()
    };

    hush_server::run(cfg).await
}

fn cmd_prune(data_dir: Option<PathBuf>) -> Result<()> {
    let data_dir = hush_server::resolve_data_dir(data_dir.as_ref())?;
    let db_path = data_dir.join("hush.db");
    let store = hush_server::store::Store::open(&db_path)
        .with_context(|| format!("open {} (is hushd serve still running?)", db_path.display()))?;

    let removed = store.prune()?;
    let left = store.count()?;
    println!("pruned {removed} expired secret(s), {left} remaining");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Flag, then $HUSH_LOG_LEVEL, then `warn`. `verbose` is an alias for `debug`.
fn resolve_log_level(flag: Option<String>) -> String {
    let raw = flag
        .or_else(|| std::env::var("HUSH_LOG_LEVEL").ok())
        .unwrap_or_else(|| "warn".into());
    if raw.eq_ignore_ascii_case("verbose") {
        "debug".to_owned()
    } else {
        raw
    }
}

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}
