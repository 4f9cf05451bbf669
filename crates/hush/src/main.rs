use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hush", about = "Hush: share self-destructing secrets", version)]
struct Cli {
    /// Hush server URL (default: http://localhost:8080 or $HUSH_SERVER)
    #[arg(long, env = "HUSH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Admin bearer token, only needed for `prune` ($HUSH_TOKEN)
    #[arg(long, env = "HUSH_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a secret and print its id
    Create {
        /// Message to share; read from stdin when omitted or `-`
        message: Option<String>,
        /// Require this passphrase to open the secret (6–64 characters)
        #[arg(long)]
        passphrase: Option<String>,
        /// Number of times the secret can be opened (1–30, default 1)
        #[arg(long)]
        reads: Option<u32>,
        /// Lifetime e.g. 30m, 1h, 7d (default 24h, max 7d)
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Open a secret by id or share URL, spending one read
    Open {
        /// Secret id, or a URL ending in the id
        target: String,
        /// Passphrase, if the secret was created with one
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Delete expired secrets on the server immediately
    Prune,
    /// Check that the server is reachable
    Health,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // A local .env may carry HUSH_SERVER / HUSH_TOKEN.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HUSH_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_owned();

    match cli.command {
        Commands::Create {
            message,
            passphrase,
            reads,
            ttl,
        } => cmd_create(&server, message, passphrase, reads, ttl.as_deref()).await,

        Commands::Open { target, passphrase } => {
            cmd_open(&server, &target, passphrase.as_deref()).await
        }

        Commands::Prune => {
            let token = require_token(&cli.token)?;
            cmd_prune(&server, &token).await
        }

        Commands::Health => cmd_health(&server).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreatedItem {
    id: String,
    access_count: u32,
    expires_in: u64,
}

#[derive(Deserialize)]
struct OpenedItem {
    message: String,
    remaining_access: u32,
    expires_in: u64,
}

async fn cmd_create(
    server: &str,
    message: Option<String>,
    passphrase: Option<String>,
    reads: Option<u32>,
    ttl: Option<&str>,
) -> Result<()> {
    let message = match message.as_deref() {
        None | Some("-") => read_stdin()?,
        Some(m) => m.to_owned(),
    };
    let expiry_seconds = ttl.map(parse_duration).transpose()?;

    let body = serde_json::json!({
        "message": message,
        "passphrase": passphrase,
        "access_count": reads,
        "expiry_seconds": expiry_seconds,
    });

    let resp = Client::new()
        .post(format!("{server}/api/secrets"))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let created: CreatedItem = parse_success(resp).await?;
    println!("{}", created.id);
    eprintln!(
        "✓ opens {} time(s), expires in {}",
        created.access_count,
        format_duration(created.expires_in)
    );
    Ok(())
}

async fn cmd_open(server: &str, target: &str, passphrase: Option<&str>) -> Result<()> {
    let id = extract_id(target)?;
    debug!(id, "opening secret");

    let client = Client::new();
    let resp = match passphrase {
        Some(p) => client
            .post(format!("{server}/api/secrets/redeem"))
            .json(&serde_json::json!({ "id": id, "passphrase": p })),
        None => client.get(format!("{server}/api/secrets/{id}")),
    }
    .send()
    .await
    .context("HTTP request failed")?;

    let opened: OpenedItem = parse_success(resp).await?;
    println!("{}", opened.message);
    if opened.remaining_access == 0 {
        eprintln!("✓ final read: the secret has been destroyed");
    } else {
        eprintln!(
            "✓ {} read(s) left, expires in {}",
            opened.remaining_access,
            format_duration(opened.expires_in)
        );
    }
    Ok(())
}

async fn cmd_prune(server: &str, token: &str) -> Result<()> {
    let resp = Client::new()
        .post(format!("{server}/api/prune"))
        .bearer_auth(token)
        .send()
        .await
        .context("HTTP request failed")?;

    let json: Value = parse_success(resp).await?;
    let n = json["pruned"].as_u64().unwrap_or(0);
    println!("pruned {n} expired secret(s)");
    Ok(())
}

async fn cmd_health(server: &str) -> Result<()> {
    let resp = Client::new()
        .get(format!("{server}/health"))
        .send()
        .await
        .context("HTTP request failed")?;

    let json: Value = parse_success(resp).await?;
    println!(
        "ok: {} secret(s) stored",
        json["secrets"].as_u64().unwrap_or(0)
    );
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_token(token: &Option<String>) -> Result<String> {
    token
        .clone()
        .context("--token / HUSH_TOKEN is required for this command")
}

/// Decode a success body, or turn the server's `{"error": ...}` into an error.
async fn parse_success<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp.json().await.context("parse response");
    }
    let json: Value = resp.json().await.unwrap_or_default();
    match json["error"].as_str() {
        Some(error) => anyhow::bail!("{error} ({status})"),
        None => anyhow::bail!("server returned {status}"),
    }
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read message from stdin")?;
    let trimmed = buf.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        anyhow::bail!("no message given on the command line or stdin");
    }
    Ok(trimmed.to_owned())
}

/// Accept a bare id or anything whose last path segment is the id.
fn extract_id(target: &str) -> Result<&str> {
    let id = target
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if id.len() != 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("not a secret id or share URL: {target}");
    }
    Ok(id)
}

/// Parse human duration strings like "1h", "30m", "7d", "5s" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
