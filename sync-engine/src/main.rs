//! filing-sync binary entry point.
//!
//! Usage:
//! ```bash
//! filing-sync                                  # full or incremental run
//! filing-sync --since 2024-06-01T00:00:00Z     # manual run
//! filing-sync --config /etc/filing-sync.toml
//! filing-sync --history 10                     # show recent runs
//! ```
//!
//! Prints the result as JSON on stdout and logs to stderr (`RUST_LOG`
//! controls the level, default `info`). Exits non-zero when the run fails.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use filing_sync_engine::config::Config;
use filing_sync_engine::{SqliteStore, SyncEngine, SyncStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "filing-sync.toml";

/// Incrementally sync rate filings into a local SQLite store.
#[derive(Parser, Debug)]
#[command(name = "filing-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: filing-sync.toml, if present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Only pull records modified after this RFC 3339 timestamp
    #[arg(long, value_parser = parse_since, conflicts_with = "history")]
    since: Option<DateTime<Utc>>,

    /// Print the most recent sync runs instead of syncing
    #[arg(long, value_name = "N")]
    history: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    config.apply_env();

    if let Some(limit) = cli.history {
        let store = SqliteStore::new(&config.storage.database)
            .await
            .context("Failed to open filing store")?;
        let runs = store.recent_runs(limit).await?;
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(ExitCode::SUCCESS);
    }

    let engine = SyncEngine::from_config(&config)
        .await
        .context("Failed to start sync engine")?;
    let result = engine.sync(cli.since).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Load the given file, or the default file if it exists, or defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(Config::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => Ok(Config::default()),
    }
}

fn parse_since(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn since_accepts_offsets() {
        let cli =
            Cli::try_parse_from(["filing-sync", "--since", "2024-06-01T02:00:00+02:00"]).unwrap();
        assert_eq!(cli.since, Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn since_rejects_plain_dates() {
        assert!(Cli::try_parse_from(["filing-sync", "--since", "2024-06-01"]).is_err());
    }

    #[test]
    fn history_and_since_conflict() {
        let args = ["filing-sync", "--history", "5", "--since", "2024-06-01T00:00:00Z"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn explicit_config_must_exist() {
        assert!(load_config(Some(Path::new("/nonexistent/filing-sync.toml"))).is_err());
    }
}
