//! locotrack: command-line client for the locotrack daemon.
//!
//! ## Subcommands
//!
//! - `track`: Poll an asset on a fixed cadence and redraw its trail
//! - `snapshot`: Fetch a single snapshot and print it
//! - `health`: Report whether the daemon is reachable

mod daemon_client;
mod logging;
mod render;
mod track;

use clap::{Parser, Subcommand};
use locotrack_core::SnapshotProvider;
use std::time::Duration;

use daemon_client::DaemonClient;

#[derive(Parser)]
#[command(name = "locotrack")]
#[command(about = "Locomotive position tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track an asset until `quit` (reads start/stop/status/quit from stdin)
    Track {
        /// Asset identifier, e.g. a train number
        #[arg(value_name = "ASSET_ID")]
        asset_id: String,

        /// Seconds between polls
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: u64,
    },

    /// Fetch one snapshot
    Snapshot {
        #[arg(value_name = "ASSET_ID")]
        asset_id: String,

        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// Check that the daemon is up
    Health,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Track {
            asset_id,
            interval_secs,
        } => track::run(&asset_id, Duration::from_secs(interval_secs)),
        Commands::Snapshot { asset_id, json } => snapshot(&asset_id, json),
        Commands::Health => health(),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "locotrack failed");
        eprintln!("locotrack: {}", err);
        std::process::exit(1);
    }
}

fn snapshot(asset_id: &str, json: bool) -> Result<(), String> {
    let client = DaemonClient::from_env()?;
    let snapshot = client.fetch_snapshot(asset_id.trim())?;
    if json {
        let text = serde_json::to_string_pretty(&snapshot)
            .map_err(|err| format!("Failed to serialize snapshot: {}", err))?;
        println!("{}", text);
    } else {
        print!("{}", render::snapshot_text(asset_id.trim(), &snapshot));
    }
    Ok(())
}

fn health() -> Result<(), String> {
    let client = DaemonClient::from_env()?;
    let data = client.health()?;
    let version = data
        .get("version")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown");
    let status = data
        .get("status")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown");
    println!(
        "daemon {} (version {}) at {}",
        status,
        version,
        client.socket().display()
    );
    Ok(())
}
