//! claw-observer - IronClaw Observer service daemon.

use clap::Parser;
use claw_observer::monitor::{Monitor, MonitorConfig};
use claw_observer::server;
use claw_observer::signals::ObserverSignals;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "claw-observer", about = "IronClaw Observer service")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "IRONCLAW_OBSERVER_PORT", default_value_t = 8014)]
    port: u16,

    /// Theater to monitor.
    #[arg(long, env = "IRONCLAW_THEATER", default_value = "demo")]
    theater: String,

    /// Base URL of the Ledger service.
    #[arg(long, env = "IRONCLAW_LEDGER_URL", default_value = "http://127.0.0.1:8010")]
    ledger_url: String,

    /// Base URL of the Vault service.
    #[arg(long, env = "IRONCLAW_VAULT_URL", default_value = "http://127.0.0.1:8011")]
    vault_url: String,

    /// Root directory containing the theaters.
    #[arg(long, env = "IRONCLAW_THEATER_ROOT", default_value = "theaters")]
    theater_root: PathBuf,

    /// Seconds without events before a running order counts as stalled.
    #[arg(long, env = "IRONCLAW_STALL_SECONDS", default_value_t = 1800)]
    stall_seconds: u64,

    /// Seconds between monitoring ticks.
    #[arg(long, env = "IRONCLAW_POLL_INTERVAL_SECONDS", default_value_t = 30)]
    poll_interval_seconds: u64,

    /// Also remove orphan worktrees through the Vault.
    #[arg(long, env = "IRONCLAW_ENABLE_VAULT_CLEANUP", default_value_t = false)]
    enable_vault_cleanup: bool,

    /// Alert dedupe window in seconds.
    #[arg(long, env = "IRONCLAW_ALERT_DEDUPE_TTL_SECONDS", default_value_t = 3600)]
    alert_dedupe_ttl_seconds: u64,
}

fn default_audit_log() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ironclaw")
        .join("observer")
        .join("alerts.jsonl")
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let signals = Arc::new(ObserverSignals::new(
        args.ledger_url.clone(),
        args.theater.clone(),
        default_audit_log(),
        Duration::from_secs(args.alert_dedupe_ttl_seconds),
    ));
    let monitor = Arc::new(Monitor::new(
        MonitorConfig {
            theater: args.theater,
            ledger_url: args.ledger_url,
            vault_url: args.vault_url,
            theater_root: args.theater_root,
            stall_seconds: args.stall_seconds,
            poll_interval_seconds: args.poll_interval_seconds,
            enable_vault_cleanup: args.enable_vault_cleanup,
            event_fetch_limit: 1000,
        },
        Arc::clone(&signals),
    ));

    // Background ticker; the HTTP surface only reads its state.
    let ticker = Arc::clone(&monitor);
    let interval = Duration::from_secs(args.poll_interval_seconds);
    tokio::spawn(async move {
        loop {
            ticker.poll().await;
            tokio::time::sleep(interval).await;
        }
    });

    server::start_server(monitor, signals, args.port)
        .await
        .map_err(|e| eyre::eyre!("server error: {e}"))?;
    Ok(())
}
