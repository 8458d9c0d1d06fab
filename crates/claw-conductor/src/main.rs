//! claw-conductor - IronClaw Conductor (CO) service daemon.

use clap::Parser;
use claw_conductor::clients::{LedgerClient, VaultClient, WorkerClient};
use claw_conductor::logic::{Conductor, ConductorConfig};
use claw_conductor::server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "claw-conductor", about = "IronClaw Conductor service")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "IRONCLAW_CO_PORT", default_value_t = 8013)]
    port: u16,

    /// Base URL of the Ledger service.
    #[arg(long, env = "IRONCLAW_LEDGER_URL", default_value = "http://127.0.0.1:8010")]
    ledger_url: String,

    /// Base URL of the Vault service.
    #[arg(long, env = "IRONCLAW_VAULT_URL", default_value = "http://127.0.0.1:8011")]
    vault_url: String,

    /// Base URL of the Worker service.
    #[arg(long, env = "IRONCLAW_WORKER_URL", default_value = "http://127.0.0.1:8012")]
    worker_url: String,

    /// Default theater for requests that do not name one.
    #[arg(long, env = "IRONCLAW_THEATER", default_value = "demo")]
    theater: String,

    /// Root directory containing the theaters.
    #[arg(long, env = "IRONCLAW_THEATER_ROOT", default_value = "theaters")]
    theater_root: PathBuf,

    /// Keep worktrees after successful orders instead of archiving them.
    #[arg(long, env = "IRONCLAW_KEEP_WORKTREE", default_value_t = false)]
    keep_worktree: bool,

    /// Default stall threshold passed to the Worker, in seconds.
    #[arg(long, env = "IRONCLAW_STALL_SECONDS", default_value_t = 300)]
    stall_seconds: u64,

    /// Default hard timeout passed to the Worker, in seconds.
    #[arg(long, env = "IRONCLAW_HARD_TIMEOUT_SECONDS", default_value_t = 900)]
    hard_timeout_seconds: u64,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let conductor = Arc::new(Conductor::new(
        LedgerClient::new(args.ledger_url),
        VaultClient::new(args.vault_url),
        WorkerClient::new(args.worker_url),
        ConductorConfig {
            theater: args.theater,
            theater_root: args.theater_root,
            keep_worktree: args.keep_worktree,
            stall_seconds: args.stall_seconds,
            hard_timeout_seconds: args.hard_timeout_seconds,
        },
    ));

    server::start_server(conductor, args.port)
        .await
        .map_err(|e| eyre::eyre!("server error: {e}"))?;
    Ok(())
}
