//! claw-vault - IronClaw Vault service daemon.

use clap::Parser;
use claw_vault::{manager::WorktreeManager, server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "claw-vault", about = "IronClaw Vault service")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "IRONCLAW_VAULT_PORT", default_value_t = 8011)]
    port: u16,

    /// Root directory containing the theaters.
    #[arg(long, env = "IRONCLAW_THEATER_ROOT", default_value = "theaters")]
    theater_root: PathBuf,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let manager = Arc::new(WorktreeManager::new(args.theater_root));

    server::start_server(manager, args.port)
        .await
        .map_err(|e| eyre::eyre!("server error: {e}"))?;
    Ok(())
}
