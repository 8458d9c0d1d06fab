//! claw-ledger - IronClaw Ledger service daemon.

use clap::Parser;
use claw_ledger::{server, storage::Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "claw-ledger", about = "IronClaw Ledger service")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "IRONCLAW_LEDGER_PORT", default_value_t = 8010)]
    port: u16,

    /// Path to the SQLite database file.
    #[arg(long, env = "IRONCLAW_LEDGER_DB", default_value = "ledger.db")]
    db_path: PathBuf,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let storage = Storage::new(&args.db_path)
        .await
        .map_err(|e| eyre::eyre!("failed to open ledger database: {e}"))?;

    server::start_server(Arc::new(storage), args.port)
        .await
        .map_err(|e| eyre::eyre!("server error: {e}"))?;
    Ok(())
}
