//! claw-worker - IronClaw Worker service daemon.

use clap::Parser;
use claw_worker::{ledger::LedgerEmitter, model::ModelClient, runner::Runner, server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "claw-worker", about = "IronClaw Worker service")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "IRONCLAW_WORKER_PORT", default_value_t = 8012)]
    port: u16,

    /// Root directory containing the theaters.
    #[arg(long, env = "IRONCLAW_THEATER_ROOT", default_value = "theaters")]
    theater_root: PathBuf,

    /// Base URL of the Ledger service.
    #[arg(long, env = "IRONCLAW_LEDGER_URL", default_value = "http://127.0.0.1:8010")]
    ledger_url: String,

    /// Base URL of the chat-completion API.
    #[arg(
        long,
        env = "IRONCLAW_MODEL_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    model_base_url: String,

    /// API key for the chat-completion API.
    #[arg(long, env = "IRONCLAW_MODEL_API_KEY", default_value = "")]
    model_api_key: String,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let runner = Arc::new(Runner::new(
        LedgerEmitter::new(args.ledger_url),
        ModelClient::new(args.model_base_url, args.model_api_key),
    ));

    server::start_server(runner, args.theater_root, args.port)
        .await
        .map_err(|e| eyre::eyre!("server error: {e}"))?;
    Ok(())
}
