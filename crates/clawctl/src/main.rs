//! clawctl - CLI client for the IronClaw stack.

mod client;

use clap::{Parser, Subcommand};
use client::ClawClient;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "clawctl", about = "IronClaw command-line client")]
struct Cli {
    /// Conductor base URL.
    #[arg(long, env = "IRONCLAW_CO_URL", default_value = "http://127.0.0.1:8013")]
    co_url: String,

    /// Ledger base URL.
    #[arg(long, env = "IRONCLAW_LEDGER_URL", default_value = "http://127.0.0.1:8010")]
    ledger_url: String,

    /// Print raw JSON instead of the human-readable rendering.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a chat request through the Conductor.
    Chat {
        /// Message text.
        message: String,
        /// Caller request id; generated when omitted. The same id always
        /// maps to the same run/order and replays return the cached
        /// result.
        #[arg(long)]
        request_id: Option<String>,
        /// Theater to run in.
        #[arg(long)]
        theater: Option<String>,
        /// Model profile name from the theater policy.
        #[arg(long)]
        profile: Option<String>,
        /// Mission objective.
        #[arg(long)]
        objective: Option<String>,
        /// Repo-backed prompt template path (under prompts/).
        #[arg(long)]
        template: Option<String>,
        /// Model overrides as key=value (model, temperature, max_tokens,
        /// mission_type, ...).
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
        /// Keep the worktree instead of archiving it.
        #[arg(long)]
        keep_worktree: bool,
        /// Client-side timeout in seconds.
        #[arg(long, default_value_t = 930)]
        timeout: u64,
    },
    /// Show a run snapshot.
    Run { run_id: String },
    /// Show an order snapshot.
    Order { order_id: String },
    /// List events from the Ledger.
    Events {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        order_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Probe the Conductor and Ledger health endpoints.
    Health,
}

fn parse_overrides(pairs: &[String]) -> Result<serde_json::Map<String, Value>, String> {
    let mut map = serde_json::Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid override (expected KEY=VALUE): {pair}"))?;
        // Numbers and booleans pass through typed; everything else is a
        // string.
        let value = serde_json::from_str(value).unwrap_or(Value::String(value.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn render_chat(response: &Value, request_id: &str) {
    println!("{}", "=".repeat(40));
    println!("REQUEST ID: {request_id}");
    println!("STATUS    : {}", response["status"].as_str().unwrap_or("?"));
    for (label, key) in [
        ("RUN ID    ", "run_id"),
        ("ORDER ID  ", "order_id"),
        ("ORDER HEAD", "order_head"),
        ("ARCHIVE   ", "archive_path"),
    ] {
        if let Some(value) = response[key].as_str() {
            println!("{label}: {value}");
        }
    }
    if let Some(answer) = response["answer"].as_str() {
        println!("{}", "-".repeat(40));
        println!("REPLY:");
        println!("{answer}");
    } else if let Some(error) = response["error"].as_str() {
        println!("{}", "-".repeat(40));
        println!("ERROR:");
        println!("{error}");
    }
    println!("{}", "=".repeat(40));
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to render response: {e}"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = ClawClient::new(cli.co_url.clone(), cli.ledger_url.clone());

    let result = run_command(&cli, &client).await;
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_command(cli: &Cli, client: &ClawClient) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Chat {
            message,
            request_id,
            theater,
            profile,
            objective,
            template,
            overrides,
            keep_worktree,
            timeout,
        } => {
            let request_id = request_id
                .clone()
                .unwrap_or_else(|| format!("cli-{}", Uuid::new_v4()));
            let overrides = parse_overrides(overrides)?;

            let mut body = serde_json::Map::new();
            body.insert("message".to_string(), Value::String(message.clone()));
            body.insert("request_id".to_string(), Value::String(request_id.clone()));
            if let Some(theater) = theater {
                body.insert("theater".to_string(), Value::String(theater.clone()));
            }
            if let Some(profile) = profile {
                body.insert("model_profile".to_string(), Value::String(profile.clone()));
            }
            if let Some(objective) = objective {
                body.insert("objective".to_string(), Value::String(objective.clone()));
            }
            if let Some(template) = template {
                body.insert(
                    "prompt_template".to_string(),
                    Value::String(template.clone()),
                );
            }
            if !overrides.is_empty() {
                body.insert("model_overrides".to_string(), Value::Object(overrides));
            }
            if *keep_worktree {
                body.insert("keep_worktree".to_string(), Value::Bool(true));
            }

            let response = client.chat(Value::Object(body), *timeout).await?;
            if cli.json {
                print_json(&response);
            } else {
                render_chat(&response, &request_id);
            }
        }
        Commands::Run { run_id } => {
            let run = client.get_run(run_id).await?;
            print_json(&run);
        }
        Commands::Order { order_id } => {
            let order = client.get_order(order_id).await?;
            print_json(&order);
        }
        Commands::Events {
            run_id,
            order_id,
            limit,
        } => {
            let events = client
                .list_events(run_id.as_deref(), order_id.as_deref(), *limit)
                .await?;
            if cli.json {
                print_json(&events);
            } else {
                for event in &events {
                    println!(
                        "{}  {:28} run={} order={}",
                        event.ts,
                        event.event_type,
                        event.run_id.as_deref().unwrap_or("-"),
                        event.order_id.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        Commands::Health => {
            for (name, base, path) in [
                ("conductor", cli.co_url.as_str(), "/health"),
                ("ledger", cli.ledger_url.as_str(), "/health"),
            ] {
                match client.health(base, path).await {
                    Ok(body) => println!("{name:10} ok      {body}"),
                    Err(e) => println!("{name:10} DOWN    {e}"),
                }
            }
        }
    }
    Ok(())
}
