//! Relay Watch - Tail Agent Run Event Streams
//!
//! Follows one or more run streams (or any SSE endpoint) through the shared
//! connection registry and prints every typed event as one JSON object per
//! line on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Follow two runs until both finish
//! relay-watch run run-41 run-42
//!
//! # Tail an arbitrary event stream under the id "alerts"
//! relay-watch url alerts https://agents.example.com/api/alerts/stream
//!
//! # Point at another deployment, with credentials
//! RELAY_BEARER_TOKEN=... relay-watch --base-url https://agents.example.com/api/stream run run-41
//!
//! # Verbose logging
//! RUST_LOG=debug relay-watch run run-41
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl+C): close every stream and exit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use relay_core::config::default_config_path;
use relay_core::{
    init_shared, load_config_from_path, ConfigSource, ConnectionRegistry, HttpSseTransport,
    RelayConfig, RunStreamEvent, StreamError, StreamEvent,
};

/// Relay Watch - print agent run events as JSON lines
#[derive(Parser, Debug)]
#[command(name = "relay-watch")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL for run streams (`{base}/runs/{run_id}`)
    #[arg(short = 'b', long, value_name = "URL")]
    base_url: Option<String>,

    /// Maximum concurrent streams
    #[arg(short = 'm', long, value_name = "N")]
    max_connections: Option<usize>,

    /// Give up on the first transport error instead of reconnecting
    #[arg(long)]
    no_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Follow agent runs until each completes or fails
    Run {
        /// Run identifiers
        #[arg(required = true)]
        run_ids: Vec<String>,
    },
    /// Tail an arbitrary event stream
    Url {
        /// Registry id for the stream
        id: String,
        /// Event stream URL
        url: String,
    },
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_watch={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load file and environment configuration, then apply CLI flags
fn resolve_config(args: &Args) -> Result<RelayConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path.as_deref()).context("Failed to load configuration")?;

    if let Some(ref base_url) = args.base_url {
        config.registry.run_stream_base_url = base_url.clone();
        config.set_source(ConfigSource::Cli);
    }
    if let Some(max) = args.max_connections {
        config.registry.max_connections = max;
        config.set_source(ConfigSource::Cli);
    }
    if args.no_reconnect {
        config.registry.default_options.reconnect = false;
        config.set_source(ConfigSource::Cli);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn error_json(error: &StreamError) -> Value {
    json!({
        "message": error.to_string(),
        "fatal": matches!(error, StreamError::Run { .. } | StreamError::RetriesExhausted { .. }),
    })
}

/// JSON line for a run stream event
fn run_event_json(run_id: &str, event: &RunStreamEvent) -> Value {
    match event {
        RunStreamEvent::Opened => json!({"stream": run_id, "event": "opened"}),
        RunStreamEvent::Status(run) => json!({"stream": run_id, "event": "status", "run": run}),
        RunStreamEvent::Event(inner) => json!({"stream": run_id, "event": "event", "data": inner}),
        RunStreamEvent::Complete(run) => {
            json!({"stream": run_id, "event": "complete", "run": run})
        }
        RunStreamEvent::Error(error) => {
            json!({"stream": run_id, "event": "error", "error": error_json(error)})
        }
        RunStreamEvent::StateChanged(state) => {
            json!({"stream": run_id, "event": "state", "state": state})
        }
        RunStreamEvent::Closed => json!({"stream": run_id, "event": "closed"}),
    }
}

/// JSON line for a plain stream event
fn stream_event_json(id: &str, event: &StreamEvent) -> Value {
    match event {
        StreamEvent::Opened => json!({"stream": id, "event": "opened"}),
        StreamEvent::Message(envelope) => json!({
            "stream": id,
            "event": "message",
            "type": envelope.event_type,
            "data": envelope.data,
            "id": envelope.id,
        }),
        StreamEvent::Error(error) => json!({"stream": id, "event": "error", "error": error_json(error)}),
        StreamEvent::StateChanged(state) => json!({"stream": id, "event": "state", "state": state}),
        StreamEvent::Closed => json!({"stream": id, "event": "closed"}),
    }
}

fn spawn_watchers(registry: &ConnectionRegistry, command: Command, tasks: &mut JoinSet<()>) -> Result<()> {
    match command {
        Command::Run { run_ids } => {
            for run_id in run_ids {
                let (stream, mut events) = registry
                    .create_run_stream(run_id.clone(), None)
                    .with_context(|| format!("Cannot follow run {run_id}"))?;

                tasks.spawn(async move {
                    while let Some(event) = events.recv().await {
                        println!("{}", run_event_json(&run_id, &event));
                        if let RunStreamEvent::Error(StreamError::RetriesExhausted { .. }) = event {
                            // Nobody will call connect() again
                            stream.close();
                        }
                    }
                });
            }
        }
        Command::Url { id, url } => {
            let (connection, mut events) = registry
                .create_connection(id.clone(), url, None)
                .with_context(|| format!("Cannot open stream {id}"))?;

            tasks.spawn(async move {
                while let Some(event) = events.recv().await {
                    println!("{}", stream_event_json(&id, &event));
                    if let StreamEvent::Error(StreamError::RetriesExhausted { .. }) = event {
                        connection.close();
                    }
                }
            });
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;
    info!(
        source = %config.source(),
        max_connections = config.registry.max_connections,
        base_url = %config.registry.run_stream_base_url,
        "Relay watch starting"
    );

    let transport = HttpSseTransport::new().with_bearer_token(config.bearer_token.clone());
    let registry = init_shared(ConnectionRegistry::new(config.registry, Arc::new(transport)))
        .map_err(|_| anyhow!("Shared connection registry already initialised"))?;

    let mut tasks = JoinSet::new();
    spawn_watchers(registry, args.command, &mut tasks)?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Received Ctrl+C, closing streams");
                registry.close_all();
                while tasks.join_next().await.is_some() {}
                break;
            }
            joined = tasks.join_next() => {
                match joined {
                    Some(Err(e)) => warn!(error = %e, "Watcher task failed"),
                    Some(Ok(())) => {}
                    None => break,
                }
            }
        }
    }

    info!(summary = %registry.summary(), "Relay watch finished");
    Ok(())
}
