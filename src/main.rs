//! Tasker - Chat-Platform Protocol Adapter
//!
//! Runs the Tasker adapter behind the WebSocket gateway.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tasker::{
    adapter::{AdapterRegistry, InboundEvent, Tasker},
    config::TaskerConfig,
    gateway::GatewayBuilder,
    logging,
    transport::HandlerTable,
};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "tasker")]
#[command(version)]
#[command(about = "Chat-platform protocol adapter")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TASKER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and load the adapter
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.json_logs);

    let config = match &cli.config {
        Some(path) => TaskerConfig::load(path)?,
        None => TaskerConfig::default(),
    };

    match cli.command {
        Commands::Serve { host, port } => {
            run_serve(config, host, port).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_serve(mut config: TaskerConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let (event_tx, event_rx) = mpsc::channel(1000);
    let tasker = Arc::new(Tasker::new(&config)?.with_events(event_tx));

    let handlers = Arc::new(HandlerTable::new());
    let registry = AdapterRegistry::new(handlers.clone());
    registry.register(tasker).await?;
    registry.load_all().await?;

    let gateway = GatewayBuilder::new()
        .config(config.gateway.clone())
        .handlers(handlers)
        .build();
    gateway.start().await?;

    tokio::spawn(log_events(event_rx));

    tracing::info!("Tasker is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    registry.destroy_all().await;
    gateway.stop().await?;

    Ok(())
}

async fn log_events(mut rx: mpsc::Receiver<InboundEvent>) {
    while let Some(event) = rx.recv().await {
        let text: String = event
            .message
            .iter()
            .filter_map(|segment| segment.as_text())
            .collect();
        tracing::info!(
            adapter = %event.adapter,
            connection = %event.connection,
            self_id = event.self_id.as_deref().unwrap_or("-"),
            post_type = %event.post_type,
            "{}",
            logging::redact(&text)
        );
    }
}

fn show_config(config: Option<&TaskerConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
