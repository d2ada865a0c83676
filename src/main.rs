//! IoT Telemetry Agent - Main Entry Point

use clap::{Parser, Subcommand};
use iot_telemetry_agent::config::{resolve_config_path, AgentConfig, CONFIG_PATH_ENV};
use iot_telemetry_agent::error::{AgentError, AgentResult};
use iot_telemetry_agent::observability::{init_default_logging, metrics};
use iot_telemetry_agent::shadow::{MqttShadowClient, ShadowOptions};
use iot_telemetry_agent::{SystemSampler, TelemetryAgent};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Device-shadow telemetry agent
#[derive(Parser)]
#[command(name = "iot-agent")]
#[command(about = "Reports host CPU and memory to a device-shadow service")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log MQTT session details
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and report metrics until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn cli_log_level(verbose: u8, debug: bool) -> Option<Level> {
    match (verbose, debug) {
        (0, false) => None,
        (0, true) | (1, _) => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli_log_level(cli.verbose, cli.debug));

    info!("Starting IoT telemetry agent v{}", env!("CARGO_PKG_VERSION"));

    let config_path = resolve_config_path(cli.config.as_deref());
    info!("Loading configuration from: {}", config_path.display());
    let config = match AgentConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_agent(config, cli.debug).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_agent(config: AgentConfig, debug: bool) -> AgentResult<()> {
    info!(
        thing_name = %config.thing_name,
        thing_type_name = %config.thing_type_name,
        "Application starting"
    );

    let options = ShadowOptions {
        debug,
        ..ShadowOptions::default()
    };
    let (client, mut events) = MqttShadowClient::connect(&config, options)?;
    let client = Arc::new(client);

    // Subscriptions are replayed on every ConnAck
    client.register(&config.thing_name).await?;

    let mut agent = TelemetryAgent::new(&config, Arc::clone(&client), SystemSampler::new());

    let mut sigint =
        signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(AgentError::SignalError)?;
    let mut sigterm =
        signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(AgentError::SignalError)?;

    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    };

    agent.run(&mut events, shutdown).await;

    info!("Application shutdown initiated");
    if let Err(e) = client.disconnect().await {
        warn!("Error during disconnect: {}", e);
    }

    let snapshot = serde_json::to_string(&metrics().snapshot())?;
    info!(metrics = %snapshot, "Final metrics");
    Ok(())
}

fn handle_config_command(config: &AgentConfig, show: bool) -> AgentResult<()> {
    if show {
        println!("Current configuration:");
        println!("{}", serde_json::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
