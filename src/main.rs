//! VibeBridge - Kafka cluster-to-cluster topic bridge
//!
//! Usage:
//!   vibebridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vibebridge::bridge::RouteSupervisor;
use vibebridge::client::KafkaConnector;
use vibebridge::config::Config;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages, including every forwarded message
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// VibeBridge - Kafka topic bridge
#[derive(Parser, Debug)]
#[command(name = "vibebridge")]
#[command(author = "VibeMQ Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Forwards messages between topics on different Kafka clusters")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise env overrides on defaults
    let loaded = match &args.config {
        Some(config_path) => Config::load(config_path),
        None => Config::from_env(),
    };
    let config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let routes = config.build_routes()?;

    info!("Starting VibeBridge");
    for (name, address) in &config.clusters {
        info!("  Cluster {}: {}", name, address);
    }
    for route in &routes {
        info!("  Route: {}", route);
    }
    info!(
        "  Partitioning: {:?}, restart: {:?}, delivery: {:?}",
        config.engine.partitioning, config.restart.policy, config.delivery.policy
    );
    if routes.is_empty() {
        warn!("No routes configured, nothing to forward");
    }

    let connector = Arc::new(KafkaConnector::new(
        config.kafka.clone(),
        config.engine.close_timeout,
    ));
    let supervisor = Arc::new(RouteSupervisor::from_config(&config, connector));
    supervisor.spawn_all(routes);

    let signal_supervisor = supervisor.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}, shutting down", e),
        }
        signal_supervisor.shutdown();
    });

    // Drains delivery feedback until shutdown
    supervisor.run().await;

    info!("VibeBridge stopped");
    Ok(())
}
