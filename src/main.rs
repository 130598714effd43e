//! Pipewatch Server
//!
//! Run with: cargo run -- serve
//!
//! # Configuration
//!
//! Read from `--config <path>`, else the first of
//! `~/.config/pipewatch/config.toml`, `/etc/pipewatch/config.toml` and
//! `./config.toml`,
//! then overridden by environment variables:
//! - `PIPEWATCH_HOST`, `PIPEWATCH_PORT`, `PIPEWATCH_MAX_CONNECTIONS`
//! - `PIPEWATCH_CHANNEL`, `PIPEWATCH_POLL_INTERVAL_MS`
//! - `PIPEWATCH_LOG_LEVEL`, `PIPEWATCH_LOG_FORMAT`
//! - `RUST_LOG`: overrides the log filter entirely

use anyhow::Context;
use clap::{Parser, Subcommand};
use pipewatch::{
    api::{serve, AppState},
    config::{generate_default_config, Config, LoggingConfig},
    install_recorder, Broker, EventBridge, MemoryPubSub, PrometheusStats, PubSub,
    StaticPermissionOracle, StaticTokenResolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pipewatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time CI/CD event notification broker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the notification server (default)
    Serve,

    /// Print a default configuration file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => {
            print!("{}", generate_default_config());
            Ok(())
        }
        Commands::Serve => {
            let config = match &cli.config {
                Some(path) => Config::load_with_env(path)
                    .with_context(|| format!("Loading {}", path.display()))?,
                None => Config::load_default().context("Loading default configuration")?,
            };
            init_tracing(&config.logging);
            run(config).await
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("pipewatch={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Pipewatch v{}", env!("CARGO_PKG_VERSION"));

    let prometheus = install_recorder().context("Installing metrics recorder")?;
    let stats = Arc::new(PrometheusStats);
    let cancel = CancellationToken::new();

    let (broker, handle) = Broker::new(&config.broker, stats.clone());
    let broker_task = tokio::spawn(broker.run(cancel.clone()));

    let pubsub = Arc::new(MemoryPubSub::default());
    let subscription = pubsub
        .subscribe(&config.bridge.channel)
        .await
        .context("Subscribing to event channel")?;
    let bridge = EventBridge::new(subscription, handle.events_sender(), &config.bridge, stats);
    let bridge_task = tokio::spawn(bridge.run(cancel.clone()));

    tracing::info!(
        channel = %config.bridge.channel,
        tokens = config.auth.tokens.len(),
        grants = config.permissions.len(),
        "Event pipeline ready"
    );

    let state = AppState::new(
        handle,
        Arc::new(StaticPermissionOracle::new(config.permissions.clone())),
        Arc::new(StaticTokenResolver::new(config.auth.tokens.clone())),
        pubsub,
        config.bridge.channel.clone(),
    )
    .with_max_connections(config.server.max_connections)
    .with_shutdown(cancel.clone())
    .with_prometheus(prometheus);

    let served = serve(state, &config.server).await;
    cancel.cancel();

    if let Err(e) = broker_task.await {
        tracing::error!(error = %e, "Broker task failed");
    }
    if let Err(e) = bridge_task.await {
        tracing::error!(error = %e, "Bridge task failed");
    }

    served?;
    tracing::info!("Pipewatch stopped");
    Ok(())
}
