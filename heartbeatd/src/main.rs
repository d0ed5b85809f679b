mod broker;
mod config;
mod docker;
mod error;
mod heartbeat_loop;
mod topology;

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use shared::HeartbeatEncoder;
use crate::broker::amqp::AmqpConnector;
use crate::broker::provision::provision;
use crate::broker::{connect_with_retry, Broker, RetryPolicy};
use crate::config::Config;
use crate::docker::{ControlSocketClient, DockerStatusChecker};
use crate::heartbeat_loop::{HeartbeatLoop, LoopSettings};
use crate::topology::fingerprint::fingerprint;
use crate::topology::Topology;

const DEFAULT_CONFIG_PATH: &str = "/etc/heartbeatd/heartbeatd.toml";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run(PathBuf),
    Provision(PathBuf),
    CheckTopology(Option<PathBuf>),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Command {
    let first = args.next();
    let second = args.next().map(PathBuf::from);
    let config_or_default = |path: Option<PathBuf>| path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match first.as_deref() {
        Some("run") => Command::Run(config_or_default(second)),
        Some("provision") => Command::Provision(config_or_default(second)),
        Some("check-topology") => Command::CheckTopology(second),
        Some(path) => Command::Run(PathBuf::from(path)),
        None => Command::Run(config_or_default(None)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("heartbeatd=info"))
        )
        .init();

    match parse_args(std::env::args().skip(1)) {
        Command::Run(path) => run(load_config(&path)?).await,
        Command::Provision(path) => provision_topology(load_config(&path)?).await,
        Command::CheckTopology(path) => check_topology(path.as_deref()),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

fn load_topology(path: Option<&Path>) -> Result<Topology> {
    match path {
        Some(path) => Topology::load(path),
        None => Topology::builtin().context("Built-in topology is invalid"),
    }
}

async fn run(config: Config) -> Result<()> {
    let identity = config.monitor.resolve_identity()?;
    tracing::info!(%identity, "Starting heartbeatd");

    let client = ControlSocketClient::new(config.monitor.socket_path.clone(), config.monitor.read_timeout());
    tracing::info!(socket = %client.socket_path().display(), "Querying container runtime");
    let encoder = HeartbeatEncoder::new(config.monitor.schema, identity.clone(), config.monitor.report_down);
    let heartbeat = HeartbeatLoop::new(
        AmqpConnector::new(config.broker.clone()),
        DockerStatusChecker::new(client),
        config.monitor.services.clone(),
        encoder,
        LoopSettings::from_config(&config, identity),
        RetryPolicy::from(&config.broker),
    );
    let state = heartbeat.subscribe();

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    let mut loop_handle = tokio::spawn(heartbeat.run(cancel.clone()));

    tokio::select! {
        result = &mut loop_handle => {
            // The loop only returns on its own when the broker was never reached
            result
                .context("Heartbeat loop panicked")?
                .context("Failed to connect to broker")?;
            return Ok(());
        }
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("Shutdown signal received");
        }
    }

    cancel.cancel();
    loop_handle
        .await
        .context("Heartbeat loop panicked")?
        .context("Failed to connect to broker")?;

    let final_state = *state.borrow();
    tracing::info!(state = %final_state, "Shutdown complete");
    Ok(())
}

async fn provision_topology(config: Config) -> Result<()> {
    let topology = load_topology(config.topology.path.as_deref())?;
    let connector = AmqpConnector::new(config.broker.clone());

    let broker = connect_with_retry(&connector, &RetryPolicy::from(&config.broker))
        .await
        .context("Failed to connect to broker")?;

    let result = provision(&broker, &topology).await;
    broker.close().await;

    let report = result.context("Provisioning aborted")?;
    tracing::info!(
        fingerprint = %fingerprint(&topology),
        queues = report.queues,
        "Provisioning complete"
    );
    Ok(())
}

fn check_topology(path: Option<&Path>) -> Result<()> {
    let topology = load_topology(path)?;
    topology.validate().context("Topology is invalid")?;

    let warnings = topology.lint();
    for warning in &warnings {
        println!("warning: {}", warning);
    }
    println!(
        "{} exchanges, {} queues, {} bindings",
        topology.exchanges.len(),
        topology.queues.len(),
        topology.binding_set().len()
    );
    println!("fingerprint: {}", fingerprint(&topology));
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c"),
        _ = terminate.recv() => Ok(()),
    }
}
