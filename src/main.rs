//! Tracker Relay - cluster tracker polling and trigger replication
//!
//! The head node polls the tracking server and broadcasts trigger transitions;
//! every other node only applies what it receives.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry};

use tracker_relay::cluster::{ClusterNode, ClusterRoleGate, MonitorSettings};
use tracker_relay::config::{AppConfig, ConfigWatcher, LoggingConfig};
use tracker_relay::motion::PoseAccumulator;
use tracker_relay::replication::UdpReplicationChannel;
use tracker_relay::tracker::{SampleCache, TrackerClient, TrackerFeed};

/// Tracker Relay - poll a tracker on the head node and replicate its trigger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Identity of this machine (defaults to the host name)
    #[arg(long, env = "TRACKER_RELAY_NODE_ID")]
    node_id: Option<String>,

    /// Print the resolved cluster role and exit
    #[arg(long)]
    print_role: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_file = init_logging(&args.log_level)?;

    info!("Starting Tracker Relay...");
    info!("Configuration file: {}", args.config);

    // Load configuration with hot-reload watcher
    let (config_watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    let _log_guard = attach_log_file(&log_file, &initial_config.logging)?;

    let node_id = resolve_node_id(args.node_id.as_deref())?;
    let gate = ClusterRoleGate::new(&node_id, &initial_config.cluster.head_node);

    if args.print_role {
        println!("{} {}", gate.node_id(), gate.role());
        return Ok(());
    }

    run_app(gate, (*initial_config).clone(), config_watcher, shutdown_signal()).await?;

    info!("Tracker Relay shutdown complete");
    Ok(())
}

async fn run_app(
    gate: ClusterRoleGate,
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let channel = Arc::new(
        UdpReplicationChannel::bind(config.cluster.bind, config.cluster.peers.clone()).await?,
    );

    // The feed only exists on the head; followers never touch the tracker
    let cache = Arc::new(SampleCache::new(config.tracker.stale_after()));
    let mut feed = if gate.role().is_head() {
        Some(TrackerFeed::start(config.tracker.feed_bind, cache.clone()).await?)
    } else {
        None
    };

    let sink = Arc::new(PoseAccumulator::new());
    let settings = MonitorSettings {
        address: config.tracker.address.clone(),
        channel: config.channel.clone(),
        movement: config.movement.clone(),
        sink: sink.clone(),
        debug_output: config.logging.debug_output,
    };

    let node = gate.start(channel, settings, move || cache as Arc<dyn TrackerClient>);
    info!("Node running as {}", node.role());

    let mut active = config;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(new_config) = config_watcher.next_config() => {
                info!("Configuration reloaded");
                apply_config(&node, &active, &new_config);
                active = new_config;
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    let stats = node.bridge().stats();
    info!(
        "Replication stats: sent={} send_failures={} received={} applied={} lost={} stale={}",
        stats.sent, stats.send_failures, stats.received, stats.applied, stats.lost, stats.stale
    );
    debug!("Final position: {:?}", sink.position());

    node.shutdown();
    if let Some(feed) = feed.as_mut() {
        feed.shutdown().await;
    }

    Ok(())
}

/// Push reloadable settings into the running node
fn apply_config(node: &ClusterNode, old: &AppConfig, new: &AppConfig) {
    if old.cluster != new.cluster || old.tracker != new.tracker {
        warn!("Cluster and tracker settings changes take effect after a restart");
    }

    let Some(monitor) = node.monitor() else {
        return;
    };

    if old.channel != new.channel {
        if let Err(e) = monitor.set_channel_config(new.channel.clone()) {
            warn!("Channel config not applied: {:#}", e);
        }
    }
    if old.movement != new.movement {
        if let Err(e) = monitor.set_movement_config(new.movement.clone()) {
            warn!("Movement config not applied: {:#}", e);
        }
    }
}

/// Explicit identity first, then the machine name
fn resolve_node_id(explicit: Option<&str>) -> Result<String> {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .map(|id| id.trim().to_string())
        .context("No node identity: pass --node-id or set TRACKER_RELAY_NODE_ID")
}

/// Optional file output, attached once the config is known
type FileLayer =
    Option<fmt::Layer<Registry, fmt::format::DefaultFields, fmt::format::Format, NonBlocking>>;

fn init_logging(level: &str) -> Result<reload::Handle<FileLayer, Registry>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let (file_layer, file_handle) = reload::Layer::<FileLayer, Registry>::new(None);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(file_handle)
}

fn attach_log_file(
    handle: &reload::Handle<FileLayer, Registry>,
    logging: &LoggingConfig,
) -> Result<Option<WorkerGuard>> {
    let Some(dir) = &logging.file else {
        return Ok(None);
    };

    let appender = tracing_appender::rolling::daily(dir, "tracker-relay.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    handle
        .reload(Some(layer))
        .context("Failed to attach log file")?;

    info!("Logging to {}/tracker-relay.log", dir);
    Ok(Some(guard))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
