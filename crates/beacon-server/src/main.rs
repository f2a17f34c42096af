//! Beacon registry node binary

use beacon_core::{init_logging, BeaconConfig, StdRngProvider, TimeProvider, WallClockTime};
use beacon_registry::{EvictionSweeper, LeaseStore, SelfPreservationMonitor};
use beacon_replication::{
    sync_from_peers, HttpPeerTransport, PeerTransport, ReplicationChannel,
};
use beacon_server::{api, AppState};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

/// Beacon registry node CLI
#[derive(Parser, Debug)]
#[command(name = "beacon-server")]
#[command(about = "Beacon service discovery registry node")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "beacon.yaml")]
    config: String,

    /// Bind address override
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    init_logging(level);

    let mut config = match BeaconConfig::from_yaml_file(&cli.config) {
        Ok(config) => {
            info!(path = %cli.config, "loaded configuration");
            config
        }
        Err(error) => {
            warn!(path = %cli.config, %error, "using default configuration");
            BeaconConfig::default()
        }
    };
    if let Some(bind) = cli.bind {
        config.node.bind_address = bind;
    }

    let node_id = match &config.node.node_id {
        Some(id) => id.clone(),
        None => hostname_node_id(&config.node.bind_address),
    };
    info!(node_id = %node_id, bind = %config.node.bind_address, "beacon node starting");

    let time: Arc<dyn TimeProvider> = Arc::new(WallClockTime);
    let monitor = Arc::new(SelfPreservationMonitor::new(
        &config.preservation,
        config.lease.renewal_interval_ms,
    ));

    let replicating = !config.replication.peers.is_empty();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let store = Arc::new(LeaseStore::new(
        time.clone(),
        monitor,
        config.delta.retention_ms,
        replicating.then_some(events_tx),
    ));

    let shutdown = Arc::new(Notify::new());
    let transport: Arc<dyn PeerTransport> = Arc::new(HttpPeerTransport::new());

    // seed from a peer before serving so we do not start empty and
    // report every instance as gone
    if replicating {
        match sync_from_peers(&store, &config.replication.peers, &transport).await {
            Ok(restored) => info!(restored, "startup registry sync complete"),
            Err(error) => warn!(%error, "startup sync failed, starting with empty registry"),
        }
    }

    let replication = if replicating {
        let channel = Arc::new(ReplicationChannel::new(
            config.replication.clone(),
            transport,
            time.clone(),
        ));
        channel.clone().start(events_rx, shutdown.clone());
        Some(channel)
    } else {
        None
    };

    let sweeper = Arc::new(EvictionSweeper::new(
        store.clone(),
        time.clone(),
        Arc::new(StdRngProvider::new()),
        config.sweep.clone(),
    ));
    sweeper.start(shutdown.clone());

    let state = AppState::new(
        store,
        replication,
        node_id,
        config.lease.duration_ms_default,
    );
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!(bind = %config.node.bind_address, "registry API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
                shutdown.notify_waiters();
            }
        })
        .await?;

    Ok(())
}

fn hostname_node_id(bind_address: &str) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "beacon-node".to_string());
    let port = bind_address.rsplit(':').next().unwrap_or("8761");
    format!("{}:{}", host, port)
}
