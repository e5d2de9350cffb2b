//! CLI entry point: wires a `MeshNode` to a real TCP link layer, dials any
//! configured static peers, and prints statistics on an interval until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use embermesh::config::{ConfigFile, NodeConfig};
use embermesh::transport::tcp::TcpLinkLayer;
use embermesh::{LinkLayer, MeshNode};

#[derive(Parser, Debug)]
#[command(name = "embermesh-node", about = "Disaster-resilient mesh node")]
struct Args {
    /// Optional TOML config file; CLI flags below take priority over it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:7420.
    #[arg(long)]
    listen: Option<String>,

    /// Shared network key (truncated/padded to 16 bytes).
    #[arg(long, env = "EMBERMESH_NETWORK_KEY")]
    network_key: Option<String>,

    /// Device identifier as 12 hex characters (6 bytes). Random if omitted.
    #[arg(long)]
    device_uuid: Option<String>,

    /// Static peer addresses to dial on startup (repeatable).
    #[arg(long = "peer")]
    static_peers: Vec<String>,

    /// How often to print `get_statistics()`, in seconds.
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let file = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let config = NodeConfig::resolve(
        file,
        args.device_uuid,
        args.network_key,
        args.listen,
        args.static_peers,
        None,
    )?;
    info!(?config, "resolved node configuration");

    let link: Arc<dyn LinkLayer> = Arc::new(TcpLinkLayer::bind(&config.listen_addr).await?);
    let node = MeshNode::new(&config, link);
    let handle = node.handle();

    node.start().await;
    info!(device_uuid = %handle.device_uuid_hex(), "node started");

    for peer in &config.static_peers {
        if handle.connect_to_peer(peer).await {
            info!(peer, "connected to static peer");
        } else {
            tracing::warn!(peer, "failed to connect to static peer");
        }
    }

    let mut events = handle.subscribe_events();
    let stats_handle = handle.clone();
    let stats_interval = Duration::from_secs(args.stats_interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stats_interval);
        loop {
            ticker.tick().await;
            let stats = stats_handle.get_statistics().await;
            info!(
                peers = stats.peer_count,
                cache = stats.cache_size,
                queued = stats.queued_messages,
                "statistics"
            );
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            Ok(event) = events.recv() => {
                tracing::debug!(?event, "mesh event");
            }
        }
    }

    node.stop().await;
    Ok(())
}
