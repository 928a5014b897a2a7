//! mesh-daemon: one node of the client mesh.
//!
//! Accepts client WebSocket connections, routes envelopes between them and
//! gossips membership with the other nodes over SWIM.

use anyhow::Result;
use clap::Parser;
use mesh_core::NodeId;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mesh_daemon::DaemonConfig;

#[derive(Parser, Debug)]
#[command(name = "mesh-daemon")]
#[command(about = "Client mesh coordination daemon")]
struct Args {
    /// Directory holding config.json (and the data directory by default)
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    /// Address to listen on for client connections (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// UDP port for SWIM traffic (overrides config)
    #[arg(long)]
    swim_port: Option<u16>,

    /// Node ID (generated if not provided)
    #[arg(long)]
    node_id: Option<NodeId>,

    /// SWIM address of a node to join; may be repeated
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// Nominate this node as main node
    #[arg(long)]
    main: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mesh_daemon=debug,mesh_core=debug"
    } else {
        "info,mesh_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting mesh-daemon");

    let mut config = DaemonConfig::load(&args.config_dir)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(port) = args.swim_port {
        config.mesh.swim_port = port;
    }
    if args.node_id.is_some() {
        config.node_id = args.node_id;
    }
    config.mesh.seeds.extend(args.seeds);
    config.mesh.is_main_node |= args.main;

    info!("Listen address: {}", config.listen);
    info!("SWIM address: {}", config.swim_bind_addr());
    info!("Data directory: {:?}", config.data_dir);

    let daemon = mesh_daemon::start(config).await?;

    info!("Daemon running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    daemon.shutdown().await;
    Ok(())
}
