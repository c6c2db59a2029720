//! Replica process.
//!
//! ```bash
//! # launcher style: <simulator port> <id> <peer ids...>
//! kestrelkv-server 40123 0001 0000 0002 0003 0004
//!
//! # from a YAML file
//! kestrelkv-server --config kestrel.yaml
//!
//! # from KESTREL_NODE_ID / KESTREL_PORT / KESTREL_PEERS
//! kestrelkv-server
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use kestrelkv_server::config::ServerConfig;
use kestrelkv_server::node::Node;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one replica of the kestrel key-value store")]
struct Cli {
    /// UDP port of the simulator every datagram is sent to
    port: Option<u16>,

    /// This replica's id
    id: Option<String>,

    /// Ids of the other replicas
    peers: Vec<String>,

    /// Load configuration from a YAML file instead
    #[arg(long, conflicts_with_all = ["port", "id", "peers"])]
    config: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid --log-level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match (&cli.config, cli.port, &cli.id) {
        (Some(path), _, _) => {
            tracing::info!("Loading configuration from: {}", path);
            ServerConfig::load_from_file(path)?
        }
        (None, Some(port), Some(id)) => ServerConfig::from_args(port, id.clone(), cli.peers)?,
        (None, Some(_), None) => anyhow::bail!("missing replica id after port"),
        (None, None, _) => {
            tracing::info!("No arguments, loading configuration from environment");
            ServerConfig::load_from_env()?
        }
    };

    let node = Node::start(config).await?;
    tracing::info!("kestrelkv replica is ready");

    // Wait for shutdown signal (SIGINT/SIGTERM)
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, gracefully shutting down...");

    node.shutdown().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
