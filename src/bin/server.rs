//! Tidelog server binary.

use clap::Parser;
use std::path::PathBuf;
use tidelog::config::{ConnectorConfig, TidelogConfig};

#[derive(Parser)]
#[command(name = "tidelog-server")]
#[command(about = "Replicated write-ahead log node")]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, env = "TIDELOG_CONFIG")]
    config: Option<PathBuf>,

    /// Advertised and bound address
    #[arg(long, env = "TIDELOG_ADDRESS")]
    address: Option<String>,

    /// Replication RPC port
    #[arg(short, long, env = "TIDELOG_PORT")]
    port: Option<u16>,

    /// Root directory of route logs
    #[arg(long, env = "TIDELOG_WAL_DIR")]
    wal_dir: Option<PathBuf>,

    /// Static peers (format: host:port,host:port)
    #[arg(long, env = "TIDELOG_PEERS")]
    peers: Option<String>,

    /// Coordinator endpoint for static membership
    #[arg(long, env = "TIDELOG_COORDINATOR")]
    coordinator: Option<String>,

    /// Log level or filter directive
    #[arg(long, env = "TIDELOG_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let mut config = if let Some(config_path) = args.config {
        TidelogConfig::from_file(&config_path)?
    } else {
        TidelogConfig::development()
    };

    // Override with CLI args
    if let Some(address) = args.address {
        config.node.address = address;
    }
    if let Some(port) = args.port {
        config.node.port = port;
    }
    if let Some(wal_dir) = args.wal_dir {
        config.wal.dir = wal_dir;
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    if args.peers.is_some() || args.coordinator.is_some() {
        let peers = args
            .peers
            .map(|p| {
                p.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        // without a coordinator the lowest node key coordinates
        config.cluster.connector = ConnectorConfig::Static {
            bootstrap: false,
            coordinator: args.coordinator,
            peers,
        };
    }

    // Run the server
    tidelog::run(config).await?;

    Ok(())
}
