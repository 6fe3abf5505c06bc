//! Tidelog - replicated write-ahead log and shard placement for a distributed
//! time-series database.
//!
//! Every shard ("route") of the database owns a segmented, memory-mapped
//! write-ahead log. Routes are placed on cluster members with a consistent
//! hash ring; the first member chosen leads the route and the others follow
//! it by pulling log records over HTTP. Leaders track how far each follower
//! has read, keep an in-sync replica (ISR) set, and expose a commit offset
//! that only covers records every in-sync follower holds.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Tidelog                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC: fetch | write | replica push | route | ISR | table    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WalManager: placement | assignment | failover | pullers    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Cluster Connector: membership | coordinator | route table  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WAL: segments | follower offsets | ISR | commit offset     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use tidelog::config::TidelogConfig;
//!
//! #[tokio::main]
//! async fn main() -> tidelog::Result<()> {
//!     // Single-node development setup
//!     let config = TidelogConfig::development();
//!
//!     // Serve until SIGINT/SIGTERM
//!     tidelog::run(config).await
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod observability;
pub mod repair;
pub mod resilience;
pub mod routing;
pub mod rpc;
pub mod shutdown;
pub mod types;
pub mod wal;

// Re-exports
pub use cluster::{ClusterConnector, RecordSink, WalManager};
pub use error::{Result, TidelogError};
pub use types::*;
pub use wal::{Wal, WalRead};

use cluster::{build_connector, HubConnector, MembershipHub};
use config::{ConnectorConfig, TidelogConfig};
use rpc::ReplicationClient;
use shutdown::{ShutdownCoordinator, SignalHandler};
use std::sync::Arc;
use tracing::info;

/// Run a tidelog node with the given configuration.
pub async fn run(config: TidelogConfig) -> Result<()> {
    observability::init(&config.observability)?;
    config.validate()?;

    let local = config.local_node();
    info!(node = %local, wal_dir = %config.wal.dir.display(), "Starting tidelog node");
    std::fs::create_dir_all(&config.wal.dir)?;

    let connector: Arc<dyn ClusterConnector> = match &config.cluster.connector {
        // a private hub makes a standalone node
        ConnectorConfig::Embedded => Arc::new(HubConnector::new(MembershipHub::new())),
        ConnectorConfig::Static { .. } => {
            build_connector(&config.cluster, ReplicationClient::new(&config.network)?)?
        }
    };

    let bind_addr = format!("{}:{}", config.node.address, config.node.port);
    let manager = WalManager::new(config, connector)?;
    let addr = manager.serve(&bind_addr).await?;
    manager.start().await?;

    let coordinator = ShutdownCoordinator::new();
    let signals = tokio::spawn(SignalHandler::new(coordinator.clone()).run());

    info!(addr = %addr, "Tidelog node ready");
    coordinator.wait_for_shutdown().await;

    info!("Shutting down tidelog gracefully...");
    manager.stop().await?;
    signals.abort();

    info!("Tidelog shutdown complete");
    Ok(())
}
