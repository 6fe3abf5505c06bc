//! Common test utilities for integration tests.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tidelog::cluster::{HubConnector, MembershipHub, WalManager};
use tidelog::config::TidelogConfig;
use tidelog::NodeKey;

// Re-export common types
pub use assertions::*;
pub use fixtures::*;

/// Find an available port for testing.
pub fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port");
    listener.local_addr().unwrap().port()
}

/// Find multiple available ports
pub fn find_available_ports(count: usize) -> Vec<u16> {
    let listeners: Vec<_> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port"))
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

/// Test environment that manages temporary directories and cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub wal_dir: PathBuf,
    pub cluster_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let wal_dir = temp_dir.path().join("wal");
        let cluster_dir = temp_dir.path().join("cluster");

        std::fs::create_dir_all(&wal_dir).expect("Failed to create wal dir");
        std::fs::create_dir_all(&cluster_dir).expect("Failed to create cluster dir");

        Self {
            temp_dir,
            wal_dir,
            cluster_dir,
        }
    }

    /// Creates a sub-directory in the temp dir
    pub fn subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdir");
        path
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-process cluster: managers joined through one membership hub, each
/// serving the replication RPC on its own port.
pub struct TestCluster {
    pub env: TestEnv,
    pub hub: Arc<MembershipHub>,
    pub nodes: Vec<Arc<WalManager>>,
    /// Replay sink of each node, in start order.
    pub sinks: Vec<Arc<CollectingSink>>,
}

impl TestCluster {
    pub async fn start(size: usize) -> Self {
        Self::start_with(size, |_| {}).await
    }

    /// Starts `size` members in order; the first one coordinates.
    pub async fn start_with<F>(size: usize, tweak: F) -> Self
    where
        F: Fn(&mut TidelogConfig),
    {
        let env = TestEnv::new();
        let hub = MembershipHub::new();
        let mut nodes = Vec::with_capacity(size);
        let mut sinks = Vec::with_capacity(size);

        for port in find_available_ports(size) {
            let mut config = node_config(&env.wal_dir, port);
            tweak(&mut config);
            let manager = WalManager::new(config, Arc::new(HubConnector::new(hub.clone())))
                .expect("Failed to create manager");
            let sink = CollectingSink::new();
            let manager = manager
                .with_sink(sink.clone())
                .with_bucket_source(MemoryBucketSource::new());
            manager
                .serve(&format!("127.0.0.1:{}", port))
                .await
                .expect("Failed to bind RPC");
            manager.start().await.expect("Failed to start manager");
            nodes.push(manager);
            sinks.push(sink);
        }

        Self {
            env,
            hub,
            nodes,
            sinks,
        }
    }

    pub fn coordinator(&self) -> Arc<WalManager> {
        self.nodes
            .iter()
            .find(|n| !n.is_stopped() && n.is_coordinator())
            .cloned()
            .expect("No coordinator")
    }

    pub fn node(&self, key: NodeKey) -> Arc<WalManager> {
        self.nodes
            .iter()
            .find(|n| n.local_node().key == key)
            .cloned()
            .expect("Unknown node")
    }

    pub fn sink(&self, key: NodeKey) -> Arc<CollectingSink> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.local_node().key == key)
            .expect("Unknown node");
        self.sinks[pos].clone()
    }

    pub async fn stop(&self) {
        for node in &self.nodes {
            node.stop().await.expect("Failed to stop manager");
        }
    }
}

/// Wait for a server to be ready by polling a health endpoint.
pub async fn wait_for_server(addr: &str, timeout_secs: u64) -> bool {
    let client = reqwest::Client::new();
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if let Ok(response) = client.get(&format!("http://{}/health", addr)).send().await {
            if response.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}
