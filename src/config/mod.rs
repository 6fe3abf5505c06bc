//! Configuration module for tidelog.

use crate::error::{Result, TidelogError};
use crate::resilience::RetryConfig;
use crate::types::Node;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default replication RPC port.
pub const DEFAULT_PORT: u16 = 55021;

/// Smallest segment that can hold the header and one empty frame.
pub const MIN_SEGMENT_SIZE: u32 = 8;

/// Main configuration for a tidelog node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TidelogConfig {
    /// Identity of this node.
    pub node: NodeConfig,
    /// Write-ahead log storage.
    pub wal: WalConfig,
    /// In-sync replica tracking.
    pub isr: IsrConfig,
    /// Membership and placement.
    pub cluster: ClusterConfig,
    /// Follower pulling.
    pub replication: ReplicationConfig,
    /// Network configuration.
    pub network: NetworkConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl TidelogConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TidelogError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            TidelogError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.address.is_empty() {
            return Err(invalid("node.address", "Address must not be empty"));
        }

        self.wal.validate()?;

        if self.isr.threshold == 0 {
            return Err(invalid("isr.threshold", "Threshold must be non-zero"));
        }

        if self.isr.check_interval.is_zero() {
            return Err(invalid("isr.check_interval", "Interval must be non-zero"));
        }

        if self.cluster.default_replication_factor == 0 {
            return Err(invalid(
                "cluster.default_replication_factor",
                "Replication factor must be at least 1",
            ));
        }

        if let ConnectorConfig::Static { peers, coordinator, .. } = &self.cluster.connector {
            for peer in peers.iter().chain(coordinator.iter()) {
                if Node::parse(peer).is_none() {
                    return Err(invalid(
                        "cluster.connector.peers",
                        &format!("'{}' is not host:port", peer),
                    ));
                }
            }
        }

        if self.replication.max_fetch_bytes == 0 {
            return Err(invalid(
                "replication.max_fetch_bytes",
                "Fetch size must be non-zero",
            ));
        }

        if self.network.retry.max_attempts == 0 {
            return Err(invalid(
                "network.retry.max_attempts",
                "At least one attempt is required",
            ));
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            node: NodeConfig {
                address: "127.0.0.1".to_string(),
                port: DEFAULT_PORT,
            },
            wal: WalConfig {
                dir: PathBuf::from("/tmp/tidelog/wal"),
                segment_size: 4 * 1024 * 1024,
                ..WalConfig::default()
            },
            isr: IsrConfig {
                commit_without_followers: true,
                ..IsrConfig::default()
            },
            cluster: ClusterConfig {
                connector: ConnectorConfig::Static {
                    coordinator: None,
                    peers: vec![],
                    bootstrap: true,
                },
                data_dir: Some(PathBuf::from("/tmp/tidelog/cluster")),
                ..ClusterConfig::default()
            },
            replication: ReplicationConfig::default(),
            network: NetworkConfig::default(),
            observability: ObservabilityConfig {
                log_level: "debug".to_string(),
                json_logs: false,
            },
        }
    }

    /// The local cluster member described by this configuration.
    pub fn local_node(&self) -> Node {
        Node::new(self.node.address.clone(), self.node.port)
    }
}

fn invalid(field: &str, reason: &str) -> TidelogError {
    TidelogError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address advertised to peers and bound by the RPC server.
    pub address: String,
    /// Replication RPC port.
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Write-ahead log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Root directory; each route gets a sub-directory.
    pub dir: PathBuf,
    /// Size of every segment file in bytes.
    pub segment_size: u32,
    /// Flush the mapped region every N writes.
    pub flush_every: Option<u32>,
    /// Delete sealed segments once every follower has read past them.
    pub deletion_enabled: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/tidelog/wal"),
            segment_size: 64 * 1024 * 1024, // 64MB
            flush_every: None,
            deletion_enabled: false,
        }
    }
}

impl WalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(invalid("wal.dir", "Directory must not be empty"));
        }

        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(invalid(
                "wal.segment_size",
                &format!("Segment size must be at least {} bytes", MIN_SEGMENT_SIZE),
            ));
        }

        if self.flush_every == Some(0) {
            return Err(invalid("wal.flush_every", "Flush interval must be non-zero"));
        }

        Ok(())
    }
}

/// In-sync replica tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsrConfig {
    /// Maximum lag in bytes for a follower to count as in sync.
    pub threshold: u64,
    /// Delay before the first recheck.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Recheck frequency.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Treat everything as committed while a log has no followers at all.
    pub commit_without_followers: bool,
}

impl Default for IsrConfig {
    fn default() -> Self {
        Self {
            threshold: 8 * 1024 * 1024, // 8MB
            initial_delay: Duration::from_secs(1),
            check_interval: Duration::from_secs(1),
            commit_without_followers: false,
        }
    }
}

/// Cluster connector selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// Membership from a static peer list.
    Static {
        /// Coordinator endpoint; the lowest node key wins when unset.
        #[serde(default)]
        coordinator: Option<String>,
        /// Other members as `host:port`.
        #[serde(default)]
        peers: Vec<String>,
        /// Start as coordinator.
        #[serde(default)]
        bootstrap: bool,
    },
    /// Membership from an in-process hub handed to the manager.
    Embedded,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig::Static {
            coordinator: None,
            peers: Vec::new(),
            bootstrap: true,
        }
    }
}

/// Placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    #[default]
    ConsistentHash,
    ModHash,
}

/// When leadership moves off a lost node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    /// Redesignate every affected route as soon as the loss is observed.
    #[default]
    Eager,
    /// Redesignate a route the next time it is written.
    OnDemand,
}

/// Membership and placement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub connector: ConnectorConfig,
    /// Factor used when a write touches an unassigned route.
    pub default_replication_factor: usize,
    pub routing: RoutingKind,
    pub failover: FailoverPolicy,
    /// How often leaders report follower ISR state to the coordinator.
    #[serde(with = "humantime_serde")]
    pub isr_report_interval: Duration,
    /// Where the coordinator persists the route table.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            default_replication_factor: 1,
            routing: RoutingKind::default(),
            failover: FailoverPolicy::default(),
            isr_report_interval: Duration::from_secs(5),
            data_dir: None,
        }
    }
}

/// Follower pull loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Upper bound on bytes returned by one fetch.
    pub max_fetch_bytes: u32,
    /// Pause after a fetch that returned nothing.
    #[serde(with = "humantime_serde")]
    pub empty_wait: Duration,
    /// Pause after a failed fetch.
    #[serde(with = "humantime_serde")]
    pub error_wait: Duration,
    /// Local consumers only see committed records.
    pub committed_only: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_fetch_bytes: 1024 * 1024, // 1MB
            empty_wait: Duration::from_millis(100),
            error_wait: Duration::from_secs(1),
            committed_only: true,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Retry policy for forwarded calls.
    pub retry: RetryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TidelogConfig::default();
        assert_eq!(config.node.port, DEFAULT_PORT);
        assert_eq!(config.isr.threshold, 8 * 1024 * 1024);
        assert_eq!(config.replication.max_fetch_bytes, 1024 * 1024);
        assert!(!config.isr.commit_without_followers);
        config.validate().unwrap();
    }

    #[test]
    fn test_development_config() {
        let config = TidelogConfig::development();
        assert!(config.isr.commit_without_followers);
        assert_eq!(config.wal.segment_size, 4 * 1024 * 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_tiny_segment() {
        let mut config = TidelogConfig::default();
        config.wal.segment_size = 4;
        match config.validate() {
            Err(TidelogError::InvalidConfig { field, .. }) => assert_eq!(field, "wal.segment_size"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_peer() {
        let mut config = TidelogConfig::default();
        config.cluster.connector = ConnectorConfig::Static {
            coordinator: None,
            peers: vec!["nohost".to_string()],
            bootstrap: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "node": { "address": "10.0.0.5", "port": 6000 },
            "wal": { "dir": "/data/wal", "segment_size": 5000, "deletion_enabled": true },
            "isr": { "threshold": 1024, "initial_delay": "50ms", "check_interval": "2s" },
            "cluster": {
                "connector": { "kind": "static", "peers": ["10.0.0.6:6000"], "coordinator": "10.0.0.5:6000" },
                "failover": "on_demand",
                "routing": "mod_hash"
            }
        }"#;

        let config: TidelogConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.node.port, 6000);
        assert_eq!(config.wal.segment_size, 5000);
        assert!(config.wal.deletion_enabled);
        assert_eq!(config.isr.initial_delay, Duration::from_millis(50));
        assert_eq!(config.isr.check_interval, Duration::from_secs(2));
        assert_eq!(config.cluster.failover, FailoverPolicy::OnDemand);
        assert_eq!(config.cluster.routing, RoutingKind::ModHash);
        assert_eq!(config.replication.empty_wait, Duration::from_millis(100));
        match config.cluster.connector {
            ConnectorConfig::Static { peers, bootstrap, .. } => {
                assert_eq!(peers, vec!["10.0.0.6:6000".to_string()]);
                assert!(!bootstrap);
            }
            other => panic!("unexpected connector: {:?}", other),
        }
    }

    #[test]
    fn test_duration_parsing() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
    }
}
