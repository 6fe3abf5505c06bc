//! Membership, coordinator election and the shared route table.
//!
//! A [`ClusterConnector`] tells the manager who is in the cluster, which
//! member coordinates placement, and where the shared route table lives.
//! Two implementations exist:
//!
//! - [`StaticConnector`]: fixed peer list from configuration. The
//!   coordinator keeps the table and persists it under its data dir; other
//!   members fetch it over `GET /cluster/table`.
//! - [`HubConnector`]: joins an in-process [`MembershipHub`], which elects
//!   the earliest-joined live member and broadcasts membership changes.

use crate::config::{ClusterConfig, ConnectorConfig};
use crate::error::{Result, TidelogError};
use crate::rpc::ReplicationClient;
use crate::types::{Node, NodeKey, RouteTable};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const ROUTE_TABLE_FILE: &str = "route_table.json";
const EVENT_CAPACITY: usize = 256;

/// A change in cluster membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    NodeJoined(Node),
    NodeLeft(Node),
    CoordinatorElected(Node),
}

/// Source of membership and of the shared route table.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Registers the local node.
    async fn init(&self, local: &Node) -> Result<()>;

    fn is_coordinator(&self) -> bool;

    fn coordinator(&self) -> Option<Node>;

    fn cluster_size(&self) -> usize;

    /// Live members, the local node included.
    fn members(&self) -> Vec<Node>;

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent>;

    /// The shared route table, if one was ever written.
    async fn fetch_table(&self) -> Result<Option<RouteTable>>;

    async fn update_table(&self, table: &RouteTable) -> Result<()>;

    /// Leaves the cluster.
    async fn stop(&self) -> Result<()>;
}

/// Builds the connector selected by configuration.
///
/// The embedded connector needs a hub, so it is built with
/// [`HubConnector::new`] instead.
pub fn build_connector(
    config: &ClusterConfig,
    client: ReplicationClient,
) -> Result<Arc<dyn ClusterConnector>> {
    match &config.connector {
        ConnectorConfig::Static {
            coordinator,
            peers,
            bootstrap,
        } => {
            let peers = peers
                .iter()
                .map(|p| {
                    Node::parse(p).ok_or_else(|| TidelogError::InvalidConfig {
                        field: "cluster.connector.peers".to_string(),
                        reason: format!("'{}' is not host:port", p),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let coordinator = coordinator
                .as_deref()
                .map(|c| {
                    Node::parse(c).ok_or_else(|| TidelogError::InvalidConfig {
                        field: "cluster.connector.coordinator".to_string(),
                        reason: format!("'{}' is not host:port", c),
                    })
                })
                .transpose()?;
            Ok(Arc::new(StaticConnector::new(
                peers,
                coordinator,
                *bootstrap,
                config.data_dir.clone(),
                client,
            )))
        }
        ConnectorConfig::Embedded => Err(TidelogError::Config(
            "embedded connector requires a membership hub".to_string(),
        )),
    }
}

/// Membership from a fixed peer list.
pub struct StaticConnector {
    peers: Vec<Node>,
    configured_coordinator: Option<Node>,
    bootstrap: bool,
    data_dir: Option<PathBuf>,
    client: ReplicationClient,
    local: RwLock<Option<Node>>,
    coordinator: RwLock<Option<Node>>,
    /// Authoritative on the coordinator, a cache elsewhere.
    table: RwLock<Option<RouteTable>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl StaticConnector {
    pub fn new(
        peers: Vec<Node>,
        coordinator: Option<Node>,
        bootstrap: bool,
        data_dir: Option<PathBuf>,
        client: ReplicationClient,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            peers,
            configured_coordinator: coordinator,
            bootstrap,
            data_dir,
            client,
            local: RwLock::new(None),
            coordinator: RwLock::new(None),
            table: RwLock::new(None),
            events,
        }
    }

    fn table_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(ROUTE_TABLE_FILE))
    }

    fn load_table(&self) -> Result<Option<RouteTable>> {
        let Some(path) = self.table_path() else {
            return Ok(None);
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let table: RouteTable = serde_json::from_slice(&bytes).map_err(|e| {
            TidelogError::DataCorruption(format!("{}: {}", path.display(), e))
        })?;
        Ok(Some(table))
    }

    fn persist_table(&self, table: &RouteTable) -> Result<()> {
        let (Some(dir), Some(path)) = (self.data_dir.as_ref(), self.table_path()) else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!("{}.tmp", ROUTE_TABLE_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(table)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[async_trait]
impl ClusterConnector for StaticConnector {
    async fn init(&self, local: &Node) -> Result<()> {
        *self.local.write() = Some(local.clone());

        let coordinator = if self.bootstrap {
            local.clone()
        } else if let Some(configured) = &self.configured_coordinator {
            configured.clone()
        } else {
            self.members()
                .into_iter()
                .min_by_key(|n| n.key)
                .unwrap_or_else(|| local.clone())
        };
        *self.coordinator.write() = Some(coordinator.clone());

        if coordinator.key == local.key {
            if let Some(table) = self.load_table()? {
                info!(version = table.version, routes = table.routes.len(), "Loaded route table");
                *self.table.write() = Some(table);
            }
        }

        info!(
            local = %local,
            coordinator = %coordinator,
            peers = self.peers.len(),
            "Static membership initialised"
        );
        let _ = self.events.send(MembershipEvent::CoordinatorElected(coordinator));
        Ok(())
    }

    fn is_coordinator(&self) -> bool {
        match (&*self.local.read(), &*self.coordinator.read()) {
            (Some(local), Some(coordinator)) => local.key == coordinator.key,
            _ => false,
        }
    }

    fn coordinator(&self) -> Option<Node> {
        self.coordinator.read().clone()
    }

    fn cluster_size(&self) -> usize {
        self.members().len()
    }

    fn members(&self) -> Vec<Node> {
        let mut members = self.peers.clone();
        if let Some(local) = self.local.read().as_ref() {
            if !members.iter().any(|m| m.key == local.key) {
                members.push(local.clone());
            }
        }
        members.sort_by_key(|n| n.key);
        members
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    async fn fetch_table(&self) -> Result<Option<RouteTable>> {
        if self.is_coordinator() {
            return Ok(self.table.read().clone());
        }
        let Some(coordinator) = self.coordinator() else {
            return Ok(self.table.read().clone());
        };

        match self.client.fetch_table(&coordinator.endpoint()).await {
            Ok(table) => {
                debug!(version = table.version, "Fetched route table from coordinator");
                *self.table.write() = Some(table.clone());
                Ok(Some(table))
            }
            Err(e) => {
                warn!(coordinator = %coordinator, error = %e, "Route table fetch failed, using cached copy");
                Ok(self.table.read().clone())
            }
        }
    }

    async fn update_table(&self, table: &RouteTable) -> Result<()> {
        if self.is_coordinator() {
            self.persist_table(table)?;
        }
        *self.table.write() = Some(table.clone());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        debug!("Static connector stopped");
        Ok(())
    }
}

#[derive(Default)]
struct HubState {
    /// Live members in join order; the first one coordinates.
    members: Vec<Node>,
    table: Option<RouteTable>,
}

/// In-process membership shared by the members of a single-process cluster.
pub struct MembershipHub {
    state: Mutex<HubState>,
    events: broadcast::Sender<MembershipEvent>,
}

impl MembershipHub {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            events,
        })
    }

    /// Adds a member. Joining twice is a no-op.
    pub fn join(&self, node: Node) {
        let elected = {
            let mut state = self.state.lock();
            if state.members.iter().any(|m| m.key == node.key) {
                return;
            }
            state.members.push(node.clone());
            state.members.len() == 1
        };

        info!(node = %node, "Member joined");
        let _ = self.events.send(MembershipEvent::NodeJoined(node.clone()));
        if elected {
            let _ = self.events.send(MembershipEvent::CoordinatorElected(node));
        }
    }

    /// Removes a member, electing a new coordinator if it was the current one.
    pub fn leave(&self, key: NodeKey) -> Option<Node> {
        let (node, successor) = {
            let mut state = self.state.lock();
            let pos = state.members.iter().position(|m| m.key == key)?;
            let node = state.members.remove(pos);
            let successor = if pos == 0 {
                state.members.first().cloned()
            } else {
                None
            };
            (node, successor)
        };

        info!(node = %node, "Member left");
        let _ = self.events.send(MembershipEvent::NodeLeft(node.clone()));
        if let Some(successor) = successor {
            info!(coordinator = %successor, "Coordinator elected");
            let _ = self.events.send(MembershipEvent::CoordinatorElected(successor));
        }
        Some(node)
    }

    pub fn coordinator(&self) -> Option<Node> {
        self.state.lock().members.first().cloned()
    }

    pub fn members(&self) -> Vec<Node> {
        self.state.lock().members.clone()
    }

    pub fn table(&self) -> Option<RouteTable> {
        self.state.lock().table.clone()
    }

    pub fn set_table(&self, table: RouteTable) {
        self.state.lock().table = Some(table);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }
}

/// Connector over a [`MembershipHub`].
pub struct HubConnector {
    hub: Arc<MembershipHub>,
    local: RwLock<Option<Node>>,
}

impl HubConnector {
    pub fn new(hub: Arc<MembershipHub>) -> Self {
        Self {
            hub,
            local: RwLock::new(None),
        }
    }

    pub fn hub(&self) -> &Arc<MembershipHub> {
        &self.hub
    }
}

#[async_trait]
impl ClusterConnector for HubConnector {
    async fn init(&self, local: &Node) -> Result<()> {
        *self.local.write() = Some(local.clone());
        self.hub.join(local.clone());
        Ok(())
    }

    fn is_coordinator(&self) -> bool {
        let Some(local) = self.local.read().as_ref().map(|n| n.key) else {
            return false;
        };
        self.hub.coordinator().map_or(false, |c| c.key == local)
    }

    fn coordinator(&self) -> Option<Node> {
        self.hub.coordinator()
    }

    fn cluster_size(&self) -> usize {
        self.hub.members().len()
    }

    fn members(&self) -> Vec<Node> {
        self.hub.members()
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.hub.subscribe()
    }

    async fn fetch_table(&self) -> Result<Option<RouteTable>> {
        Ok(self.hub.table())
    }

    async fn update_table(&self, table: &RouteTable) -> Result<()> {
        if !self.is_coordinator() {
            return Err(TidelogError::NotCoordinator {
                coordinator: self.hub.coordinator().map(|n| n.key),
            });
        }
        self.hub.set_table(table.clone());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let local = self.local.write().take();
        if let Some(local) = local {
            self.hub.leave(local.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Replica;
    use tempfile::tempdir;

    fn client() -> ReplicationClient {
        ReplicationClient::new(&crate::config::NetworkConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_hub_elects_earliest_member() {
        let hub = MembershipHub::new();
        let mut events = hub.subscribe();
        let a = HubConnector::new(hub.clone());
        let b = HubConnector::new(hub.clone());
        let na = Node::new("127.0.0.1", 1);
        let nb = Node::new("127.0.0.1", 2);

        a.init(&na).await.unwrap();
        b.init(&nb).await.unwrap();
        assert!(a.is_coordinator());
        assert!(!b.is_coordinator());
        assert_eq!(b.cluster_size(), 2);

        assert_eq!(events.recv().await.unwrap(), MembershipEvent::NodeJoined(na.clone()));
        assert_eq!(events.recv().await.unwrap(), MembershipEvent::CoordinatorElected(na.clone()));
        assert_eq!(events.recv().await.unwrap(), MembershipEvent::NodeJoined(nb.clone()));

        a.stop().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), MembershipEvent::NodeLeft(na));
        assert_eq!(events.recv().await.unwrap(), MembershipEvent::CoordinatorElected(nb));
        assert!(b.is_coordinator());
        assert_eq!(b.cluster_size(), 1);
    }

    #[tokio::test]
    async fn test_hub_table_is_coordinator_only() {
        let hub = MembershipHub::new();
        let a = HubConnector::new(hub.clone());
        let b = HubConnector::new(hub.clone());
        a.init(&Node::new("h", 1)).await.unwrap();
        b.init(&Node::new("h", 2)).await.unwrap();

        let table = RouteTable::new();
        assert!(matches!(
            b.update_table(&table).await,
            Err(TidelogError::NotCoordinator { .. })
        ));
        a.update_table(&table).await.unwrap();
        assert_eq!(b.fetch_table().await.unwrap(), Some(table));
    }

    #[tokio::test]
    async fn test_static_coordinator_persists_table() {
        let dir = tempdir().unwrap();
        let local = Node::new("127.0.0.1", 7001);
        let connector = StaticConnector::new(vec![], None, true, Some(dir.path().to_path_buf()), client());
        connector.init(&local).await.unwrap();
        assert!(connector.is_coordinator());
        assert_eq!(connector.fetch_table().await.unwrap(), None);

        let mut table = RouteTable::new();
        table.insert(1, vec![Replica::new(1, &local, &local)]);
        connector.update_table(&table).await.unwrap();

        let reopened = StaticConnector::new(vec![], None, true, Some(dir.path().to_path_buf()), client());
        reopened.init(&local).await.unwrap();
        assert_eq!(reopened.fetch_table().await.unwrap(), Some(table));
    }

    #[tokio::test]
    async fn test_static_lowest_key_coordinates() {
        let peers: Vec<Node> = (0..3).map(|i| Node::new("10.1.1.1", 8000 + i)).collect();
        let lowest = peers.iter().min_by_key(|n| n.key).cloned().unwrap();

        for local in &peers {
            let others = peers.iter().filter(|p| p.key != local.key).cloned().collect();
            let connector = StaticConnector::new(others, None, false, None, client());
            connector.init(local).await.unwrap();
            assert_eq!(connector.coordinator(), Some(lowest.clone()));
            assert_eq!(connector.is_coordinator(), local.key == lowest.key);
            assert_eq!(connector.cluster_size(), 3);
        }
    }

    #[test]
    fn test_build_rejects_embedded_without_hub() {
        let config = ClusterConfig {
            connector: ConnectorConfig::Embedded,
            ..ClusterConfig::default()
        };
        assert!(build_connector(&config, client()).is_err());
    }
}
