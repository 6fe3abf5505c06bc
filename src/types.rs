//! Core type definitions shared by the log, placement and replication layers.
//!
//! # Type Aliases
//!
//! - [`NodeKey`] = `u64`: cluster member identifier, derived from its endpoint
//! - [`RouteKey`] = `u64`: shard identifier, one WAL and one replica set each
//! - [`FollowerKey`] = `u64`: opaque identifier of a log reader
//!
//! # Example
//!
//! ```rust
//! use tidelog::types::Node;
//!
//! let a = Node::new("10.0.0.1", 55021);
//! let b = Node::new("10.0.0.1", 55021);
//! assert_eq!(a.key, b.key);
//! assert_eq!(a.endpoint(), "10.0.0.1:55021");
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Cluster member identifier.
pub type NodeKey = u64;

/// Shard identifier.
pub type RouteKey = u64;

/// Log reader identifier.
pub type FollowerKey = u64;

/// Hashes bytes to a u64 that is identical on every node.
///
/// SHA-256 truncated to its first eight bytes, big endian.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub address: String,
    pub port: u16,
    pub key: NodeKey,
}

impl Node {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        let key = Self::generate_key(&address, port);
        Self { address, port, key }
    }

    /// Parses `"host:port"`.
    pub fn parse(endpoint: &str) -> Option<Self> {
        let (host, port) = endpoint.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }

    pub fn generate_key(address: &str, port: u16) -> NodeKey {
        stable_hash(format!("{}:{}", address, port).as_bytes())
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({:016x})", self.address, self.port, self.key)
    }
}

/// One replica slot of a route assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub route_key: RouteKey,
    pub leader_node_key: NodeKey,
    pub replica_node_key: NodeKey,
    pub leader_address: String,
    pub leader_port: u16,
    pub replica_address: String,
    pub replica_port: u16,
    #[serde(default)]
    pub isr: bool,
}

impl Replica {
    pub fn new(route_key: RouteKey, leader: &Node, replica: &Node) -> Self {
        Self {
            route_key,
            leader_node_key: leader.key,
            replica_node_key: replica.key,
            leader_address: leader.address.clone(),
            leader_port: leader.port,
            replica_address: replica.address.clone(),
            replica_port: replica.port,
            isr: false,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader_node_key == self.replica_node_key
    }

    pub fn leader(&self) -> Node {
        Node {
            address: self.leader_address.clone(),
            port: self.leader_port,
            key: self.leader_node_key,
        }
    }

    pub fn replica(&self) -> Node {
        Node {
            address: self.replica_address.clone(),
            port: self.replica_port,
            key: self.replica_node_key,
        }
    }

    /// Points this slot at a new leader.
    pub fn set_leader(&mut self, leader: &Node) {
        self.leader_node_key = leader.key;
        self.leader_address = leader.address.clone();
        self.leader_port = leader.port;
    }
}

/// The cluster-wide route to replica assignment table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub version: u64,
    pub coordinator: Option<NodeKey>,
    pub routes: BTreeMap<RouteKey, Vec<Replica>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, route_key: RouteKey) -> Option<&Vec<Replica>> {
        self.routes.get(&route_key)
    }

    pub fn leader(&self, route_key: RouteKey) -> Option<NodeKey> {
        self.routes
            .get(&route_key)
            .and_then(|replicas| replicas.first())
            .map(|r| r.leader_node_key)
    }

    /// Replaces the assignment for a route and bumps the version.
    pub fn insert(&mut self, route_key: RouteKey, replicas: Vec<Replica>) {
        self.routes.insert(route_key, replicas);
        self.version += 1;
    }

    /// Slots held by the given node.
    pub fn replicas_on(&self, node: NodeKey) -> Vec<Replica> {
        self.routes
            .values()
            .flatten()
            .filter(|r| r.replica_node_key == node)
            .cloned()
            .collect()
    }

    /// Records a single slot as seen by the node that holds it.
    ///
    /// The slot's leader fields are copied onto the other slots of the
    /// route. The version is left alone; only the coordinator bumps it.
    pub fn upsert(&mut self, replica: Replica) {
        let leader = replica.leader();
        let slots = self.routes.entry(replica.route_key).or_default();
        for slot in slots.iter_mut() {
            slot.set_leader(&leader);
        }
        match slots
            .iter_mut()
            .find(|s| s.replica_node_key == replica.replica_node_key)
        {
            Some(slot) => *slot = replica,
            None => slots.push(replica),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key_is_stable() {
        let a = Node::new("127.0.0.1", 9000);
        assert_eq!(a.key, Node::generate_key("127.0.0.1", 9000));
        assert_ne!(a.key, Node::new("127.0.0.1", 9001).key);
    }

    #[test]
    fn test_node_parse() {
        let node = Node::parse("db-1.local:55021").unwrap();
        assert_eq!(node.address, "db-1.local");
        assert_eq!(node.port, 55021);

        assert!(Node::parse("no-port").is_none());
        assert!(Node::parse(":55021").is_none());
        assert!(Node::parse("host:notaport").is_none());
    }

    #[test]
    fn test_replica_leader_redirect() {
        let leader = Node::new("a", 1);
        let follower = Node::new("b", 2);
        let mut slot = Replica::new(5, &leader, &follower);
        assert!(!slot.is_leader());

        slot.set_leader(&follower);
        assert!(slot.is_leader());
        assert_eq!(slot.leader(), follower);
    }

    #[test]
    fn test_route_table_versioning() {
        let n = Node::new("a", 1);
        let mut table = RouteTable::new();
        assert_eq!(table.leader(3), None);

        table.insert(3, vec![Replica::new(3, &n, &n)]);
        assert_eq!(table.version, 1);
        assert_eq!(table.leader(3), Some(n.key));
        assert_eq!(table.replicas_on(n.key).len(), 1);
    }

    #[test]
    fn test_upsert_moves_leader_of_every_slot() {
        let a = Node::new("a", 1);
        let b = Node::new("b", 2);
        let mut table = RouteTable::new();
        table.insert(9, vec![Replica::new(9, &a, &a), Replica::new(9, &a, &b)]);

        let mut promoted = Replica::new(9, &b, &b);
        promoted.isr = true;
        table.upsert(promoted);

        let slots = table.get(9).unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.leader_node_key == b.key));
        assert_eq!(table.version, 1);

        table.upsert(Replica::new(10, &a, &a));
        assert_eq!(table.leader(10), Some(a.key));
    }
}
