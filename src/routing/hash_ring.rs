//! Consistent-hash ring with virtual nodes.

use super::RoutingStrategy;
use crate::types::{stable_hash, Node, NodeKey, RouteKey};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Ring positions contributed by each physical node.
pub const VIRTUAL_NODES: usize = 10;

fn virtual_position(node: NodeKey, index: usize) -> u64 {
    stable_hash(format!("{}-{}", node, index).as_bytes())
}

fn key_position(key: RouteKey) -> u64 {
    stable_hash(&key.to_be_bytes())
}

#[derive(Default)]
struct Ring {
    positions: BTreeMap<u64, NodeKey>,
    nodes: HashMap<NodeKey, Node>,
}

/// Consistent-hash placement.
///
/// Every node occupies [`VIRTUAL_NODES`] positions on a `u64` ring. A key is
/// hashed onto the ring and placed on the nodes found walking clockwise from
/// there, skipping positions of nodes already chosen.
#[derive(Default)]
pub struct ConsistentHashRouter {
    ring: RwLock<Ring>,
}

impl ConsistentHashRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        let router = Self::new();
        router.add_nodes(nodes);
        router
    }
}

impl RoutingStrategy for ConsistentHashRouter {
    fn add_node(&self, node: Node) {
        let mut ring = self.ring.write();
        if ring.nodes.contains_key(&node.key) {
            return;
        }
        for i in 0..VIRTUAL_NODES {
            let pos = virtual_position(node.key, i);
            if let Some(owner) = ring.positions.insert(pos, node.key) {
                // 64-bit collision; keep the earlier owner
                ring.positions.insert(pos, owner);
                debug!(node = %node, position = pos, "Virtual node collision");
            }
        }
        debug!(node = %node, "Added node to hash ring");
        ring.nodes.insert(node.key, node);
    }

    fn remove_node(&self, key: NodeKey) -> Option<Node> {
        let mut ring = self.ring.write();
        let node = ring.nodes.remove(&key)?;
        for i in 0..VIRTUAL_NODES {
            let pos = virtual_position(key, i);
            if ring.positions.get(&pos) == Some(&key) {
                ring.positions.remove(&pos);
            }
        }
        debug!(node = %node, "Removed node from hash ring");
        Some(node)
    }

    fn nodes_for(&self, key: RouteKey, replicas: usize) -> Vec<Node> {
        let ring = self.ring.read();
        let wanted = replicas.min(ring.nodes.len());
        let mut chosen = Vec::with_capacity(wanted);
        let mut seen = HashSet::with_capacity(wanted);

        let start = key_position(key);
        let clockwise = ring
            .positions
            .range(start..)
            .chain(ring.positions.range(..start));
        for (_, owner) in clockwise {
            if chosen.len() == wanted {
                break;
            }
            if seen.insert(*owner) {
                if let Some(node) = ring.nodes.get(owner) {
                    chosen.push(node.clone());
                }
            }
        }
        chosen
    }

    fn get(&self, key: NodeKey) -> Option<Node> {
        self.ring.read().nodes.get(&key).cloned()
    }

    fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<_> = self.ring.read().nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.key);
        nodes
    }

    fn node_count(&self) -> usize {
        self.ring.read().nodes.len()
    }

    fn ring_size(&self) -> usize {
        self.ring.read().positions.len()
    }
}
