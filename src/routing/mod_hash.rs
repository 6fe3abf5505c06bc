//! Modulo placement over the sorted node list.

use super::RoutingStrategy;
use crate::types::{stable_hash, Node, NodeKey, RouteKey};
use parking_lot::RwLock;

/// Places a key on `nodes[hash(key) % n]` and its replicas on the nodes that
/// follow. Cheap, but nearly every key moves when membership changes.
#[derive(Default)]
pub struct ModHashRouter {
    nodes: RwLock<Vec<Node>>,
}

impl ModHashRouter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingStrategy for ModHashRouter {
    fn add_node(&self, node: Node) {
        let mut nodes = self.nodes.write();
        if let Err(pos) = nodes.binary_search_by_key(&node.key, |n| n.key) {
            nodes.insert(pos, node);
        }
    }

    fn remove_node(&self, key: NodeKey) -> Option<Node> {
        let mut nodes = self.nodes.write();
        let pos = nodes.binary_search_by_key(&key, |n| n.key).ok()?;
        Some(nodes.remove(pos))
    }

    fn nodes_for(&self, key: RouteKey, replicas: usize) -> Vec<Node> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return Vec::new();
        }
        let start = (stable_hash(&key.to_be_bytes()) % nodes.len() as u64) as usize;
        (0..replicas.min(nodes.len()))
            .map(|i| nodes[(start + i) % nodes.len()].clone())
            .collect()
    }

    fn get(&self, key: NodeKey) -> Option<Node> {
        let nodes = self.nodes.read();
        nodes
            .binary_search_by_key(&key, |n| n.key)
            .ok()
            .map(|pos| nodes[pos].clone())
    }

    fn nodes(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    fn ring_size(&self) -> usize {
        self.node_count()
    }
}
