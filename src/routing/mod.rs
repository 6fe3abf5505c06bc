//! Placement of route keys onto cluster nodes.
//!
//! A [`RoutingStrategy`] is a pure function of its node set: the same nodes
//! and the same key always produce the same ordered node list on every
//! member. Assignments are cached by the WAL manager's route table, never
//! here.

mod hash_ring;
mod mod_hash;

pub use hash_ring::{ConsistentHashRouter, VIRTUAL_NODES};
pub use mod_hash::ModHashRouter;

use crate::config::RoutingKind;
use crate::types::{Node, NodeKey, RouteKey};
use std::sync::Arc;

/// Maps route keys to an ordered list of distinct nodes.
pub trait RoutingStrategy: Send + Sync {
    /// Adds a node. Adding a node twice is a no-op.
    fn add_node(&self, node: Node);

    fn add_nodes(&self, nodes: Vec<Node>) {
        for node in nodes {
            self.add_node(node);
        }
    }

    /// Removes a node, returning it if it was present.
    fn remove_node(&self, key: NodeKey) -> Option<Node>;

    fn remove_nodes(&self, keys: &[NodeKey]) -> Vec<Node> {
        keys.iter().filter_map(|k| self.remove_node(*k)).collect()
    }

    /// First node for `key`.
    fn route(&self, key: RouteKey) -> Option<Node> {
        self.nodes_for(key, 1).into_iter().next()
    }

    /// Up to `replicas` distinct nodes for `key`, in placement order.
    /// Returns fewer only when fewer nodes exist.
    fn nodes_for(&self, key: RouteKey, replicas: usize) -> Vec<Node>;

    fn get(&self, key: NodeKey) -> Option<Node>;

    fn nodes(&self) -> Vec<Node>;

    fn node_count(&self) -> usize;

    /// Number of positions on the ring or slots in the table.
    fn ring_size(&self) -> usize;
}

/// Builds the strategy selected in configuration.
pub fn build_router(kind: RoutingKind) -> Arc<dyn RoutingStrategy> {
    match kind {
        RoutingKind::ConsistentHash => Arc::new(ConsistentHashRouter::new()),
        RoutingKind::ModHash => Arc::new(ModHashRouter::new()),
    }
}
