//! Cluster layer for tidelog.
//!
//! This module handles everything above a single log:
//! - Membership and coordinator election through a [`ClusterConnector`]
//! - Route placement and replica assignment in the [`WalManager`]
//! - Follower pulling and local replay

mod connector;
mod manager;
mod replicator;

pub use connector::{
    build_connector, ClusterConnector, HubConnector, MembershipEvent, MembershipHub,
    StaticConnector,
};
pub use manager::WalManager;
pub use replicator::{LocalReplayer, RecordSink, ReplicaPuller};
