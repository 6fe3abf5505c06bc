//! Replication RPC.
//!
//! HTTP with JSON bodies. Followers pull log records from route leaders with
//! `POST /replication/fetch`; the coordinator pushes assignments with
//! `POST /replication/replica` and serves route creation, ISR reports and the
//! shared route table under `/cluster`.

pub mod client;
pub mod endpoint;
pub mod messages;
pub mod server;

pub use client::ReplicationClient;
pub use endpoint::{LocalEndpoint, RemoteEndpoint, WalEndpoint};
pub use messages::*;
