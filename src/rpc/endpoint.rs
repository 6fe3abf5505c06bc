//! Uniform access to a route's log, wherever it lives.

use super::client::ReplicationClient;
use super::messages::{FetchRequest, WriteRequest};
use crate::error::Result;
use crate::types::RouteKey;
use crate::wal::{Wal, WalRead};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Append and fetch against one route's leader log.
#[async_trait]
pub trait WalEndpoint: Send + Sync {
    async fn write(&self, route_key: RouteKey, data: Bytes) -> Result<u64>;

    async fn fetch(&self, request: &FetchRequest) -> Result<WalRead>;
}

/// A log held by this process.
pub struct LocalEndpoint {
    wal: Arc<Wal>,
}

impl LocalEndpoint {
    pub fn new(wal: Arc<Wal>) -> Self {
        Self { wal }
    }
}

#[async_trait]
impl WalEndpoint for LocalEndpoint {
    async fn write(&self, _route_key: RouteKey, data: Bytes) -> Result<u64> {
        self.wal.write(&data, false)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<WalRead> {
        self.wal.read(
            request.follower_key,
            request.from_offset,
            request.max_bytes,
            request.committed_only,
        )
    }
}

/// A log held by another member, reached over the replication RPC.
pub struct RemoteEndpoint {
    client: ReplicationClient,
    endpoint: String,
}

impl RemoteEndpoint {
    pub fn new(client: ReplicationClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WalEndpoint for RemoteEndpoint {
    async fn write(&self, route_key: RouteKey, data: Bytes) -> Result<u64> {
        let request = WriteRequest {
            route_key,
            data,
            fsync: false,
        };
        self.client.write(&self.endpoint, &request).await
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<WalRead> {
        let response = self.client.fetch(&self.endpoint, request).await?;
        Ok(WalRead {
            data: response.data,
            next_offset: response.next_offset,
            commit_offset: response.commit_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_endpoint_registers_follower() {
        let dir = tempdir().unwrap();
        let wal = Arc::new(Wal::configure(dir.path(), 4096).unwrap());
        let endpoint = LocalEndpoint::new(wal.clone());

        assert_eq!(endpoint.write(1, Bytes::from_static(b"one")).await.unwrap(), 4);
        assert_eq!(endpoint.write(1, Bytes::from_static(b"two")).await.unwrap(), 11);

        let read = endpoint
            .fetch(&FetchRequest {
                route_key: 1,
                follower_key: 42,
                from_offset: 4,
                max_bytes: 1024,
                committed_only: false,
            })
            .await
            .unwrap();
        assert_eq!(read.records().len(), 2);
        assert_eq!(read.next_offset, 18);
        assert_eq!(wal.follower_offset(42), Some(4));
    }
}
