//! HTTP client for the replication RPC.

use super::messages::*;
use crate::config::NetworkConfig;
use crate::error::{Result, TidelogError};
use crate::repair::SeriesOffsets;
use crate::types::{Replica, RouteTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_message: Option<String>,
}

/// Typed client for every replication endpoint of a peer.
#[derive(Clone)]
pub struct ReplicationClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ReplicationClient {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        Self::with_timeouts(config.connect_timeout, config.request_timeout)
    }

    pub fn with_timeouts(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TidelogError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("http://{}/{}", endpoint, path)
    }

    fn send_error(&self, e: reqwest::Error) -> TidelogError {
        if e.is_timeout() {
            TidelogError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            TidelogError::from(e)
        }
    }

    async fn decode<Resp: DeserializeOwned>(response: reqwest::Response) -> Result<Resp> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| TidelogError::Deserialization(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error_message)
            .unwrap_or(body);
        Err(TidelogError::Remote {
            code: status.as_u16(),
            message,
        })
    }

    async fn post<Req, Resp>(&self, endpoint: &str, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = Self::url(endpoint, path);
        debug!(url = %url, "Replication RPC");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::decode(response).await
    }

    async fn get<Resp: DeserializeOwned>(&self, endpoint: &str, path: &str) -> Result<Resp> {
        let response = self
            .client
            .get(Self::url(endpoint, path))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::decode(response).await
    }

    /// Fetches a range of log records from a leader.
    pub async fn fetch(&self, endpoint: &str, request: &FetchRequest) -> Result<FetchResponse> {
        self.post(endpoint, "replication/fetch", request).await
    }

    /// Appends a record at a leader and returns its offset.
    pub async fn write(&self, endpoint: &str, request: &WriteRequest) -> Result<u64> {
        let response: WriteResponse = self.post(endpoint, "replication/write", request).await?;
        response.offset.ok_or_else(|| {
            TidelogError::Deserialization("write response without offset".to_string())
        })
    }

    /// Pushes an assignment slot to the member that holds it.
    pub async fn push_replica(&self, endpoint: &str, replica: &Replica) -> Result<()> {
        let _: GenericResponse = self.post(endpoint, "replication/replica", replica).await?;
        Ok(())
    }

    /// Asks the coordinator to create a route.
    pub async fn request_route(&self, endpoint: &str, request: &RouteRequest) -> Result<RouteResponse> {
        self.post(endpoint, "cluster/route", request).await
    }

    /// Reports follower ISR state to the coordinator.
    pub async fn report_isr(&self, endpoint: &str, request: &IsrUpdateRequest) -> Result<()> {
        let _: GenericResponse = self.post(endpoint, "cluster/isr", request).await?;
        Ok(())
    }

    /// Fetches the shared route table from the coordinator.
    pub async fn fetch_table(&self, endpoint: &str) -> Result<RouteTable> {
        self.get(endpoint, "cluster/table").await
    }

    pub async fn fetch_bucket(
        &self,
        endpoint: &str,
        request: &BucketFetchRequest,
    ) -> Result<BucketFetchResponse> {
        self.post(endpoint, "replication/buckets", request).await
    }

    pub async fn list_buckets(&self, endpoint: &str, request: &BucketListRequest) -> Result<Vec<SeriesOffsets>> {
        let response: BucketListResponse = self.post(endpoint, "replication/buckets/list", request).await?;
        Ok(response.entries)
    }

    pub async fn health(&self, endpoint: &str) -> bool {
        match self.client.get(Self::url(endpoint, "health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
