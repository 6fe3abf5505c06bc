//! Request and response bodies of the replication RPC.
//!
//! Bodies are JSON. Byte payloads travel as standard base64 strings.

use crate::repair::{BucketRequest, SeriesOffsets};
use crate::types::{NodeKey, Replica, RouteKey};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const OK: u16 = 200;
pub const BAD_REQUEST: u16 = 400;
pub const NOT_FOUND: u16 = 404;
pub const INTERNAL_ERROR: u16 = 500;

/// Range fetch of raw log records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub route_key: RouteKey,
    pub follower_key: u64,
    pub from_offset: u64,
    pub max_bytes: u32,
    #[serde(default)]
    pub committed_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub response_code: u16,
    #[serde(default, with = "b64_frames")]
    pub data: Option<Vec<Bytes>>,
    pub next_offset: u64,
    pub commit_offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl FetchResponse {
    pub fn error(code: u16, message: impl Into<String>, from_offset: u64) -> Self {
        Self {
            response_code: code,
            data: None,
            next_offset: from_offset,
            commit_offset: 0,
            error_message: Some(message.into()),
        }
    }
}

/// Append forwarded to a route leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub route_key: RouteKey,
    #[serde(with = "b64")]
    pub data: Bytes,
    #[serde(default)]
    pub fsync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub response_code: u16,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Route creation request, served by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub route_key: RouteKey,
    pub replication_factor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub response_code: u16,
    #[serde(default)]
    pub leader_id: Option<NodeKey>,
    #[serde(default)]
    pub replicas: Vec<Replica>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// In-sync state of a route's followers, reported by its leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsrUpdateRequest {
    pub route_key: RouteKey,
    pub statuses: BTreeMap<NodeKey, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericResponse {
    pub response_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GenericResponse {
    pub fn ok() -> Self {
        Self {
            response_code: OK,
            error_message: None,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            response_code: code,
            error_message: Some(message.into()),
        }
    }
}

/// Raw bucket fetch for repair.
pub type BucketFetchRequest = BucketRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFetchResponse {
    pub response_code: u16,
    #[serde(default, with = "b64_opt")]
    pub data: Option<Bytes>,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub fp: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketListRequest {
    pub db: String,
    pub measurement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketListResponse {
    pub response_code: u16,
    #[serde(default)]
    pub entries: Vec<SeriesOffsets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| STANDARD.decode(s).map(Bytes::from))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

mod b64_frames {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &Option<Vec<Bytes>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        data.as_ref()
            .map(|frames| frames.iter().map(|f| STANDARD.encode(f)).collect::<Vec<_>>())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<Bytes>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(encoded) = Option::<Vec<String>>::deserialize(deserializer)? else {
            return Ok(None);
        };
        encoded
            .into_iter()
            .map(|s| STANDARD.decode(s).map(Bytes::from))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}
