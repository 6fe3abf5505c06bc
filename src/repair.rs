//! Raw series bucket access for out-of-band consistency repair.
//!
//! The storage engine owns compressed series buckets; tidelog only moves
//! their bytes between nodes. A repair worker lists the bucket offsets a
//! peer holds for a measurement, then fetches the raw bytes of the buckets
//! that differ. Both calls are served through the replication RPC when a
//! [`BucketSource`] is attached to the manager.

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifies one bucket and the byte position to read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketRequest {
    pub db: String,
    pub measurement: String,
    pub value_field: String,
    pub tags: Vec<String>,
    /// Any timestamp (ms) inside the bucket's time window.
    pub block_timestamp: i64,
    /// Position of the bucket within its time window.
    pub index: u32,
    /// Byte offset inside the bucket to start from.
    pub offset: u32,
    /// Width of the time window in seconds.
    pub bucket_size: u32,
}

/// Raw bytes of one bucket, from the requested offset on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBucket {
    pub data: Bytes,
    /// Number of points encoded in the bucket.
    pub count: u32,
    /// True when values are floating point.
    pub fp: bool,
}

/// Write position of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOffset {
    pub bucket_ts: String,
    pub index: u32,
    pub offset: u32,
}

/// Buckets held for one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesOffsets {
    pub value_field: String,
    pub tags: Vec<String>,
    pub buckets: Vec<BucketOffset>,
}

/// Read access to compressed series buckets.
pub trait BucketSource: Send + Sync {
    /// Every series of a measurement with the write offset of each bucket.
    fn list_offsets(&self, db: &str, measurement: &str) -> Result<Vec<SeriesOffsets>>;

    /// Raw bucket bytes, or `None` if the series or bucket does not exist.
    fn fetch_bucket(&self, request: &BucketRequest) -> Result<Option<RawBucket>>;
}
