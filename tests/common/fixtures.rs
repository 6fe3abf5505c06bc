// Test fixtures for integration tests

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tidelog::config::{
    ConnectorConfig, IsrConfig, ReplicationConfig, TidelogConfig, WalConfig,
};
use tidelog::repair::{BucketOffset, BucketRequest, BucketSource, RawBucket, SeriesOffsets};
use tidelog::resilience::RetryConfig;
use tidelog::{RecordSink, RouteKey};

/// `"test0000"`, `"test0001"`, ...
pub fn numbered_records(count: usize) -> Vec<Bytes> {
    (0..count)
        .map(|i| Bytes::from(format!("test{:04}", i)))
        .collect()
}

/// WAL settings with a small segment size.
pub fn wal_config(dir: &Path, segment_size: u32) -> WalConfig {
    WalConfig {
        dir: dir.to_path_buf(),
        segment_size,
        ..WalConfig::default()
    }
}

/// ISR settings that recheck every few milliseconds.
pub fn fast_isr() -> IsrConfig {
    IsrConfig {
        initial_delay: Duration::from_millis(10),
        check_interval: Duration::from_millis(25),
        ..IsrConfig::default()
    }
}

/// Node configuration for an embedded test cluster member.
pub fn node_config(root: &Path, port: u16) -> TidelogConfig {
    let mut config = TidelogConfig::development();
    config.node.address = "127.0.0.1".to_string();
    config.node.port = port;
    config.wal.dir = root.join(format!("node-{}", port));
    config.wal.segment_size = 256 * 1024;
    config.isr = fast_isr();
    config.isr.commit_without_followers = false;
    config.cluster.connector = ConnectorConfig::Embedded;
    config.cluster.isr_report_interval = Duration::from_millis(50);
    config.replication = ReplicationConfig {
        empty_wait: Duration::from_millis(10),
        error_wait: Duration::from_millis(50),
        ..ReplicationConfig::default()
    };
    config.network.connect_timeout = Duration::from_millis(500);
    config.network.request_timeout = Duration::from_secs(2);
    config.network.retry = RetryConfig::quick();
    config
}

/// Sink that keeps every applied record per route.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<HashMap<RouteKey, Vec<Bytes>>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self, route_key: RouteKey) -> Vec<Bytes> {
        self.records
            .lock()
            .get(&route_key)
            .cloned()
            .unwrap_or_default()
    }
}

impl RecordSink for CollectingSink {
    fn apply(&self, route_key: RouteKey, records: &[Bytes]) -> tidelog::Result<()> {
        self.records
            .lock()
            .entry(route_key)
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }
}

/// Bucket source holding a single series.
pub struct MemoryBucketSource {
    pub series: SeriesOffsets,
    pub bucket: RawBucket,
}

impl MemoryBucketSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            series: SeriesOffsets {
                value_field: "value".to_string(),
                tags: vec!["host=a".to_string()],
                buckets: vec![BucketOffset {
                    bucket_ts: "1700000000".to_string(),
                    index: 0,
                    offset: 5,
                }],
            },
            bucket: RawBucket {
                data: Bytes::from_static(b"\x01\x02\x03\x04\x05"),
                count: 2,
                fp: true,
            },
        })
    }
}

impl BucketSource for MemoryBucketSource {
    fn list_offsets(&self, db: &str, measurement: &str) -> tidelog::Result<Vec<SeriesOffsets>> {
        if db == "metrics" && measurement == "cpu" {
            Ok(vec![self.series.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    fn fetch_bucket(&self, request: &BucketRequest) -> tidelog::Result<Option<RawBucket>> {
        if request.value_field != self.series.value_field || request.index != 0 {
            return Ok(None);
        }
        let start = (request.offset as usize).min(self.bucket.data.len());
        Ok(Some(RawBucket {
            data: self.bucket.data.slice(start..),
            ..self.bucket.clone()
        }))
    }
}
