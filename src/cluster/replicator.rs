//! Background loops that move records out of a route's log.
//!
//! [`ReplicaPuller`] copies records from the route leader into the local
//! follower log. [`LocalReplayer`] hands records of the local log to a
//! [`RecordSink`], the storage engine that applies them.

use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::rpc::{FetchRequest, FetchResponse, ReplicationClient};
use crate::shutdown::BackgroundTask;
use crate::types::{FollowerKey, Node, RouteKey};
use crate::wal::Wal;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Consumer of log records, usually the storage engine's write path.
pub trait RecordSink: Send + Sync {
    /// Applies a batch in log order. An error makes the batch be retried.
    fn apply(&self, route_key: RouteKey, records: &[Bytes]) -> Result<()>;
}

/// Pulls a route's log from its leader into the local follower log.
///
/// Each fetch starts at the end of the local log, which also tells the
/// leader how far this follower has caught up.
pub struct ReplicaPuller;

impl ReplicaPuller {
    pub fn spawn(
        route_key: RouteKey,
        wal: Arc<Wal>,
        leader: Node,
        follower_key: FollowerKey,
        client: ReplicationClient,
        config: &ReplicationConfig,
    ) -> BackgroundTask {
        let max_bytes = config.max_fetch_bytes;
        let empty_wait = config.empty_wait;
        let error_wait = config.error_wait;
        let endpoint = leader.endpoint();
        let name = format!("puller:{}:{}", route_key, endpoint);

        BackgroundTask::spawn(name, move |shutdown| async move {
            debug!(route_key, leader = %leader, "Replica puller started");
            while !shutdown.is_shutting_down() && !wal.is_closed() {
                let request = FetchRequest {
                    route_key,
                    follower_key,
                    from_offset: wal.offset(),
                    max_bytes,
                    committed_only: false,
                };

                let wait = match client.fetch(&endpoint, &request).await {
                    Ok(response) => match apply_fetch(&wal, request.from_offset, response) {
                        Ok(Pulled::Records(count)) => {
                            trace!(route_key, records = count, offset = wal.offset(), "Pulled records");
                            None
                        }
                        Ok(Pulled::CaughtUp) => Some(empty_wait),
                        Ok(Pulled::Gap { next_offset }) => {
                            error!(
                                route_key,
                                leader = %leader,
                                local = request.from_offset,
                                leader_first = next_offset,
                                "Leader no longer holds the records this follower needs"
                            );
                            Some(error_wait)
                        }
                        Err(e) => {
                            error!(route_key, error = %e, "Failed to append pulled records");
                            Some(error_wait)
                        }
                    },
                    Err(e) => {
                        debug!(route_key, leader = %leader, error = %e, "Fetch from leader failed");
                        Some(error_wait)
                    }
                };

                if let Some(wait) = wait {
                    if !shutdown.sleep(wait).await {
                        break;
                    }
                }
            }
            debug!(route_key, leader = %leader, "Replica puller stopped");
        })
    }
}

/// Result of applying one fetch response to the follower log.
#[derive(Debug, PartialEq, Eq)]
enum Pulled {
    Records(usize),
    CaughtUp,
    /// The leader skipped past `from_offset`: its segments below
    /// `next_offset` are gone.
    Gap { next_offset: u64 },
}

fn apply_fetch(wal: &Wal, from_offset: u64, response: FetchResponse) -> Result<Pulled> {
    let records = response.data.unwrap_or_default();
    if records.is_empty() {
        if response.next_offset > from_offset {
            return Ok(Pulled::Gap {
                next_offset: response.next_offset,
            });
        }
        wal.observe_commit(response.commit_offset);
        return Ok(Pulled::CaughtUp);
    }

    for record in &records {
        wal.write(record, false)?;
    }
    wal.observe_commit(response.commit_offset);
    if wal.offset() != response.next_offset {
        warn!(
            local = wal.offset(),
            leader_next = response.next_offset,
            "Follower log diverged from leader"
        );
    }
    Ok(Pulled::Records(records.len()))
}

/// Feeds the local log of a route to a [`RecordSink`].
///
/// Progress is registered on the log as a consumer, so it survives restarts
/// and holds back segment pruning without counting toward the ISR.
pub struct LocalReplayer;

impl LocalReplayer {
    pub fn spawn(
        route_key: RouteKey,
        wal: Arc<Wal>,
        sink: Arc<dyn RecordSink>,
        consumer_key: FollowerKey,
        config: &ReplicationConfig,
    ) -> BackgroundTask {
        let max_bytes = config.max_fetch_bytes;
        let committed_only = config.committed_only;
        let empty_wait = config.empty_wait;
        let error_wait = config.error_wait;

        BackgroundTask::spawn(format!("replayer:{}", route_key), move |shutdown| async move {
            let mut from = wal
                .follower_offset(consumer_key)
                .unwrap_or_else(|| wal.first_offset());
            debug!(route_key, from, "Local replayer started");

            while !shutdown.is_shutting_down() && !wal.is_closed() {
                let wait = match wal.consume(consumer_key, from, max_bytes, committed_only) {
                    Ok(batch) if batch.is_empty() => {
                        from = batch.next_offset;
                        Some(empty_wait)
                    }
                    Ok(batch) => match sink.apply(route_key, batch.records()) {
                        Ok(()) => {
                            trace!(route_key, records = batch.records().len(), next = batch.next_offset, "Replayed records");
                            from = batch.next_offset;
                            None
                        }
                        Err(e) => {
                            warn!(route_key, from, error = %e, "Record sink rejected batch");
                            Some(error_wait)
                        }
                    },
                    Err(e) => {
                        if !wal.is_closed() {
                            error!(route_key, from, error = %e, "Local replay read failed");
                        }
                        Some(error_wait)
                    }
                };

                match wait {
                    Some(wait) => {
                        if !shutdown.sleep(wait).await {
                            break;
                        }
                    }
                    None => tokio::task::yield_now().await,
                }
            }
            debug!(route_key, "Local replayer stopped");
        })
    }
}
