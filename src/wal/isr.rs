//! Follower bookkeeping and in-sync replica tracking.
//!
//! Every reader of a log is a follower slot holding the last offset it asked
//! for. Slots are created on first contact and afterwards only touched
//! through atomics, so the map lock is taken for writing once per follower.
//!
//! Local consumers (the in-process replayer) also get a slot so that pruning
//! keeps the data they have not consumed yet, but they never count toward
//! the in-sync set.

use crate::config::IsrConfig;
use crate::shutdown::BackgroundTask;
use crate::types::FollowerKey;
use crate::wal::Wal;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Point-in-time view of one follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerStatus {
    pub key: FollowerKey,
    pub offset: u64,
    pub isr: bool,
    #[serde(default)]
    pub consumer: bool,
}

#[derive(Debug)]
struct FollowerSlot {
    offset: AtomicU64,
    isr: AtomicBool,
    consumer: bool,
}

impl FollowerSlot {
    fn new(offset: u64, consumer: bool) -> Self {
        Self {
            offset: AtomicU64::new(offset),
            isr: AtomicBool::new(false),
            consumer,
        }
    }

    fn advance(&self, offset: u64) -> u64 {
        self.offset.fetch_max(offset, Ordering::AcqRel).max(offset)
    }

    fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    fn is_isr(&self) -> bool {
        !self.consumer && self.isr.load(Ordering::Acquire)
    }
}

/// All followers of one log.
#[derive(Debug, Default)]
pub struct FollowerSet {
    slots: RwLock<HashMap<FollowerKey, Arc<FollowerSlot>>>,
}

impl FollowerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: FollowerKey, offset: u64, consumer: bool) -> Arc<FollowerSlot> {
        if let Some(slot) = self.slots.read().get(&key) {
            return slot.clone();
        }
        let mut slots = self.slots.write();
        slots
            .entry(key)
            .or_insert_with(|| {
                debug!(follower = key, offset, consumer, "New follower");
                Arc::new(FollowerSlot::new(offset, consumer))
            })
            .clone()
    }

    /// Records a fetch at `offset`. Offsets never move backwards.
    pub fn observe(&self, key: FollowerKey, offset: u64) -> u64 {
        self.slot(key, offset, false).advance(offset)
    }

    /// Records consumption by a local consumer.
    pub fn observe_consumer(&self, key: FollowerKey, offset: u64) -> u64 {
        self.slot(key, offset, true).advance(offset)
    }

    pub fn offset(&self, key: FollowerKey) -> Option<u64> {
        self.slots.read().get(&key).map(|s| s.offset())
    }

    pub fn is_isr(&self, key: FollowerKey) -> bool {
        self.slots.read().get(&key).map_or(false, |s| s.is_isr())
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// True if any remote follower has ever fetched.
    pub fn has_replicas(&self) -> bool {
        self.slots.read().values().any(|s| !s.consumer)
    }

    /// Recomputes the in-sync flag of every follower and returns how many are
    /// in sync.
    pub fn update(&self, leader_offset: u64, threshold: u64) -> usize {
        let slots = self.slots.read();
        let mut in_sync = 0;
        for (key, slot) in slots.iter().filter(|(_, s)| !s.consumer) {
            let lag = leader_offset.saturating_sub(slot.offset());
            let isr = lag <= threshold;
            let was = slot.isr.swap(isr, Ordering::AcqRel);
            if was != isr {
                debug!(follower = *key, lag, isr, "Follower ISR state changed");
            }
            if isr {
                in_sync += 1;
            }
        }
        in_sync
    }

    /// Smallest offset among in-sync followers.
    pub fn min_isr_offset(&self) -> Option<u64> {
        self.slots
            .read()
            .values()
            .filter(|s| s.is_isr())
            .map(|s| s.offset())
            .min()
    }

    /// Smallest offset among all followers and consumers.
    pub fn min_offset(&self) -> Option<u64> {
        self.slots.read().values().map(|s| s.offset()).min()
    }

    pub fn snapshot(&self) -> Vec<FollowerStatus> {
        let mut out: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(key, s)| FollowerStatus {
                key: *key,
                offset: s.offset(),
                isr: s.is_isr(),
                consumer: s.consumer,
            })
            .collect();
        out.sort_by_key(|s| s.key);
        out
    }

    /// Restores persisted followers. They start out of sync.
    pub fn restore(&self, statuses: &[FollowerStatus], max_offset: u64) {
        let mut slots = self.slots.write();
        for status in statuses {
            slots.insert(
                status.key,
                Arc::new(FollowerSlot::new(status.offset.min(max_offset), status.consumer)),
            );
        }
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

/// Periodic ISR recheck for one log.
///
/// Waits `initial_delay`, then every `check_interval` recomputes follower
/// sync state and the commit offset. Segments every follower has passed are
/// pruned on the same tick when the log allows deletion.
pub struct IsrTask;

impl IsrTask {
    pub fn spawn(wal: Arc<Wal>, config: &IsrConfig) -> BackgroundTask {
        let initial_delay = config.initial_delay;
        let interval = config.check_interval;
        let name = format!("isr:{}", wal.dir().display());

        BackgroundTask::spawn(name, move |shutdown| async move {
            if !shutdown.sleep(initial_delay).await {
                return;
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.wait_for_shutdown() => break,
                }

                if wal.is_closed() {
                    break;
                }

                let commit = wal.update_isr();
                trace!(dir = %wal.dir().display(), commit, offset = wal.offset(), "ISR recheck");

                if wal.deletion_enabled() {
                    match wal.prune() {
                        Ok(0) => {}
                        Ok(removed) => debug!(dir = %wal.dir().display(), removed, "Pruned segments"),
                        Err(e) => warn!(dir = %wal.dir().display(), error = %e, "Segment pruning failed"),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_monotonic() {
        let set = FollowerSet::new();
        assert_eq!(set.observe(1, 100), 100);
        assert_eq!(set.observe(1, 50), 100);
        assert_eq!(set.offset(1), Some(100));
        assert_eq!(set.observe(1, 150), 150);
        assert_eq!(set.offset(2), None);
    }

    #[test]
    fn test_isr_threshold() {
        let set = FollowerSet::new();
        set.observe(1, 990);
        set.observe(2, 500);

        assert!(!set.is_isr(1));
        assert_eq!(set.update(1000, 10), 1);
        assert!(set.is_isr(1));
        assert!(!set.is_isr(2));
        assert_eq!(set.min_isr_offset(), Some(990));
        assert_eq!(set.min_offset(), Some(500));

        // leader moves on, follower 1 falls behind
        assert_eq!(set.update(2000, 10), 0);
        assert_eq!(set.min_isr_offset(), None);
    }

    #[test]
    fn test_consumers_never_count_as_isr() {
        let set = FollowerSet::new();
        set.observe_consumer(9, 1000);
        assert_eq!(set.update(1000, 10), 0);
        assert!(!set.is_isr(9));
        assert!(!set.has_replicas());
        assert_eq!(set.min_offset(), Some(1000));
    }

    #[test]
    fn test_restore_starts_out_of_sync() {
        let set = FollowerSet::new();
        set.restore(
            &[FollowerStatus {
                key: 4,
                offset: 5000,
                isr: true,
                consumer: false,
            }],
            3000,
        );
        assert_eq!(set.offset(4), Some(3000));
        assert!(!set.is_isr(4));
    }
}
