//! Segmented, memory-mapped write-ahead log for one shard.
//!
//! Offsets are logical byte positions across every segment ever written.
//! A fresh log starts at offset 4 (the segment header) and each write moves
//! the offset forward by the framed size of the record, `4 + len`. Rotation
//! adds no gap: the first frame of a new segment starts exactly where the
//! previous segment ended, which is also the segment's base.
//!
//! # Example
//!
//! ```no_run
//! use tidelog::wal::Wal;
//!
//! # fn main() -> tidelog::Result<()> {
//! let wal = Wal::configure("/tmp/tidelog/route-7", 64 * 1024 * 1024)?;
//! let at = wal.write(b"cpu,host=a value=1", false)?;
//! assert_eq!(at, 4);
//!
//! let batch = wal.read(1, 4, 1024 * 1024, false)?;
//! assert_eq!(batch.records().len(), 1);
//! wal.close()?;
//! # Ok(())
//! # }
//! ```

pub mod isr;
pub mod segment;

pub use isr::{FollowerSet, FollowerStatus, IsrTask};
pub use segment::{Segment, FRAME_HEADER_SIZE, HEADER_SIZE};

use crate::config::{IsrConfig, WalConfig};
use crate::error::{Result, TidelogError};
use crate::types::FollowerKey;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FOLLOWERS_FILE: &str = "followers.json";

/// Result of a log read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalRead {
    /// Payloads in log order; `None` when there is nothing to deliver.
    pub data: Option<Vec<Bytes>>,
    /// Offset to pass to the next read.
    pub next_offset: u64,
    /// Commit offset at the time of the read.
    pub commit_offset: u64,
}

impl WalRead {
    pub fn empty(next_offset: u64, commit_offset: u64) -> Self {
        Self {
            data: None,
            next_offset,
            commit_offset,
        }
    }

    pub fn records(&self) -> &[Bytes] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

struct Writer {
    active: Arc<Segment>,
    writes_since_flush: u32,
}

/// Write-ahead log for one shard.
pub struct Wal {
    dir: PathBuf,
    segment_size: u32,
    flush_every: Option<u32>,
    deletion_enabled: bool,
    isr_threshold: u64,
    commit_without_followers: bool,
    /// `None` once closed.
    writer: Mutex<Option<Writer>>,
    /// Segments keyed by base offset.
    segments: RwLock<BTreeMap<u64, Arc<Segment>>>,
    offset: AtomicU64,
    commit: AtomicU64,
    followers: FollowerSet,
    closed: AtomicBool,
}

impl Wal {
    /// Opens a log with default ISR settings.
    pub fn configure(dir: impl AsRef<Path>, segment_size: u32) -> Result<Self> {
        let config = WalConfig {
            dir: dir.as_ref().to_path_buf(),
            segment_size,
            ..WalConfig::default()
        };
        Self::open(dir, &config, &IsrConfig::default())
    }

    /// Opens or creates the log in `dir`.
    ///
    /// With no segments on disk, segment 0 is created. Otherwise the highest
    /// segment becomes active and the offset is rebuilt from its frames.
    pub fn open(dir: impl AsRef<Path>, config: &WalConfig, isr: &IsrConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            TidelogError::Storage(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let found = segment::list_segments(&dir)?;
        let mut segments = BTreeMap::new();
        let active = match found.split_last() {
            None => {
                let active = Arc::new(Segment::create(&dir, 0, HEADER_SIZE as u64, config.segment_size)?);
                segment::sync_dir(&dir)?;
                segments.insert(active.base(), active.clone());
                active
            }
            Some(((index, base, path), sealed)) => {
                let mut expected_base = None;
                for (index, base, path) in sealed {
                    if let Some(expected) = expected_base {
                        if expected != *base {
                            warn!(segment = index, expected, base, "Segment base does not follow its predecessor");
                        }
                    }
                    let seg = Arc::new(Segment::open(path, *index, *base, false)?);
                    expected_base = Some(seg.logical_end());
                    segments.insert(seg.base(), seg);
                }
                let active = Arc::new(Segment::open(path, *index, *base, true)?);
                segments.insert(active.base(), active.clone());
                active
            }
        };

        let offset = active.logical_end();
        info!(
            dir = %dir.display(),
            segments = segments.len(),
            active = active.index(),
            offset,
            "Opened WAL"
        );

        let wal = Self {
            dir,
            segment_size: config.segment_size,
            flush_every: config.flush_every,
            deletion_enabled: config.deletion_enabled,
            isr_threshold: isr.threshold,
            commit_without_followers: isr.commit_without_followers,
            writer: Mutex::new(Some(Writer {
                active,
                writes_since_flush: 0,
            })),
            segments: RwLock::new(segments),
            offset: AtomicU64::new(offset),
            commit: AtomicU64::new(HEADER_SIZE as u64),
            followers: FollowerSet::new(),
            closed: AtomicBool::new(false),
        };
        wal.restore_followers()?;
        wal.recompute_commit();
        Ok(wal)
    }

    /// Largest payload a single record may carry.
    pub fn max_record_size(&self) -> usize {
        (self.segment_size - HEADER_SIZE - FRAME_HEADER_SIZE) as usize
    }

    /// Appends a record and returns the offset it starts at.
    ///
    /// Empty records are rejected: a zero length prefix marks the end of data
    /// during recovery.
    pub fn write(&self, payload: &[u8], fsync_now: bool) -> Result<u64> {
        if payload.is_empty() {
            return Err(TidelogError::InvalidArgument("empty record".to_string()));
        }
        if payload.len() > self.max_record_size() {
            return Err(TidelogError::RecordTooLarge {
                size: payload.len(),
                max: self.max_record_size(),
            });
        }

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(TidelogError::Closed)?;

        if !writer.active.has_room(payload.len()) {
            self.rotate(writer)?;
        }

        let start = self.offset.load(Ordering::Acquire);
        writer.active.append(payload)?;
        let end = start + FRAME_HEADER_SIZE as u64 + payload.len() as u64;
        self.offset.store(end, Ordering::Release);

        writer.writes_since_flush += 1;
        let periodic = self
            .flush_every
            .map_or(false, |every| writer.writes_since_flush >= every);
        if fsync_now || periodic {
            writer.active.flush()?;
            writer.writes_since_flush = 0;
        }

        Ok(start)
    }

    fn rotate(&self, writer: &mut Writer) -> Result<()> {
        let old = writer.active.clone();
        let base = old.logical_end();
        let next = Arc::new(Segment::create(&self.dir, old.index() + 1, base, self.segment_size)?);
        segment::sync_dir(&self.dir)?;

        self.segments.write().insert(base, next.clone());
        writer.active = next;
        writer.writes_since_flush = 0;
        old.seal()?;

        debug!(dir = %self.dir.display(), sealed = old.index(), active = old.index() + 1, base, "Rotated segment");
        Ok(())
    }

    /// Flushes outstanding writes of the active segment.
    pub fn flush(&self) -> Result<()> {
        let active = self.active_segment().ok_or(TidelogError::Closed)?;
        active.flush()
    }

    /// Reads on behalf of a follower.
    ///
    /// Registers the follower or moves its offset forward to `from_offset`,
    /// then returns whole frames from `from_offset`, at most one segment and
    /// roughly `max_bytes` per call.
    pub fn read(
        &self,
        follower: FollowerKey,
        from_offset: u64,
        max_bytes: u32,
        committed_only: bool,
    ) -> Result<WalRead> {
        self.check_readable(from_offset)?;
        self.followers.observe(follower, from_offset);
        self.recompute_commit();
        self.scan(from_offset, max_bytes, committed_only)
    }

    /// Reads on behalf of a local consumer. The consumer holds back pruning
    /// but never counts toward the in-sync set.
    pub fn consume(
        &self,
        consumer: FollowerKey,
        from_offset: u64,
        max_bytes: u32,
        committed_only: bool,
    ) -> Result<WalRead> {
        self.check_readable(from_offset)?;
        self.followers.observe_consumer(consumer, from_offset);
        self.scan(from_offset, max_bytes, committed_only)
    }

    fn check_readable(&self, from_offset: u64) -> Result<()> {
        if self.is_closed() {
            return Err(TidelogError::Closed);
        }
        let end = self.offset();
        if from_offset > end {
            return Err(TidelogError::OffsetOutOfRange {
                requested: from_offset,
                end,
            });
        }
        Ok(())
    }

    /// Reads without registering anyone.
    pub fn scan(&self, from_offset: u64, max_bytes: u32, committed_only: bool) -> Result<WalRead> {
        self.check_readable(from_offset)?;
        let end = self.offset();
        let commit = self.commit_offset();
        let bound = if committed_only { commit } else { end };

        if from_offset >= bound {
            return Ok(WalRead::empty(from_offset, commit));
        }

        let (segment, first_base) = {
            let segments = self.segments.read();
            let first = segments.keys().next().copied();
            let seg = segments
                .range(..=from_offset)
                .next_back()
                .map(|(_, s)| s.clone());
            (seg, first)
        };

        let Some(segment) = segment else {
            // pruned
            let next = first_base.unwrap_or(end);
            return Ok(WalRead::empty(next, commit));
        };

        let (frames, next_offset) = segment.read_frames(from_offset, bound, max_bytes);
        Ok(WalRead {
            data: if frames.is_empty() { None } else { Some(frames) },
            next_offset,
            commit_offset: commit,
        })
    }

    /// Recomputes follower sync state and returns the new commit offset.
    pub fn update_isr(&self) -> u64 {
        self.followers.update(self.offset(), self.isr_threshold);
        self.recompute_commit()
    }

    fn recompute_commit(&self) -> u64 {
        let leader = self.offset();
        let candidate = match self.followers.min_isr_offset() {
            Some(min) => Some(min.min(leader)),
            None if self.commit_without_followers && !self.followers.has_replicas() => Some(leader),
            None => None,
        };
        match candidate {
            // bounded by the slowest in-sync follower, even one that just joined
            Some(commit) => {
                self.commit.store(commit, Ordering::Release);
                commit
            }
            None => self.commit_offset(),
        }
    }

    /// Adopts a commit offset reported by the route leader, capped at the
    /// local end of the log.
    pub fn observe_commit(&self, leader_commit: u64) -> u64 {
        let commit = leader_commit.min(self.offset());
        self.commit.store(commit, Ordering::Release);
        commit
    }

    /// Deletes sealed segments that every follower has read past.
    pub fn prune(&self) -> Result<usize> {
        if !self.deletion_enabled {
            return Ok(0);
        }
        let Some(floor) = self.followers.min_offset() else {
            return Ok(0);
        };

        let victims: Vec<Arc<Segment>> = {
            let mut segments = self.segments.write();
            let Some(active_base) = segments.keys().next_back().copied() else {
                return Ok(0);
            };
            let doomed: Vec<u64> = segments
                .range(..active_base)
                .filter(|(_, s)| s.logical_end() <= floor)
                .map(|(base, _)| *base)
                .collect();
            doomed
                .into_iter()
                .filter_map(|base| segments.remove(&base))
                .collect()
        };

        for segment in &victims {
            segment.remove_file()?;
            debug!(dir = %self.dir.display(), segment = segment.index(), floor, "Deleted segment");
        }
        Ok(victims.len())
    }

    /// Flushes, persists follower offsets and releases the active segment.
    pub fn close(&self) -> Result<()> {
        let writer = self.writer.lock().take();
        let Some(writer) = writer else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);

        writer.active.flush()?;
        self.persist_followers()?;
        self.segments.write().clear();
        self.followers.clear();

        info!(dir = %self.dir.display(), offset = self.offset(), "Closed WAL");
        Ok(())
    }

    fn persist_followers(&self) -> Result<()> {
        let followers = self.followers.snapshot();
        let json = serde_json::to_vec_pretty(&followers)?;
        let tmp = self.dir.join(format!("{}.tmp", FOLLOWERS_FILE));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.dir.join(FOLLOWERS_FILE))?;
        Ok(())
    }

    fn restore_followers(&self) -> Result<()> {
        let path = self.dir.join(FOLLOWERS_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Vec<FollowerStatus>>(&bytes) {
            Ok(followers) => {
                self.followers.restore(&followers, self.offset());
                debug!(dir = %self.dir.display(), count = followers.len(), "Restored followers");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable follower state"),
        }
        Ok(())
    }

    fn active_segment(&self) -> Option<Arc<Segment>> {
        self.writer.lock().as_ref().map(|w| w.active.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn commit_offset(&self) -> u64 {
        self.commit.load(Ordering::Acquire)
    }

    pub fn follower_offset(&self, key: FollowerKey) -> Option<u64> {
        self.followers.offset(key)
    }

    pub fn is_isr(&self, key: FollowerKey) -> bool {
        self.followers.is_isr(key)
    }

    pub fn followers(&self) -> Vec<FollowerStatus> {
        self.followers.snapshot()
    }

    /// Index of the active segment.
    pub fn segment_counter(&self) -> u64 {
        self.segments
            .read()
            .values()
            .next_back()
            .map_or(0, |s| s.index())
    }

    /// Number of segments currently on disk.
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Offset of the oldest retained record.
    pub fn first_offset(&self) -> u64 {
        self.segments
            .read()
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.offset())
    }

    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    pub fn deletion_enabled(&self) -> bool {
        self.deletion_enabled
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(dir = %self.dir.display(), error = %e, "Failed to close WAL on drop");
        }
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("offset", &self.offset())
            .field("commit", &self.commit_offset())
            .field("segments", &self.segment_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn isr_config(threshold: u64) -> IsrConfig {
        IsrConfig {
            threshold,
            ..IsrConfig::default()
        }
    }

    fn open(dir: &Path, segment_size: u32, isr: &IsrConfig) -> Wal {
        let config = WalConfig {
            dir: dir.to_path_buf(),
            segment_size,
            ..WalConfig::default()
        };
        Wal::open(dir, &config, isr).unwrap()
    }

    #[test]
    fn test_offset_accounting() {
        let dir = tempdir().unwrap();
        let wal = Wal::configure(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(wal.offset(), 4);

        for i in 0..100u32 {
            let at = wal.write(&[i as u8; 10], false).unwrap();
            assert_eq!(at, 4 + i as u64 * 14);
        }
        assert_eq!(wal.offset(), 4 + 100 * 14);
        assert_eq!(wal.segment_counter(), 0);
    }

    #[test]
    fn test_rotation_never_splits_records() {
        let dir = tempdir().unwrap();
        let wal = Wal::configure(dir.path(), 5000).unwrap();
        for _ in 0..2000 {
            wal.write(b"abcdefg", false).unwrap();
        }

        assert_eq!(wal.segment_count(), 5);
        assert_eq!(wal.segment_counter(), 4);
        assert_eq!(wal.offset(), 4 + 2000 * 11);

        let first = wal.read(1, 4, 10_000, false).unwrap();
        assert_eq!(first.records().len(), 454);
        assert_eq!(first.next_offset, 4 + 454 * 11);

        let second = wal.read(1, first.next_offset, 10_000, false).unwrap();
        assert_eq!(second.records().len(), 454);
    }

    #[test]
    fn test_record_too_large() {
        let dir = tempdir().unwrap();
        let wal = Wal::configure(dir.path(), 64).unwrap();
        assert_eq!(wal.max_record_size(), 56);
        assert!(wal.write(&[0u8; 56], false).is_ok());
        match wal.write(&[0u8; 57], false) {
            Err(TidelogError::RecordTooLarge { size, max }) => {
                assert_eq!(size, 57);
                assert_eq!(max, 56);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_record_is_rejected() {
        let dir = tempdir().unwrap();
        let wal = Wal::configure(dir.path(), 4096).unwrap();
        assert!(matches!(
            wal.write(b"", false),
            Err(TidelogError::InvalidArgument(_))
        ));
        assert_eq!(wal.offset(), 4);
        assert_eq!(wal.write(b"a", false).unwrap(), 4);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let wal = Wal::configure(dir.path(), 4096).unwrap();
        wal.write(b"x", false).unwrap();

        assert!(matches!(
            wal.read(1, 100, 1024, false),
            Err(TidelogError::OffsetOutOfRange { requested: 100, end: 9 })
        ));

        let at_end = wal.read(1, 9, 1024, false).unwrap();
        assert!(at_end.data.is_none());
        assert_eq!(at_end.next_offset, 9);
    }

    #[test]
    fn test_committed_read_is_bounded() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path(), 4096, &isr_config(1_000_000));
        for i in 0..10u8 {
            wal.write(&[i; 6], false).unwrap();
        }

        // no follower in sync yet: nothing committed
        let nothing = wal.read(7, 4, 4096, true).unwrap();
        assert!(nothing.data.is_none());
        assert_eq!(nothing.next_offset, 4);
        assert_eq!(nothing.commit_offset, 4);

        // follower 7 has fetched up to the fifth record
        wal.read(7, 4 + 5 * 10, 4096, false).unwrap();
        assert_eq!(wal.update_isr(), 54);
        assert!(wal.is_isr(7));

        let committed = wal.read(8, 4, 4096, true).unwrap();
        assert_eq!(committed.records().len(), 5);
        assert_eq!(committed.next_offset, 54);
        assert!(committed.commit_offset <= wal.offset());
    }

    #[test]
    fn test_commit_without_followers() {
        let dir = tempdir().unwrap();
        let isr = IsrConfig {
            commit_without_followers: true,
            ..IsrConfig::default()
        };
        let wal = open(dir.path(), 4096, &isr);
        wal.write(b"solo", false).unwrap();
        assert_eq!(wal.update_isr(), wal.offset());

        let batch = wal.consume(99, 4, 4096, true).unwrap();
        assert_eq!(batch.records(), &[Bytes::from_static(b"solo")]);
    }

    #[test]
    fn test_replica_adopts_leader_commit() {
        let dir = tempdir().unwrap();
        let wal = Wal::configure(dir.path(), 4096).unwrap();
        wal.write(b"abc", false).unwrap();
        wal.write(b"def", false).unwrap();

        // capped at the local end
        assert_eq!(wal.observe_commit(500), 18);
        assert_eq!(wal.commit_offset(), 18);
        assert_eq!(wal.update_isr(), 18);

        // mirrors the leader when its commit falls back
        assert_eq!(wal.observe_commit(11), 11);
        assert_eq!(wal.commit_offset(), 11);
    }

    #[test]
    fn test_late_follower_pulls_commit_back() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path(), 4096, &isr_config(1_000_000));
        for i in 0..10u8 {
            wal.write(&[i; 8], false).unwrap();
        }
        let end = wal.offset();
        assert_eq!(end, 124);

        wal.read(1, end, 4096, false).unwrap();
        assert_eq!(wal.update_isr(), end);

        // follower 2 joins from the start and is within the threshold
        wal.read(2, 4, 4096, false).unwrap();
        assert_eq!(wal.update_isr(), 4);
        assert!(wal.is_isr(2));
        assert_eq!(wal.commit_offset(), 4);
        assert!(wal.scan(4, 4096, true).unwrap().data.is_none());

        wal.read(2, 64, 4096, false).unwrap();
        assert_eq!(wal.update_isr(), 64);
    }

    #[test]
    fn test_commit_is_kept_when_nobody_is_in_sync() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path(), 4096, &isr_config(20));
        for i in 0..10u8 {
            wal.write(&[i; 8], false).unwrap();
        }
        wal.read(1, wal.offset(), 4096, false).unwrap();
        assert_eq!(wal.update_isr(), 124);

        // follower 1 falls out of sync; the commit stays where it was
        for i in 0..5u8 {
            wal.write(&[i; 8], false).unwrap();
        }
        assert_eq!(wal.update_isr(), 124);
        assert!(!wal.is_isr(1));
    }

    #[test]
    fn test_follower_offsets_persist() {
        let dir = tempdir().unwrap();
        {
            let wal = Wal::configure(dir.path(), 4096).unwrap();
            wal.write(b"abc", false).unwrap();
            wal.read(5, 11, 1024, false).unwrap();
            wal.close().unwrap();
        }

        let wal = Wal::configure(dir.path(), 4096).unwrap();
        assert_eq!(wal.follower_offset(5), Some(11));
        assert!(!wal.is_isr(5));
    }

    #[test]
    fn test_closed_wal_rejects_io() {
        let dir = tempdir().unwrap();
        let wal = Wal::configure(dir.path(), 4096).unwrap();
        wal.close().unwrap();
        wal.close().unwrap();
        assert!(matches!(wal.write(b"x", false), Err(TidelogError::Closed)));
        assert!(matches!(wal.read(1, 4, 10, false), Err(TidelogError::Closed)));
    }

    #[test]
    fn test_prune_keeps_unread_segments() {
        let dir = tempdir().unwrap();
        let config = WalConfig {
            dir: dir.path().to_path_buf(),
            segment_size: 64,
            deletion_enabled: true,
            ..WalConfig::default()
        };
        let wal = Wal::open(dir.path(), &config, &IsrConfig::default()).unwrap();
        // four 14-byte frames fill a 64-byte segment
        for _ in 0..12 {
            wal.write(&[1u8; 10], false).unwrap();
        }
        assert_eq!(wal.segment_count(), 3);

        // nobody has read: nothing goes
        assert_eq!(wal.prune().unwrap(), 0);

        let first = wal.read(1, 4, 4096, false).unwrap();
        wal.read(1, first.next_offset, 4096, false).unwrap();
        assert_eq!(wal.prune().unwrap(), 1);
        assert_eq!(wal.segment_count(), 2);
        assert_eq!(wal.first_offset(), first.next_offset);

        // reads below the retained range skip forward
        let skipped = wal.read(2, 4, 4096, false).unwrap();
        assert!(skipped.data.is_none());
        assert_eq!(skipped.next_offset, first.next_offset);
    }

    #[test]
    fn test_prune_does_nothing_when_deletion_is_disabled() {
        let dir = tempdir().unwrap();
        let wal = open(dir.path(), 64, &IsrConfig::default());
        for _ in 0..12 {
            wal.write(&[1u8; 10], false).unwrap();
        }
        let mut offset = 4;
        while offset < wal.offset() {
            offset = wal.read(1, offset, 4096, false).unwrap().next_offset;
        }
        wal.read(1, offset, 4096, false).unwrap();

        assert!(!wal.deletion_enabled());
        assert_eq!(wal.prune().unwrap(), 0);
        assert_eq!(wal.segment_count(), 3);
        assert_eq!(wal.first_offset(), 4);
    }
}
