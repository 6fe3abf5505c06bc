//! Fixed-size, memory-mapped segment files.
//!
//! Layout of a segment:
//!
//! ```text
//! +----------------+--------------------------------+-----+------------+
//! | header: u32 BE | len: u32 BE | payload (len)    | ... | zero fill  |
//! +----------------+--------------------------------+-----+------------+
//! 0                4
//! ```
//!
//! The header holds the end of data inside the file and is rewritten after
//! every append. A segment belongs to exactly one writer at a time; readers
//! only ever look below the published end, which is stored with `Release`
//! after the frame bytes are in place.

use crate::error::{Result, TidelogError};
use bytes::Bytes;
use memmap2::{Mmap, MmapMut};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, warn};

/// Size of the segment header.
pub const HEADER_SIZE: u32 = 4;

/// Size of the length prefix of every frame.
pub const FRAME_HEADER_SIZE: u32 = 4;

const SEGMENT_EXTENSION: &str = "wal";

/// File name for a segment: index and base offset, both zero padded.
pub fn segment_file_name(index: u64, base: u64) -> String {
    format!("{:012}-{:020}.{}", index, base, SEGMENT_EXTENSION)
}

/// Parses a name produced by [`segment_file_name`].
pub fn parse_segment_file_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    let (index, base) = stem.split_once('-')?;
    Some((index.parse().ok()?, base.parse().ok()?))
}

/// Lists `(index, base, path)` for every segment in `dir`, ordered by index.
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, u64, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((index, base)) = parse_segment_file_name(name) {
            found.push((index, base, entry.path()));
        }
    }
    found.sort_by_key(|(index, _, _)| *index);
    Ok(found)
}

fn read_u32(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Finds the end of valid data in a segment image.
///
/// The header is trusted when walking the frames from the start lands on it
/// exactly. Otherwise frames are walked until a zero length prefix (the
/// zero fill), a short frame, or one that runs past the end of the file.
/// Records are never empty, so a zero prefix cannot be real data.
pub fn recover_end(buf: &[u8]) -> u32 {
    let capacity = buf.len();
    let header = read_u32(buf, 0).map(|h| h as usize);

    if let Some(claimed) = header.filter(|h| (HEADER_SIZE as usize..=capacity).contains(h)) {
        let mut pos = HEADER_SIZE as usize;
        while pos < claimed {
            match read_u32(buf, pos) {
                Some(len) if pos + 4 + len as usize <= claimed => pos += 4 + len as usize,
                _ => break,
            }
        }
        if pos == claimed {
            return claimed as u32;
        }
    }

    let mut pos = HEADER_SIZE as usize;
    while let Some(len) = read_u32(buf, pos) {
        if len == 0 || pos + 4 + len as usize > capacity {
            break;
        }
        pos += 4 + len as usize;
    }
    pos as u32
}

enum SegmentMap {
    Read(Mmap),
    Write(MmapMut),
}

/// One segment file.
pub struct Segment {
    index: u64,
    base: u64,
    path: PathBuf,
    capacity: u32,
    map: SegmentMap,
    data: *mut u8,
    end: AtomicU32,
    sealed: AtomicBool,
}

// SAFETY: `data` points into `map`, which lives as long as the segment. Bytes
// below `end` are never written again; bytes at or above it are only written
// by the single owner of the WAL writer lock and are not read until `end` is
// advanced with Release ordering.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates and pre-allocates a new segment.
    pub fn create(dir: &Path, index: u64, base: u64, capacity: u32) -> Result<Self> {
        let path = dir.join(segment_file_name(index, base));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(capacity as u64)?;

        // SAFETY: the file was just created by this process and is not
        // truncated while mapped.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        if map.len() != capacity as usize {
            return Err(TidelogError::Storage(format!(
                "segment {} mapped {} bytes, expected {}",
                path.display(),
                map.len(),
                capacity
            )));
        }
        map[..HEADER_SIZE as usize].copy_from_slice(&HEADER_SIZE.to_be_bytes());
        let data = map.as_mut_ptr();

        debug!(segment = index, base, capacity, "Created segment");
        Ok(Self {
            index,
            base,
            path,
            capacity,
            map: SegmentMap::Write(map),
            data,
            end: AtomicU32::new(HEADER_SIZE),
            sealed: AtomicBool::new(false),
        })
    }

    /// Opens an existing segment and recovers its end of data.
    ///
    /// A writable segment has everything past the recovered end zeroed so a
    /// torn frame cannot resurface after later appends.
    pub fn open(path: &Path, index: u64, base: u64, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        if len < (HEADER_SIZE + FRAME_HEADER_SIZE) as u64 || len > u32::MAX as u64 {
            return Err(TidelogError::DataCorruption(format!(
                "segment {} has invalid size {}",
                path.display(),
                len
            )));
        }
        let capacity = len as u32;

        let (map, data, end) = if writable {
            // SAFETY: segment files are only modified through this mapping.
            let mut map = unsafe { MmapMut::map_mut(&file)? };
            let end = recover_end(&map);
            map[end as usize..].fill(0);
            map[..HEADER_SIZE as usize].copy_from_slice(&end.to_be_bytes());
            map.flush()?;
            let data = map.as_mut_ptr();
            (SegmentMap::Write(map), data, end)
        } else {
            // SAFETY: sealed segments are never written again.
            let map = unsafe { Mmap::map(&file)? };
            let end = recover_end(&map);
            let data = map.as_ptr() as *mut u8;
            (SegmentMap::Read(map), data, end)
        };

        debug!(segment = index, base, end, writable, "Opened segment");
        Ok(Self {
            index,
            base,
            path: path.to_path_buf(),
            capacity,
            map,
            data,
            end: AtomicU32::new(end),
            sealed: AtomicBool::new(!writable),
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Logical offset of the first frame.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Published end of data as a file position.
    pub fn end(&self) -> u32 {
        self.end.load(Ordering::Acquire)
    }

    /// Logical offset just past the last frame.
    pub fn logical_end(&self) -> u64 {
        self.base + (self.end() - HEADER_SIZE) as u64
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn has_room(&self, payload_len: usize) -> bool {
        self.end() as u64 + FRAME_HEADER_SIZE as u64 + payload_len as u64 <= self.capacity as u64
    }

    /// Appends one frame. Must only be called by the holder of the writer lock.
    pub(crate) fn append(&self, payload: &[u8]) -> Result<u32> {
        if self.is_sealed() || !matches!(self.map, SegmentMap::Write(_)) {
            return Err(TidelogError::Storage(format!(
                "segment {} is sealed",
                self.index
            )));
        }
        if !self.has_room(payload.len()) {
            return Err(TidelogError::Storage(format!(
                "segment {} is full",
                self.index
            )));
        }

        let pos = self.end() as usize;
        let len = payload.len() as u32;
        let new_end = pos as u32 + FRAME_HEADER_SIZE + len;

        // SAFETY: [pos, new_end) lies inside the mapping (checked by
        // has_room) and above the published end, so no reader observes it.
        unsafe {
            ptr::copy_nonoverlapping(len.to_be_bytes().as_ptr(), self.data.add(pos), 4);
            ptr::copy_nonoverlapping(payload.as_ptr(), self.data.add(pos + 4), payload.len());
        }
        self.end.store(new_end, Ordering::Release);

        // SAFETY: readers never look at the header of a live segment.
        unsafe {
            ptr::copy_nonoverlapping(new_end.to_be_bytes().as_ptr(), self.data, 4);
        }
        Ok(new_end)
    }

    /// Frame bytes below the published end, starting right after the header.
    fn published(&self) -> &[u8] {
        let len = self.end().saturating_sub(HEADER_SIZE) as usize;
        // SAFETY: bytes in [HEADER_SIZE, end) are never written again. The
        // header is rewritten by the writer and stays outside this slice.
        unsafe { slice::from_raw_parts(self.data.add(HEADER_SIZE as usize) as *const u8, len) }
    }

    /// Reads whole frames starting at logical offset `from`.
    ///
    /// Stops at `bound` (a logical offset), at the end of this segment, or
    /// once adding a frame would exceed `max_bytes`. The first frame is
    /// always returned when it fits under `bound`. Returns the frames and the
    /// logical offset following the last one.
    pub fn read_frames(&self, from: u64, bound: u64, max_bytes: u32) -> (Vec<Bytes>, u64) {
        // positions are relative to the first frame, which sits at `base`
        let frames_buf = self.published();
        let limit = bound.saturating_sub(self.base).min(frames_buf.len() as u64) as usize;
        let mut pos = from.saturating_sub(self.base) as usize;

        let mut frames = Vec::new();
        let mut total: u64 = 0;
        while pos + FRAME_HEADER_SIZE as usize <= limit {
            let Some(len) = read_u32(frames_buf, pos) else { break };
            let frame_len = FRAME_HEADER_SIZE as u64 + len as u64;
            let frame_end = pos + frame_len as usize;
            if frame_end > limit {
                break;
            }
            if !frames.is_empty() && total + frame_len > max_bytes as u64 {
                break;
            }
            frames.push(Bytes::copy_from_slice(&frames_buf[pos + 4..frame_end]));
            total += frame_len;
            pos = frame_end;
        }

        (frames, self.base + pos as u64)
    }

    pub fn flush(&self) -> Result<()> {
        if let SegmentMap::Write(map) = &self.map {
            map.flush_range(0, self.end() as usize)?;
        }
        Ok(())
    }

    /// Flushes and marks the segment immutable.
    pub fn seal(&self) -> Result<()> {
        self.flush()?;
        self.sealed.store(true, Ordering::Release);
        Ok(())
    }

    /// Deletes the file. The mapping stays valid for readers holding it.
    pub fn remove_file(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Segment already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("index", &self.index)
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("end", &self.end())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// Syncs the directory entry so newly created segment files survive a crash.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_name_roundtrip() {
        let name = segment_file_name(3, 15_004);
        assert_eq!(name, "000000000003-00000000000000015004.wal");
        assert_eq!(parse_segment_file_name(&name), Some((3, 15_004)));
        assert_eq!(parse_segment_file_name("followers.json"), None);
        assert_eq!(parse_segment_file_name("x-y.wal"), None);
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let segment = Segment::create(dir.path(), 0, 4, 64).unwrap();

        segment.append(b"hello").unwrap();
        segment.append(b"world!").unwrap();
        assert_eq!(segment.end(), 4 + 9 + 10);
        assert_eq!(segment.logical_end(), 4 + 9 + 10);

        let (frames, next) = segment.read_frames(4, u64::MAX, 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world!")]);
        assert_eq!(next, 23);

        let (frames, next) = segment.read_frames(13, u64::MAX, 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"world!")]);
        assert_eq!(next, 23);
    }

    #[test]
    fn test_read_respects_bound_and_budget() {
        let dir = tempdir().unwrap();
        let segment = Segment::create(dir.path(), 0, 4, 256).unwrap();
        for _ in 0..5 {
            segment.append(b"abcdef").unwrap();
        }

        // bound cuts after two frames
        let (frames, next) = segment.read_frames(4, 4 + 20, 1024);
        assert_eq!(frames.len(), 2);
        assert_eq!(next, 24);

        // budget of 25 bytes fits two 10-byte frames
        let (frames, _) = segment.read_frames(4, u64::MAX, 25);
        assert_eq!(frames.len(), 2);

        // first frame is returned even if larger than the budget
        let (frames, next) = segment.read_frames(4, u64::MAX, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(next, 14);
    }

    #[test]
    fn test_reads_use_logical_offsets_past_the_header() {
        let dir = tempdir().unwrap();
        let segment = Segment::create(dir.path(), 2, 1000, 64).unwrap();
        segment.append(b"abc").unwrap();
        segment.append(b"defg").unwrap();
        assert_eq!(segment.logical_end(), 1000 + 7 + 8);

        let (frames, next) = segment.read_frames(1007, u64::MAX, 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"defg")]);
        assert_eq!(next, 1015);

        let (frames, next) = segment.read_frames(1015, u64::MAX, 1024);
        assert!(frames.is_empty());
        assert_eq!(next, 1015);
    }

    #[test]
    fn test_reader_runs_alongside_appends() {
        let dir = tempdir().unwrap();
        let segment = std::sync::Arc::new(Segment::create(dir.path(), 0, 4, 64 * 1024).unwrap());

        let reader = {
            let segment = segment.clone();
            std::thread::spawn(move || {
                let mut from = 4;
                let mut seen = 0;
                while seen < 2000 {
                    let (frames, next) = segment.read_frames(from, u64::MAX, 512);
                    for frame in &frames {
                        assert_eq!(frame.as_ref(), b"payload!");
                    }
                    seen += frames.len();
                    from = next;
                }
                from
            })
        };

        for _ in 0..2000 {
            segment.append(b"payload!").unwrap();
        }
        assert_eq!(reader.join().unwrap(), segment.logical_end());
        assert_eq!(read_u32(&fs::read(segment.path()).unwrap(), 0), Some(segment.end()));
    }

    #[test]
    fn test_has_room() {
        let dir = tempdir().unwrap();
        let segment = Segment::create(dir.path(), 0, 4, 20).unwrap();
        assert!(segment.has_room(12));
        assert!(!segment.has_room(13));
        segment.append(&[7u8; 12]).unwrap();
        assert!(!segment.has_room(0));
        assert!(segment.append(b"").is_err());
    }

    #[test]
    fn test_recover_trusts_consistent_header() {
        let dir = tempdir().unwrap();
        let path = {
            let segment = Segment::create(dir.path(), 0, 4, 128).unwrap();
            segment.append(b"one").unwrap();
            segment.append(b"").unwrap();
            segment.append(b"three").unwrap();
            segment.flush().unwrap();
            segment.path().to_path_buf()
        };

        let reopened = Segment::open(&path, 0, 4, true).unwrap();
        assert_eq!(reopened.end(), 4 + 7 + 4 + 9);
        let (frames, _) = reopened.read_frames(4, u64::MAX, 1024);
        assert_eq!(frames.len(), 3);
        assert!(frames[1].is_empty());
    }

    #[test]
    fn test_recover_truncated_tail() {
        let mut image = vec![0u8; 64];
        // stale header pointing past the data
        image[..4].copy_from_slice(&60u32.to_be_bytes());
        image[4..8].copy_from_slice(&3u32.to_be_bytes());
        image[8..11].copy_from_slice(b"abc");
        // declared 80 bytes, only 49 remain in the file
        image[11..15].copy_from_slice(&80u32.to_be_bytes());

        assert_eq!(recover_end(&image), 11);
    }

    #[test]
    fn test_recover_zeroes_tail_of_writable_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(segment_file_name(0, 4));
        let mut image = vec![0u8; 64];
        image[..4].copy_from_slice(&9u32.to_be_bytes()); // garbage header
        image[4..8].copy_from_slice(&2u32.to_be_bytes());
        image[8..10].copy_from_slice(b"ok");
        image[10..14].copy_from_slice(&200u32.to_be_bytes());
        std::fs::write(&path, &image).unwrap();

        let segment = Segment::open(&path, 0, 4, true).unwrap();
        assert_eq!(segment.end(), 10);
        segment.append(b"next").unwrap();
        segment.flush().unwrap();
        drop(segment);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(recover_end(&raw), 18);
        assert!(raw[18..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_sealed_segment_rejects_appends() {
        let dir = tempdir().unwrap();
        let segment = Segment::create(dir.path(), 0, 4, 64).unwrap();
        segment.append(b"x").unwrap();
        segment.seal().unwrap();
        assert!(segment.is_sealed());
        assert!(segment.append(b"y").is_err());
    }
}
