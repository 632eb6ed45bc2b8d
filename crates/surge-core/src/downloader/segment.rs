//! Segment data model and the shared segment store.
//!
//! A segment is a closed byte range `[start, end]` of the origin file backed
//! by one part file and written by exactly one worker at a time. `end` and
//! `downloaded` are guarded by a per-segment lock because the owning worker
//! and the splitter touch them concurrently. The store serializes list
//! mutation (seed, split-append) behind its own lock.
//!
//! Lock order everywhere: store lock, then segment lock. Never the reverse.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Byte range state guarded by the segment lock.
#[derive(Debug)]
struct SegmentState {
    /// Inclusive end offset. Only ever shrinks (via a split).
    end: u64,
    /// Bytes committed to the part file so far.
    downloaded: u64,
}

/// One contiguous byte range of the origin file. `id` and `start` are
/// immutable after creation.
#[derive(Debug)]
pub struct Segment {
    id: usize,
    start: u64,
    part_path: PathBuf,
    state: Mutex<SegmentState>,
}

impl Segment {
    /// Creates the segment and its (empty) part file.
    fn create(id: usize, start: u64, end: u64, part_path: PathBuf) -> Result<Arc<Self>> {
        debug_assert!(end >= start);
        File::create(&part_path)
            .with_context(|| format!("create part file {}", part_path.display()))?;
        Ok(Arc::new(Segment {
            id,
            start,
            part_path,
            state: Mutex::new(SegmentState { end, downloaded: 0 }),
        }))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Current inclusive end offset.
    pub fn end(&self) -> u64 {
        self.state.lock().unwrap().end
    }

    pub fn downloaded(&self) -> u64 {
        self.state.lock().unwrap().downloaded
    }

    /// Current range and resume offset as one consistent snapshot:
    /// `(start + downloaded, end)`.
    pub fn request_range(&self) -> (u64, u64) {
        let st = self.state.lock().unwrap();
        (self.start + st.downloaded, st.end)
    }

    /// Bytes not yet downloaded: `end - start + 1 - downloaded`.
    pub fn remaining(&self) -> u64 {
        let st = self.state.lock().unwrap();
        (st.end - self.start + 1).saturating_sub(st.downloaded)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Commits a body chunk: writes to `file` and advances `downloaded`,
    /// clipped at the segment's current `end`. Both happen under the segment
    /// lock so a concurrent split can never observe a half-applied chunk.
    ///
    /// Returns the number of bytes accepted; less than `data.len()` means the
    /// range was shrunk under us and the transfer should stop.
    pub(super) fn write_chunk(&self, file: &mut File, data: &[u8]) -> std::io::Result<usize> {
        let mut st = self.state.lock().unwrap();
        let span = st.end - self.start + 1;
        let accept = (data.len() as u64).min(span.saturating_sub(st.downloaded)) as usize;
        if accept > 0 {
            file.write_all(&data[..accept])?;
            st.downloaded += accept as u64;
        }
        Ok(accept)
    }

    /// Gives the tail half of the remaining range to a new segment:
    /// shrinks `end` to the midpoint and returns the stolen `(start, end)`.
    ///
    /// Re-checks `remaining` under the lock so a race with the owning worker
    /// can only make the split smaller, never invalid. Returns `None` when
    /// less than `min_remaining` is left.
    fn split_tail(&self, min_remaining: u64) -> Option<(u64, u64)> {
        let mut st = self.state.lock().unwrap();
        let remaining = (st.end - self.start + 1).saturating_sub(st.downloaded);
        // Below 4 remaining bytes the midpoint formula would leave one side
        // of the split empty.
        if remaining < min_remaining || remaining < 4 {
            return None;
        }
        let midpoint = self.start + st.downloaded + remaining / 2;
        let stolen = (midpoint + 1, st.end);
        st.end = midpoint;
        Some(stolen)
    }
}

/// Ordered list of segments for one download. Writers are the coordinator
/// (seed) and the splitter (split + append); the progress loop and the
/// finalizer only read.
#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: Mutex<Vec<Arc<Segment>>>,
}

/// Result of a successful split, for logging.
pub(super) struct Split {
    pub source_id: usize,
    pub segment: Arc<Segment>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `count` segments over `[0, total_size - 1]` by equal division;
    /// the last segment absorbs the remainder. Files are created in the
    /// directory chosen by `part_path`. For files too small to divide, a
    /// single segment covers the whole range.
    pub(super) fn seed(
        &self,
        total_size: u64,
        count: usize,
        part_path: impl Fn(usize) -> PathBuf,
    ) -> Result<Vec<Arc<Segment>>> {
        debug_assert!(total_size > 0 && count > 0);
        let size = total_size / count as u64;
        let count = if size == 0 { 1 } else { count };

        let mut seeded = Vec::with_capacity(count);
        for i in 0..count {
            let start = i as u64 * size;
            let end = if i == count - 1 {
                total_size - 1
            } else {
                start + size - 1
            };
            seeded.push(Segment::create(i, start, end, part_path(i))?);
        }

        let mut segments = self.segments.lock().unwrap();
        debug_assert!(segments.is_empty(), "store seeded twice");
        *segments = seeded.clone();
        Ok(seeded)
    }

    pub fn len(&self) -> usize {
        self.segments.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of `downloaded` over all segments, read under store lock then each
    /// segment lock in turn.
    pub fn total_downloaded(&self) -> u64 {
        let segments = self.segments.lock().unwrap();
        segments.iter().map(|s| s.downloaded()).sum()
    }

    /// Current segments, for read-only traversal (progress, finalize).
    pub fn snapshot(&self) -> Vec<Arc<Segment>> {
        self.segments.lock().unwrap().clone()
    }

    /// Splits the segment with the most remaining bytes, appending the stolen
    /// tail as a new segment with a fresh part file.
    ///
    /// Returns `Ok(None)` when no segment has `min_remaining` bytes left to
    /// give. The store lock is held for the whole operation so the new
    /// segment's id (`len` at split time) is race-free.
    pub(super) fn split_largest(
        &self,
        min_remaining: u64,
        part_path: impl Fn(usize) -> PathBuf,
    ) -> Result<Option<Split>> {
        let mut segments = self.segments.lock().unwrap();

        let largest = match segments.iter().max_by_key(|s| s.remaining()) {
            Some(s) => Arc::clone(s),
            None => return Ok(None),
        };
        if largest.remaining() < min_remaining {
            return Ok(None);
        }
        let (start, end) = match largest.split_tail(min_remaining) {
            Some(range) => range,
            None => return Ok(None),
        };

        let id = segments.len();
        let segment = Segment::create(id, start, end, part_path(id))?;
        segments.push(Arc::clone(&segment));
        Ok(Some(Split {
            source_id: largest.id(),
            segment,
        }))
    }
}
