//! The sparse virtual file
//!
//! A [`SparseVirtualFile`] caches byte ranges of a remote or otherwise
//! expensive-to-access file at their original absolute positions. It never
//! fetches anything itself: callers ask [`SparseVirtualFile::need`] which
//! ranges are missing, fetch them, and deposit the results through
//! [`SparseVirtualFile::write`]. Writes coalesce with overlapping and
//! abutting resident blocks so the block layout stays canonical under any
//! interleaving of writes.

use std::collections::BTreeMap;
use std::mem;

use chrono::{DateTime, Utc};
use log::{debug, trace};

use crate::error::{Error, ReadError, Result};
use crate::storage::block_map::{Block, BlockMap};
use crate::types::{BlockTouch, FilePos, SeekRead, SvfConfig};

/// Version of the serializable snapshot layout
pub const STATE_VERSION: u32 = 1;

/// Serializable snapshot of a sparse virtual file's identity and blocks.
///
/// Statistics and touch ordering are not part of the snapshot: the
/// round-trip reconstructs a file through the public constructor and
/// replays every block through [`SparseVirtualFile::write`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SvfState {
    pub id: String,
    pub file_mod_time: f64,
    pub blocks: Vec<(FilePos, Vec<u8>)>,
    pub state_version: u32,
}

/// An in-memory cache of byte ranges of one underlying file.
///
/// The file is not internally synchronized: callers serialize access
/// externally, for example with [`crate::sync::RecursiveMutex`].
#[derive(Debug)]
pub struct SparseVirtualFile {
    id: String,
    file_mod_time: f64,
    config: SvfConfig,
    blocks: BlockMap,
    count_write: u64,
    count_read: u64,
    bytes_write: u64,
    bytes_read: u64,
    time_write: Option<DateTime<Utc>>,
    time_read: Option<DateTime<Utc>>,
}

impl SparseVirtualFile {
    /// Create an empty sparse virtual file with the default configuration.
    ///
    /// `mod_time` is an opaque timestamp of the underlying file; it is only
    /// ever compared for equality through
    /// [`SparseVirtualFile::file_mod_time_matches`].
    pub fn new(id: &str, mod_time: f64) -> Self {
        Self::with_config(id, mod_time, SvfConfig::default())
    }

    pub fn with_config(id: &str, mod_time: f64, config: SvfConfig) -> Self {
        Self {
            id: id.to_string(),
            file_mod_time: mod_time,
            config,
            blocks: BlockMap::new(),
            count_write: 0,
            count_read: 0,
            bytes_write: 0,
            bytes_read: 0,
            time_write: None,
            time_read: None,
        }
    }

    // ========================================================================
    // Attribute access
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_mod_time(&self) -> f64 {
        self.file_mod_time
    }

    /// Has the underlying file changed since this cache was created?
    /// The caller decides what to do when it has.
    pub fn file_mod_time_matches(&self, mod_time: f64) -> bool {
        self.file_mod_time == mod_time
    }

    pub fn config(&self) -> SvfConfig {
        self.config
    }

    pub fn count_write(&self) -> u64 {
        self.count_write
    }

    pub fn count_read(&self) -> u64 {
        self.count_read
    }

    /// Cumulative bytes written, including bytes that overlapped resident data
    pub fn bytes_write(&self) -> u64 {
        self.bytes_write
    }

    /// Cumulative bytes read, including repeated reads of the same range
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Wall clock of the most recent successful write, if any
    pub fn time_write(&self) -> Option<DateTime<Utc>> {
        self.time_write
    }

    /// Wall clock of the most recent successful read, if any
    pub fn time_read(&self) -> Option<DateTime<Utc>> {
        self.time_read
    }

    /// Exact number of resident blocks
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Exact number of resident data bytes
    pub fn num_bytes(&self) -> usize {
        self.blocks.bytes_total()
    }

    /// End position (exclusive) of the highest block, or 0 when empty
    pub fn last_file_position(&self) -> FilePos {
        self.blocks.last_file_position()
    }

    /// Best-effort estimate of total memory usage
    pub fn size_of(&self) -> usize {
        mem::size_of::<Self>() + self.id.capacity() + self.blocks.size_of()
    }

    /// The resident blocks as ascending (file position, size) pairs
    pub fn blocks(&self) -> Vec<SeekRead> {
        self.blocks
            .iter()
            .map(|(fpos, block)| (fpos, block.size()))
            .collect()
    }

    /// Current value of the monotonically increasing touch counter.
    /// The next block created or touched is assigned this value.
    pub fn block_touch(&self) -> BlockTouch {
        self.blocks.next_touch()
    }

    /// Snapshot of the touch counter of each block mapped to its position.
    /// Smaller counters identify less recently used blocks.
    pub fn block_touches(&self) -> BTreeMap<BlockTouch, FilePos> {
        self.blocks.touches()
    }

    // ========================================================================
    // Presence and fragmentation queries
    // ========================================================================

    /// True iff a single resident block fully contains `[fpos, fpos + len)`.
    /// A zero-length query is trivially true.
    pub fn has(&self, fpos: FilePos, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        match self.blocks.predecessor(fpos) {
            Some((block_fpos, block)) => fpos + len as u64 <= block.end(block_fpos),
            None => false,
        }
    }

    /// The minimal ordered seek/read instructions that, once fetched and
    /// written back, make `has(fpos, len)` true. Empty when the data is
    /// already resident. Never errors and never mutates.
    pub fn need(&self, fpos: FilePos, len: usize) -> Vec<SeekRead> {
        self.need_greedy(fpos, len, 0)
    }

    /// Like [`SparseVirtualFile::need`], but with `greedy_len > 0`
    /// consecutive gaps whose combined span (including the resident run
    /// between them) is at most `greedy_len` are coalesced into one
    /// instruction, and every instruction shorter than `greedy_len` is
    /// rounded up to it.
    ///
    /// The file length is unknown here, so a greedy instruction may extend
    /// past EOF; the caller is responsible for clamping what it actually
    /// fetches. For a 1024 byte file, `need_greedy(1000, 24, 256)` yields
    /// `[(1000, 256)]` and the caller should fetch and write 24 bytes.
    pub fn need_greedy(&self, fpos: FilePos, len: usize, greedy_len: usize) -> Vec<SeekRead> {
        let mut gaps: Vec<SeekRead> = Vec::new();
        if len == 0 {
            return gaps;
        }
        let end = fpos + len as u64;
        let mut cursor = fpos;
        if let Some((block_fpos, block)) = self.blocks.predecessor(cursor) {
            let block_end = block.end(block_fpos);
            if block_end > cursor {
                cursor = block_end.min(end);
            }
        }
        for (block_fpos, block) in self.blocks.iter_after(cursor) {
            if cursor >= end || block_fpos >= end {
                break;
            }
            if block_fpos > cursor {
                gaps.push((cursor, (block_fpos - cursor) as usize));
            }
            cursor = block.end(block_fpos).min(end);
        }
        if cursor < end {
            gaps.push((cursor, (end - cursor) as usize));
        }
        if greedy_len > 0 {
            gaps = coalesce_greedy(gaps, greedy_len);
        }
        gaps
    }

    // ========================================================================
    // Write engine
    // ========================================================================

    /// Deposit `data` at `fpos`, coalescing with every resident block that
    /// overlaps or abuts the new range.
    ///
    /// The write is all-or-nothing. With `COMPARE_FOR_DIFF` set, any
    /// overlapping byte that differs from resident data rejects the whole
    /// write with [`Error::Diff`] and the file is left unchanged: the
    /// verification pass runs against the resident blocks and the coalesced
    /// payload is composed in a fresh buffer before the block map is
    /// touched. On overlap the resident byte is kept, so a verified write
    /// and an unchecked write produce identical contents.
    ///
    /// An empty `data` is a no-op and moves no counters.
    pub fn write(&mut self, fpos: FilePos, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = fpos + data.len() as u64;
        let merge = self.merge_set(fpos, end);
        if merge.is_empty() {
            self.blocks.insert(fpos, data.to_vec());
            trace!("svf {}: write [{}, {}) new block", self.id, fpos, end);
        } else {
            if self.config.compare_for_diff() {
                self.verify_overlaps(fpos, data, &merge)?;
            }
            self.commit_merge(fpos, data, &merge)?;
            trace!(
                "svf {}: write [{}, {}) merged {} block(s)",
                self.id,
                fpos,
                end,
                merge.len()
            );
        }
        self.count_write += 1;
        self.bytes_write += data.len() as u64;
        self.time_write = Some(Utc::now());
        debug_assert!(self.blocks.integrity().is_ok(), "{:?}", self.blocks.integrity());
        Ok(())
    }

    /// Positions of all resident blocks whose range intersects or abuts
    /// `[fpos, end)`, in ascending order.
    fn merge_set(&self, fpos: FilePos, end: FilePos) -> Vec<FilePos> {
        let mut set = Vec::new();
        if let Some((block_fpos, block)) = self.blocks.predecessor(fpos) {
            if block.end(block_fpos) >= fpos {
                set.push(block_fpos);
            }
        }
        for (block_fpos, _) in self.blocks.iter_after(fpos) {
            if block_fpos > end {
                break;
            }
            set.push(block_fpos);
        }
        set
    }

    /// Pre-commit pass: compare the incoming bytes with resident data over
    /// every overlap and report the first difference.
    fn verify_overlaps(&self, fpos: FilePos, data: &[u8], merge: &[FilePos]) -> Result<()> {
        let end = fpos + data.len() as u64;
        for &block_fpos in merge {
            let block = self
                .blocks
                .get(block_fpos)
                .ok_or_else(|| Error::internal("merge set entry vanished"))?;
            let lo = fpos.max(block_fpos);
            let hi = end.min(block.end(block_fpos));
            if lo >= hi {
                continue; // abutting block, nothing overlaps
            }
            let incoming = &data[(lo - fpos) as usize..(hi - fpos) as usize];
            let existing = &block.data()[(lo - block_fpos) as usize..(hi - block_fpos) as usize];
            if let Some(i) = incoming
                .iter()
                .zip(existing.iter())
                .position(|(a, b)| a != b)
            {
                return Err(Error::Diff {
                    file_position: lo + i as u64,
                    existing: existing[i],
                    incoming: incoming[i],
                });
            }
        }
        Ok(())
    }

    /// Compose the coalesced payload in a fresh buffer, then swap it in for
    /// the merge set. Resident bytes win over incoming bytes on overlap.
    fn commit_merge(&mut self, fpos: FilePos, data: &[u8], merge: &[FilePos]) -> Result<()> {
        let end = fpos + data.len() as u64;
        let first = merge[0];
        let last = merge[merge.len() - 1];
        let last_end = self
            .blocks
            .get(last)
            .map(|b| b.end(last))
            .ok_or_else(|| Error::internal("merge set entry vanished"))?;
        let lo = fpos.min(first);
        let hi = end.max(last_end);

        let mut payload = vec![0u8; (hi - lo) as usize];
        let data_at = (fpos - lo) as usize;
        payload[data_at..data_at + data.len()].copy_from_slice(data);
        for &block_fpos in merge {
            let block = self
                .blocks
                .get(block_fpos)
                .ok_or_else(|| Error::internal("merge set entry vanished"))?;
            let block_at = (block_fpos - lo) as usize;
            payload[block_at..block_at + block.size()].copy_from_slice(block.data());
        }
        for &block_fpos in merge {
            let absorbed = self
                .blocks
                .remove(block_fpos)
                .ok_or_else(|| Error::internal("merge set entry vanished"))?;
            self.dispose(absorbed);
        }
        self.blocks.insert(lo, payload);
        Ok(())
    }

    // ========================================================================
    // Read engine
    // ========================================================================

    /// Read `len` bytes at `fpos` into a fresh buffer. The range must be
    /// fully contained in a single resident block.
    pub fn read(&mut self, fpos: FilePos, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(fpos, &mut buf)?;
        Ok(buf)
    }

    /// Read into a caller-supplied buffer, reading `buf.len()` bytes.
    ///
    /// A successful read refreshes the containing block's touch counter, so
    /// regularly read blocks survive [`SparseVirtualFile::lru_punt`]. The
    /// buffer is never partially filled: on error it is left as passed in.
    /// An empty buffer is a no-op and moves no counters.
    pub fn read_into(&mut self, fpos: FilePos, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let len = buf.len();
        let end = fpos + len as u64;
        let (block_fpos, block) = match self.blocks.predecessor(fpos) {
            Some(found) => found,
            None => {
                let kind = match self.blocks.iter().next() {
                    None => ReadError::Empty,
                    Some((first, _)) => ReadError::BeforeFirst { first },
                };
                return Err(Error::Read {
                    kind,
                    file_position: fpos,
                    length: len,
                });
            }
        };
        let block_end = block.end(block_fpos);
        if fpos >= block_end {
            return Err(Error::Read {
                kind: ReadError::Gap {
                    block_fpos,
                    block_size: block.size(),
                },
                file_position: fpos,
                length: len,
            });
        }
        if end > block_end {
            return Err(Error::Read {
                kind: ReadError::Overruns {
                    block_fpos,
                    block_size: block.size(),
                },
                file_position: fpos,
                length: len,
            });
        }
        let offset = (fpos - block_fpos) as usize;
        buf.copy_from_slice(&block.data()[offset..offset + len]);
        self.blocks.refresh_touch(block_fpos);
        self.count_read += 1;
        self.bytes_read += len as u64;
        self.time_read = Some(Utc::now());
        Ok(())
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Remove the block that starts exactly at `fpos` and return its size.
    /// A position inside a block is rejected with [`Error::Erase`].
    pub fn erase(&mut self, fpos: FilePos) -> Result<usize> {
        match self.blocks.remove(fpos) {
            Some(block) => {
                let size = block.size();
                self.dispose(block);
                debug!("svf {}: erased block [{}, {})", self.id, fpos, fpos + size as u64);
                Ok(size)
            }
            None => Err(Error::Erase {
                file_position: fpos,
            }),
        }
    }

    /// Evict least recently touched blocks until the resident byte total is
    /// within `byte_budget` or a single block remains. Returns the number
    /// of bytes removed.
    ///
    /// A single block larger than the budget is never split and therefore
    /// cannot be punted below its own size; erase it explicitly if it has
    /// to go.
    pub fn lru_punt(&mut self, byte_budget: usize) -> usize {
        let mut removed = 0usize;
        while self.blocks.len() > 1 && self.blocks.bytes_total() > byte_budget {
            let (touch, fpos) = match self.blocks.oldest() {
                Some(oldest) => oldest,
                None => break,
            };
            match self.blocks.remove(fpos) {
                Some(block) => {
                    removed += block.size();
                    debug!(
                        "svf {}: punted block at {} (touch {}, {} bytes)",
                        self.id,
                        fpos,
                        touch,
                        block.size()
                    );
                    self.dispose(block);
                }
                None => break,
            }
        }
        removed
    }

    /// Drop every block and reset all statistics. The identifier,
    /// modification time and configuration are retained.
    pub fn clear(&mut self) {
        if self.config.overwrite_on_exit() {
            self.blocks.scrub_all();
        }
        self.blocks.clear();
        self.count_write = 0;
        self.count_read = 0;
        self.bytes_write = 0;
        self.bytes_read = 0;
        self.time_write = None;
        self.time_read = None;
        debug!("svf {}: cleared", self.id);
    }

    /// Scrub a released block's payload when the configuration asks for it.
    fn dispose(&self, mut block: Block) {
        if self.config.overwrite_on_exit() {
            block.scrub();
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Snapshot the identity and block contents for serialization.
    pub fn to_state(&self) -> SvfState {
        SvfState {
            id: self.id.clone(),
            file_mod_time: self.file_mod_time,
            blocks: self
                .blocks
                .iter()
                .map(|(fpos, block)| (fpos, block.data().to_vec()))
                .collect(),
            state_version: STATE_VERSION,
        }
    }

    /// Rebuild a file from a snapshot by replaying every block through
    /// [`SparseVirtualFile::write`]; the write statistics therefore reflect
    /// the replay, not the history of the snapshotted file.
    pub fn from_state(state: SvfState, config: SvfConfig) -> Result<Self> {
        if state.state_version != STATE_VERSION {
            return Err(Error::internal(format!(
                "unsupported state version {}",
                state.state_version
            )));
        }
        let mut svf = Self::with_config(&state.id, state.file_mod_time, config);
        for (fpos, data) in &state.blocks {
            svf.write(*fpos, data)?;
        }
        Ok(svf)
    }
}

impl Drop for SparseVirtualFile {
    fn drop(&mut self) {
        if self.config.overwrite_on_exit() {
            self.blocks.scrub_all();
        }
    }
}

/// Coalesce consecutive instructions whose combined span is within
/// `greedy_len`, then round every short instruction up to `greedy_len`.
fn coalesce_greedy(raw: Vec<SeekRead>, greedy_len: usize) -> Vec<SeekRead> {
    let mut out: Vec<SeekRead> = Vec::with_capacity(raw.len());
    let mut iter = raw.into_iter();
    let (mut start, mut len) = match iter.next() {
        Some(first) => first,
        None => return out,
    };
    for (fpos, flen) in iter {
        let span = (fpos + flen as u64 - start) as usize;
        if span <= greedy_len {
            len = span;
        } else {
            out.push((start, len.max(greedy_len)));
            start = fpos;
            len = flen;
        }
    }
    out.push((start, len.max(greedy_len)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic content for the simulated underlying file: the byte at
    /// an absolute position is a pure function of that position, so
    /// overlapping writes always agree.
    fn pattern(fpos: FilePos, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (((fpos as usize + i) * 7 + 13) % 251) as u8)
            .collect()
    }

    fn load_writes(svf: &mut SparseVirtualFile, writes: &[SeekRead]) {
        for &(fpos, len) in writes {
            svf.write(fpos, &pattern(fpos, len)).unwrap();
        }
    }

    #[test]
    fn test_write_block_layouts() {
        // (name, writes, expected blocks)
        let cases: &[(&str, &[SeekRead], &[SeekRead])] = &[
            ("write no blocks", &[], &[]),
            ("write single block", &[(8, 4)], &[(8, 4)]),
            ("overwrite single block", &[(8, 4), (8, 4)], &[(8, 4)]),
            ("extend single block from start", &[(8, 4), (8, 5)], &[(8, 5)]),
            ("extend single block from inside", &[(8, 4), (9, 4)], &[(8, 5)]),
            ("coalesce abutting block", &[(8, 4), (12, 5)], &[(8, 9)]),
            ("add second block", &[(8, 4), (16, 4)], &[(8, 4), (16, 4)]),
            ("new joins two blocks", &[(8, 4), (16, 4), (10, 8)], &[(8, 12)]),
            (
                "new fills gap between two blocks",
                &[(8, 4), (16, 4), (12, 4)],
                &[(8, 12)],
            ),
            (
                "new overlaps two blocks exactly",
                &[(8, 4), (16, 4), (8, 12)],
                &[(8, 12)],
            ),
            (
                "new overlaps two blocks just short",
                &[(8, 4), (16, 4), (9, 10)],
                &[(8, 12)],
            ),
            (
                "new overlaps two blocks and extends",
                &[(8, 4), (16, 4), (8, 14)],
                &[(8, 14)],
            ),
            ("new prepends to old", &[(8, 4), (4, 4)], &[(4, 8)]),
            ("new prepends into old", &[(8, 4), (7, 3)], &[(7, 5)]),
            ("new covers old start to end", &[(8, 4), (7, 5)], &[(7, 5)]),
            ("new covers old and beyond", &[(8, 4), (7, 6)], &[(7, 6)]),
            (
                "new absorbs first block only (a)",
                &[(8, 4), (16, 4), (7, 7)],
                &[(7, 7), (16, 4)],
            ),
            (
                "new absorbs first block only (b)",
                &[(8, 4), (16, 4), (7, 8)],
                &[(7, 8), (16, 4)],
            ),
            (
                "new reaches second block exactly",
                &[(8, 4), (16, 4), (7, 9)],
                &[(7, 13)],
            ),
            (
                "new reaches into second block",
                &[(8, 4), (16, 4), (7, 10)],
                &[(7, 13)],
            ),
            (
                "new covers both blocks",
                &[(8, 4), (16, 4), (7, 13)],
                &[(7, 13)],
            ),
            (
                "new covers both blocks and extends",
                &[(8, 4), (16, 4), (7, 14)],
                &[(7, 14)],
            ),
        ];

        for (name, writes, expected) in cases {
            let mut svf = SparseVirtualFile::new("t", 0.0);
            load_writes(&mut svf, writes);
            assert_eq!(&svf.blocks(), expected, "{}", name);
            assert_eq!(svf.count_write(), writes.len() as u64, "{}", name);
            let written: u64 = writes.iter().map(|&(_, len)| len as u64).sum();
            assert_eq!(svf.bytes_write(), written, "{}", name);
            let resident: usize = expected.iter().map(|&(_, len)| len).sum();
            assert_eq!(svf.num_bytes(), resident, "{}", name);
            assert_eq!(svf.num_blocks(), expected.len(), "{}", name);
            assert_eq!(svf.count_read(), 0, "{}", name);
            // Every resident block must carry the file's bytes for its range.
            for &(fpos, len) in *expected {
                assert_eq!(svf.read(fpos, len).unwrap(), pattern(fpos, len), "{}", name);
            }
        }
    }

    #[test]
    fn test_need_gap_lists() {
        // (name, writes, query fpos, query len, expected need)
        let cases: &[(&str, &[SeekRead], FilePos, usize, &[SeekRead])] = &[
            ("need on empty file", &[], 8, 4, &[(8, 4)]),
            ("exactly one block", &[(8, 4)], 8, 4, &[]),
            ("inside one block", &[(8, 4)], 9, 2, &[]),
            ("all before one block", &[(8, 4)], 4, 4, &[(4, 4)]),
            ("all after one block", &[(8, 4)], 12, 4, &[(12, 4)]),
            ("before and into one block", &[(8, 4)], 4, 7, &[(4, 4)]),
            ("before and all of one block", &[(8, 4)], 4, 8, &[(4, 4)]),
            (
                "before, all and after one block",
                &[(8, 4)],
                4,
                9,
                &[(4, 4), (12, 1)],
            ),
            (
                "two blocks and in between (a)",
                &[(8, 4), (14, 4)],
                8,
                10,
                &[(12, 2)],
            ),
            (
                "two blocks and in between (b)",
                &[(8, 4), (14, 4)],
                8,
                9,
                &[(12, 2)],
            ),
            (
                "two blocks and in between (c)",
                &[(8, 4), (14, 4)],
                9,
                9,
                &[(12, 2)],
            ),
            (
                "two blocks and in between (d)",
                &[(8, 4), (14, 4)],
                9,
                7,
                &[(12, 2)],
            ),
            (
                "two blocks, under-run",
                &[(8, 4), (14, 4)],
                7,
                11,
                &[(7, 1), (12, 2)],
            ),
            (
                "two blocks, over-run",
                &[(8, 4), (14, 4)],
                8,
                11,
                &[(12, 2), (18, 1)],
            ),
            (
                "two blocks, under and over-run",
                &[(8, 4), (14, 4)],
                7,
                12,
                &[(7, 1), (12, 2), (18, 1)],
            ),
        ];

        for (name, writes, fpos, len, expected) in cases {
            let mut svf = SparseVirtualFile::new("t", 0.0);
            load_writes(&mut svf, writes);
            assert_eq!(&svf.need(*fpos, *len), expected, "{}", name);
            // Presence and fragmentation must agree.
            assert_eq!(svf.has(*fpos, *len), expected.is_empty(), "{}", name);
        }
    }

    #[test]
    fn test_need_is_satisfied_by_fetching() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(8, 4), (16, 4)]);
        for (fpos, len) in svf.need(4, 20) {
            svf.write(fpos, &pattern(fpos, len)).unwrap();
        }
        assert!(svf.has(4, 20));
        assert_eq!(svf.read(4, 20).unwrap(), pattern(4, 20));
    }

    #[test]
    fn test_need_zero_length() {
        let svf = SparseVirtualFile::new("t", 0.0);
        assert!(svf.need(8, 0).is_empty());
        assert!(svf.has(8, 0));
    }

    #[test]
    fn test_need_greedy_rounds_up_past_unknown_eof() {
        let svf = SparseVirtualFile::new("t", 0.0);
        assert_eq!(svf.need_greedy(1000, 24, 256), vec![(1000, 256)]);
    }

    #[test]
    fn test_need_greedy_coalesces_close_gaps() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(8, 4), (16, 4)]);
        // Raw gaps are (4, 4) and (12, 4); their span 4..16 fits in 16.
        assert_eq!(svf.need_greedy(4, 16, 16), vec![(4, 16)]);
        // A small greedy length leaves the gaps apart but rounds them up.
        assert_eq!(svf.need_greedy(4, 16, 6), vec![(4, 6), (12, 6)]);
        // Greedy mode never drops coverage of the requested range.
        assert_eq!(svf.need_greedy(4, 16, 0), vec![(4, 4), (12, 4)]);
    }

    #[test]
    fn test_has_boundaries() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(8, 4)]);
        assert!(svf.has(8, 4));
        assert!(svf.has(9, 3));
        assert!(svf.has(11, 1));
        assert!(!svf.has(7, 4));
        assert!(!svf.has(8, 5));
        assert!(!svf.has(12, 1));
        assert!(!svf.has(0, 1));
    }

    #[test]
    fn test_write_empty_is_a_no_op() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        svf.write(8, &[]).unwrap();
        assert_eq!(svf.num_blocks(), 0);
        assert_eq!(svf.count_write(), 0);
        assert_eq!(svf.bytes_write(), 0);
        assert!(svf.time_write().is_none());
    }

    #[test]
    fn test_write_diff_rejected_and_state_unchanged() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        svf.write(8, b"ABCD").unwrap();
        let err = svf.write(8, b"ABXD").unwrap_err();
        assert_eq!(
            err,
            Error::Diff {
                file_position: 10,
                existing: b'C',
                incoming: b'X',
            }
        );
        assert_eq!(svf.blocks(), vec![(8, 4)]);
        assert_eq!(svf.read(8, 4).unwrap(), b"ABCD".to_vec());
        // The rejected write moved no statistics.
        assert_eq!(svf.count_write(), 1);
        assert_eq!(svf.bytes_write(), 4);
    }

    #[test]
    fn test_write_diff_spanning_merge_is_atomic() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        svf.write(8, b"AB").unwrap();
        svf.write(16, b"CD").unwrap();
        // Overlaps both blocks; the mismatch is in the second one.
        let err = svf.write(9, b"Bxxxxxxx").unwrap_err();
        assert_eq!(
            err,
            Error::Diff {
                file_position: 16,
                existing: b'C',
                incoming: b'x',
            }
        );
        assert_eq!(svf.blocks(), vec![(8, 2), (16, 2)]);
    }

    #[test]
    fn test_write_without_diff_check_keeps_resident_bytes() {
        let config = SvfConfig::new().set_compare_for_diff(false);
        let mut svf = SparseVirtualFile::with_config("t", 0.0, config);
        svf.write(8, b"AB").unwrap();
        svf.write(16, b"CD").unwrap();
        svf.write(10, b"xxxxxx").unwrap();
        assert_eq!(svf.blocks(), vec![(8, 10)]);
        assert_eq!(svf.read(8, 10).unwrap(), b"ABxxxxxxCD".to_vec());
    }

    #[test]
    fn test_overlapping_write_prefers_resident_bytes() {
        let config = SvfConfig::new().set_compare_for_diff(false);
        let mut svf = SparseVirtualFile::with_config("t", 0.0, config);
        svf.write(8, b"ABCD").unwrap();
        svf.write(8, b"WXYZ").unwrap();
        assert_eq!(svf.read(8, 4).unwrap(), b"ABCD".to_vec());
    }

    #[test]
    fn test_read_errors() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        let err = svf.read(8, 4).unwrap_err();
        assert_eq!(
            err,
            Error::Read {
                kind: ReadError::Empty,
                file_position: 8,
                length: 4,
            }
        );

        load_writes(&mut svf, &[(8, 4), (16, 4)]);
        assert_eq!(
            svf.read(4, 2).unwrap_err(),
            Error::Read {
                kind: ReadError::BeforeFirst { first: 8 },
                file_position: 4,
                length: 2,
            }
        );
        assert_eq!(
            svf.read(10, 4).unwrap_err(),
            Error::Read {
                kind: ReadError::Overruns {
                    block_fpos: 8,
                    block_size: 4,
                },
                file_position: 10,
                length: 4,
            }
        );
        assert_eq!(
            svf.read(13, 2).unwrap_err(),
            Error::Read {
                kind: ReadError::Gap {
                    block_fpos: 8,
                    block_size: 4,
                },
                file_position: 13,
                length: 2,
            }
        );
        // Failed reads moved no statistics.
        assert_eq!(svf.count_read(), 0);
        assert_eq!(svf.bytes_read(), 0);
        assert!(svf.time_read().is_none());
    }

    #[test]
    fn test_read_into_caller_buffer() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        svf.write(8, b"ABCD").unwrap();
        let mut buf = [0u8; 2];
        svf.read_into(9, &mut buf).unwrap();
        assert_eq!(&buf, b"BC");
        assert_eq!(svf.count_read(), 1);
        assert_eq!(svf.bytes_read(), 2);
        assert!(svf.time_read().is_some());
    }

    #[test]
    fn test_read_refreshes_touch() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(8, 4), (16, 4)]);
        let before = svf.block_touches();
        assert_eq!(before.values().copied().collect::<Vec<_>>(), vec![8, 16]);

        svf.read(8, 1).unwrap();
        let after = svf.block_touches();
        // The read block now carries the newest touch.
        assert_eq!(after.values().copied().collect::<Vec<_>>(), vec![16, 8]);
        assert_eq!(svf.block_touch(), 3);
    }

    #[test]
    fn test_erase() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(8, 4), (16, 4)]);
        assert_eq!(svf.erase(8).unwrap(), 4);
        assert_eq!(svf.blocks(), vec![(16, 4)]);
        assert_eq!(svf.num_bytes(), 4);
        // Inside a block is not a block start.
        assert_eq!(
            svf.erase(17).unwrap_err(),
            Error::Erase { file_position: 17 }
        );
        assert_eq!(svf.blocks(), vec![(16, 4)]);
    }

    #[test]
    fn test_lru_punt_keeps_recently_read_blocks() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(0, 100), (200, 100), (400, 100)]);
        // Touch the first block so the second becomes the oldest.
        svf.read(0, 1).unwrap();
        let removed = svf.lru_punt(250);
        assert_eq!(removed, 100);
        assert_eq!(svf.blocks(), vec![(0, 100), (400, 100)]);
        assert_eq!(svf.num_bytes(), 200);
        // Idempotent once within budget.
        assert_eq!(svf.lru_punt(250), 0);
    }

    #[test]
    fn test_lru_punt_always_keeps_one_block() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(0, 100), (200, 100)]);
        let removed = svf.lru_punt(0);
        assert_eq!(removed, 100);
        assert_eq!(svf.num_blocks(), 1);
        // A lone over-budget block is preserved.
        assert_eq!(svf.lru_punt(0), 0);
        assert_eq!(svf.num_blocks(), 1);
    }

    #[test]
    fn test_lru_punt_within_budget_returns_zero() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        load_writes(&mut svf, &[(0, 100)]);
        assert_eq!(svf.lru_punt(100), 0);
        assert_eq!(svf.num_blocks(), 1);
    }

    #[test]
    fn test_clear_retains_identity() {
        let config = SvfConfig::new().set_overwrite_on_exit(true);
        let mut svf = SparseVirtualFile::with_config("cache-1", 42.0, config);
        load_writes(&mut svf, &[(8, 4)]);
        svf.read(8, 4).unwrap();
        svf.clear();
        assert_eq!(svf.num_blocks(), 0);
        assert_eq!(svf.num_bytes(), 0);
        assert_eq!(svf.count_write(), 0);
        assert_eq!(svf.count_read(), 0);
        assert_eq!(svf.bytes_write(), 0);
        assert_eq!(svf.bytes_read(), 0);
        assert!(svf.time_write().is_none());
        assert!(svf.time_read().is_none());
        assert_eq!(svf.id(), "cache-1");
        assert!(svf.file_mod_time_matches(42.0));
        assert_eq!(svf.config(), config);
    }

    #[test]
    fn test_last_file_position() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        assert_eq!(svf.last_file_position(), 0);
        load_writes(&mut svf, &[(8, 4), (16, 4)]);
        assert_eq!(svf.last_file_position(), 20);
        svf.erase(16).unwrap();
        assert_eq!(svf.last_file_position(), 12);
    }

    #[test]
    fn test_size_of_tracks_contents() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        let empty = svf.size_of();
        load_writes(&mut svf, &[(8, 512)]);
        assert!(svf.size_of() >= empty + 512);
    }

    #[test]
    fn test_file_mod_time_matches() {
        let svf = SparseVirtualFile::new("t", 1234.5);
        assert!(svf.file_mod_time_matches(1234.5));
        assert!(!svf.file_mod_time_matches(1234.0));
        assert_eq!(svf.file_mod_time(), 1234.5);
    }

    #[test]
    fn test_repeated_identical_write_is_stable() {
        let mut svf = SparseVirtualFile::new("t", 0.0);
        let data = pattern(8, 4);
        svf.write(8, &data).unwrap();
        let blocks_once = svf.blocks();
        let touches_once = svf.block_touches();
        svf.write(8, &data).unwrap();
        assert_eq!(svf.blocks(), blocks_once);
        // The rewrite refreshed the block's touch.
        assert_ne!(svf.block_touches(), touches_once);
        assert_eq!(svf.count_write(), 2);
        assert_eq!(svf.bytes_write(), 8);
    }

    #[test]
    fn test_state_round_trip() {
        let mut svf = SparseVirtualFile::new("remote.bin", 99.0);
        load_writes(&mut svf, &[(8, 4), (16, 4)]);
        let state = svf.to_state();
        assert_eq!(state.state_version, STATE_VERSION);
        assert_eq!(state.blocks.len(), 2);

        let rebuilt = SparseVirtualFile::from_state(state, SvfConfig::default()).unwrap();
        assert_eq!(rebuilt.id(), "remote.bin");
        assert!(rebuilt.file_mod_time_matches(99.0));
        assert_eq!(rebuilt.blocks(), svf.blocks());
    }

    #[test]
    fn test_state_version_is_checked() {
        let state = SvfState {
            id: "x".to_string(),
            file_mod_time: 0.0,
            blocks: Vec::new(),
            state_version: 2,
        };
        assert!(SparseVirtualFile::from_state(state, SvfConfig::default()).is_err());
    }
}
