// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! `BlockFileReader` (C2): reads lines from a list of input files in
//! parallel, in an IO-efficient way. Grounded on the original
//! `InputLines`/`InputLines::Impl` — files are split into fixed-size
//! blocks, read exactly at block boundaries without any prior seeking, and
//! the line fragments straddling a boundary are joined by whichever of the
//! two adjacent block-readers shows up second.
//!
//! The join is a single-assignment rendezvous cell (`LineFragment`): the
//! original uses a raw `compare_and_swap` on a pointer with a mutex
//! fallback for platforms without one. Safe Rust has no portable CAS over
//! an owned `Vec<u8>`, so this is expressed as a `parking_lot::Mutex`
//! guarding an `Option<Vec<u8>>` with the same two-caller contract: the
//! first `try_store` wins and is absolved of the fragment, the second
//! receives it and becomes responsible for joining it into its own line.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunkworker_domain::{WorkerError, WorkerResult};
use parking_lot::Mutex;

/// No line this reader returns may exceed this many bytes, counting the
/// trailing terminator.
pub const MAX_LINE_SIZE: usize = 64 * 1024;

const MIB: usize = 1 << 20;
const GIB: usize = 1 << 30;

/// One side of a line split in two by a block boundary.
struct LineFragment {
    data: Mutex<Option<Vec<u8>>>,
}

impl LineFragment {
    fn new() -> Self {
        Self { data: Mutex::new(None) }
    }

    /// The first caller stores `newval` and gets `None` back - it is
    /// absolved of the fragment. The second caller gets the first caller's
    /// data back and is responsible for joining it into its own line.
    fn try_store(&self, newval: Vec<u8>) -> Option<Vec<u8>> {
        let mut guard = self.data.lock();
        match guard.take() {
            None => {
                *guard = Some(newval);
                None
            }
            Some(old) => Some(old),
        }
    }
}

/// An input file block: a byte range of one file, plus the fragment cells
/// shared with its left and right neighbor blocks (`None` at either end of
/// the file).
struct Block {
    file: Arc<File>,
    offset: u64,
    size: usize,
    head: Option<Arc<LineFragment>>,
    tail: Option<Arc<LineFragment>>,
}

impl Block {
    /// Reads this block into `buf`, which must have room for
    /// `MAX_LINE_SIZE` bytes of padding on both sides of the block's own
    /// `size` bytes (see [`BlockFileReader::minimum_buffer_capacity`]).
    /// Returns the byte range within `buf` holding a whole number of
    /// complete lines.
    fn read_into(&self, buf: &mut [u8], skip_first_line: bool) -> WorkerResult<(usize, usize)> {
        let read_beg = MAX_LINE_SIZE;
        let read_end = read_beg + self.size;
        self.file
            .read_exact_at(&mut buf[read_beg..read_end], self.offset)
            .map_err(|e| WorkerError::IoFailed(e.to_string()))?;

        let mut beg = read_beg;
        if self.head.is_some() || skip_first_line {
            while beg < read_end && buf[beg] != b'\n' && buf[beg] != b'\r' {
                beg += 1;
            }
            if beg == read_end {
                // The first line spans the entire block; only tolerable
                // for the last block in a file.
                if self.tail.is_some() {
                    return Err(WorkerError::LineTooLong { max_line_size: MAX_LINE_SIZE });
                }
            } else {
                beg += 1;
            }
            if beg < read_end && buf[beg - 1] == b'\r' && buf[beg] == b'\n' {
                beg += 1;
            }
            if beg - read_beg > MAX_LINE_SIZE {
                return Err(WorkerError::LineTooLong { max_line_size: MAX_LINE_SIZE });
            }
            if let Some(head) = &self.head {
                let right = buf[read_beg..beg].to_vec();
                if let Some(left) = head.try_store(right) {
                    beg = read_beg - left.len();
                    buf[beg..read_beg].copy_from_slice(&left);
                }
            }
        }

        let mut end = read_end;
        if let Some(tail) = &self.tail {
            while end > beg && buf[end - 1] != b'\n' && buf[end - 1] != b'\r' {
                end -= 1;
            }
            if end == beg || read_end - end > MAX_LINE_SIZE {
                return Err(WorkerError::LineTooLong { max_line_size: MAX_LINE_SIZE });
            }
            let left = buf[end..read_end].to_vec();
            if let Some(right) = tail.try_store(left) {
                buf[read_end..read_end + right.len()].copy_from_slice(&right);
                end = read_end + right.len();
            }
        }

        Ok((beg, end))
    }
}

/// Splits a file into a series of blocks, each `block_size` bytes except
/// possibly the last, wiring up shared fragment cells between neighbors.
fn split(path: &Path, block_size: usize) -> WorkerResult<Vec<Block>> {
    let file = File::open(path).map_err(|e| WorkerError::IoFailed(e.to_string()))?;
    let file_size = file.metadata().map_err(|e| WorkerError::IoFailed(e.to_string()))?.len();
    let file = Arc::new(file);
    let block_size = block_size as u64;

    let mut num_blocks = file_size / block_size;
    if file_size % block_size != 0 {
        num_blocks += 1;
    }

    let mut blocks = Vec::with_capacity(num_blocks as usize);
    let mut offset = 0u64;
    let mut prev_tail: Option<Arc<LineFragment>> = None;
    for i in 0..num_blocks {
        let size = (file_size - offset).min(block_size) as usize;
        let head = prev_tail.clone();
        let tail = if i + 1 < num_blocks { Some(Arc::new(LineFragment::new())) } else { None };
        blocks.push(Block { file: file.clone(), offset, size, head, tail: tail.clone() });
        prev_tail = tail;
        offset += block_size;
    }
    Ok(blocks)
}

struct State {
    block_count: usize,
    queue: Vec<Block>,
    paths: Vec<PathBuf>,
}

/// Reads lines from a list of input text files, across as many concurrent
/// callers of [`read`](BlockFileReader::read) as there are open blocks.
/// Cheap to share: wrap in an `Arc` and call `read` from any number of
/// worker threads.
pub struct BlockFileReader {
    block_size: usize,
    skip_first_line: bool,
    state: Mutex<State>,
}

impl BlockFileReader {
    /// `block_size` is clamped to `[1 MiB, 1 GiB]`. The caller is
    /// responsible for ensuring `paths` contains no empty or duplicate
    /// entries.
    pub fn new(paths: Vec<PathBuf>, block_size: usize, skip_first_line: bool) -> Self {
        Self::with_raw_block_size(paths, block_size.clamp(MIB, GIB), skip_first_line)
    }

    fn with_raw_block_size(paths: Vec<PathBuf>, block_size: usize, skip_first_line: bool) -> Self {
        Self { block_size, skip_first_line, state: Mutex::new(State { block_count: paths.len(), queue: Vec::new(), paths }) }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The minimum capacity a buffer passed to `read` must have.
    pub fn minimum_buffer_capacity(&self) -> usize {
        self.block_size + 2 * MAX_LINE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().block_count == 0
    }

    /// Reads consecutive lines of text into `buf` and returns the byte
    /// range `[beg, end)` within it holding valid data, or `None` once all
    /// input has been consumed. `buf` must be at least
    /// `minimum_buffer_capacity()` bytes.
    pub fn read(&self, buf: &mut [u8]) -> WorkerResult<Option<(usize, usize)>> {
        loop {
            let mut state = self.state.lock();
            if state.block_count == 0 {
                return Ok(None);
            }
            if let Some(block) = state.queue.pop() {
                state.block_count -= 1;
                drop(state);
                return block.read_into(buf, self.skip_first_line).map(Some);
            }
            if let Some(path) = state.paths.pop() {
                drop(state);
                let blocks = split(&path, self.block_size)?;
                let mut state = self.state.lock();
                state.block_count -= 1;
                if blocks.is_empty() {
                    // Empty input file; nothing more to account for.
                    continue;
                }
                let mut iter = blocks.into_iter();
                let first = iter.next().expect("non-empty checked above");
                let rest: Vec<Block> = iter.collect();
                state.block_count += rest.len();
                // Reversed so popping from the back yields ascending offsets.
                state.queue.extend(rest.into_iter().rev());
                drop(state);
                return first.read_into(buf, self.skip_first_line).map(Some);
            }
            // Queue and paths are both empty but the count is non-zero:
            // some other thread is mid-split. Yield and retry.
            drop(state);
            std::thread::yield_now();
        }
    }
}
