//! Lazy, write-back cache over a single object's logical blocks.
//!
//! The cache mirrors an object's blocks in one contiguous buffer and
//! tracks two bits per block: *loaded* (the buffer reflects storage) and
//! *dirty* (the buffer must be written back). All storage traffic goes
//! through a [`BlockBacking`], so the same cache serves format object
//! handles, plain byte streams and disk-image files alike.

use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use log::trace;

use crate::bitmap::BlockBitmap;
use crate::errors::{Error, ErrorKind, Result};

/// Index of a block within one object's address space, starting at
/// zero. This is not a volume sector number: every object has its own
/// private block space.
pub type LogicalBlock = u64;

/// Storage callbacks a [`BlockCache`] drives.
///
/// `fetch_block` and `flush_block` transfer exactly one block; `buf` and
/// `data` are always exactly one block long. `resize` changes the number
/// of blocks backing the object; the default body refuses with
/// `NotSupported`, which is the correct behavior for fixed-size and
/// read-only backings.
pub trait BlockBacking: fmt::Debug {
    /// Reads block `block` from storage into `buf`.
    fn fetch_block(&mut self, block: LogicalBlock, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` back to block `block` on storage.
    fn flush_block(&mut self, block: LogicalBlock, data: &[u8]) -> Result<()>;

    /// Resizes the backing object to `new_total_blocks` blocks.
    fn resize(&mut self, new_total_blocks: u64) -> Result<()> {
        let _ = new_total_blocks;
        Err(Error::new(
            ErrorKind::NotSupported,
            "backing cannot be resized",
        ))
    }
}

/// Write-back block cache for one object.
#[derive(Debug)]
pub struct BlockCache {
    backing: Box<dyn BlockBacking>,
    bytes_per_block: usize,
    total_blocks: u64,
    data: Vec<u8>,
    loaded: BlockBitmap,
    dirty: BlockBitmap,
}

impl BlockCache {
    /// Creates a cache of `total_blocks` blocks of `bytes_per_block`
    /// bytes each, with nothing loaded and nothing dirty.
    ///
    /// # Panics
    /// Panics if `bytes_per_block` is zero.
    pub fn new(backing: Box<dyn BlockBacking>, bytes_per_block: usize, total_blocks: u64) -> Self {
        assert!(bytes_per_block > 0, "block size must be nonzero");
        Self {
            backing,
            bytes_per_block,
            total_blocks,
            data: vec![0; bytes_per_block * total_blocks as usize],
            loaded: BlockBitmap::new(total_blocks),
            dirty: BlockBitmap::new(total_blocks),
        }
    }

    /// Creates a cache over any seekable byte stream. Blocks map to
    /// consecutive `bytes_per_block` spans of the stream. The stream
    /// cannot be resized through the cache.
    pub fn from_stream<S>(stream: S, bytes_per_block: usize, total_blocks: u64) -> Self
    where
        S: Read + Write + Seek + fmt::Debug + 'static,
    {
        Self::new(
            Box::new(StreamBacking::new(stream, bytes_per_block as u64)),
            bytes_per_block,
            total_blocks,
        )
    }

    /// Creates a cache over an open disk-image file. Unlike
    /// [`from_stream`](Self::from_stream), the backing supports
    /// resizing via the file's length.
    pub fn from_file(file: fs::File, bytes_per_block: usize, total_blocks: u64) -> Self {
        Self::new(
            Box::new(FileBacking::new(file, bytes_per_block as u64)),
            bytes_per_block,
            total_blocks,
        )
    }

    /// Size of one block in bytes.
    pub fn bytes_per_block(&self) -> usize {
        self.bytes_per_block
    }

    /// Number of blocks currently in the cache.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Total cache size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes_per_block as u64 * self.total_blocks
    }

    /// Minimum number of blocks needed to hold `size` bytes; zero bytes
    /// need zero blocks.
    pub fn min_blocks_for_size(&self, size: u64) -> u64 {
        size.div_ceil(self.bytes_per_block as u64)
    }

    /// Verifies that `byte_count` bytes starting at block `start` fall
    /// inside the cache.
    pub fn check_bounds(&self, start: LogicalBlock, byte_count: usize) -> Result<()> {
        let span = self.min_blocks_for_size(byte_count as u64);
        if start >= self.total_blocks || start + span > self.total_blocks {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!(
                    "blocks [{start}, {}) outside cache of {} blocks",
                    start + span,
                    self.total_blocks
                ),
            ));
        }
        Ok(())
    }

    /// Whether block `block`'s cached content reflects storage.
    pub fn block_is_loaded(&self, block: LogicalBlock) -> bool {
        self.loaded.get(block)
    }

    /// Whether block `block` must be written back.
    pub fn block_is_dirty(&self, block: LogicalBlock) -> bool {
        self.dirty.get(block)
    }

    fn block_byte_range(&self, start: LogicalBlock, count: u64) -> std::ops::Range<usize> {
        let from = start as usize * self.bytes_per_block;
        from..from + count as usize * self.bytes_per_block
    }

    fn check_block_range(&self, start: LogicalBlock, count: u64) -> Result<()> {
        if start + count > self.total_blocks {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!(
                    "blocks [{start}, {}) outside cache of {} blocks",
                    start + count,
                    self.total_blocks
                ),
            ));
        }
        Ok(())
    }

    /// Fetches every unloaded block in `[start, start + count)`. A fetch
    /// failure propagates unchanged and leaves that block's bits clear.
    fn load_range(&mut self, start: LogicalBlock, count: u64) -> Result<()> {
        for block in start..start + count {
            if self.loaded.get(block) {
                continue;
            }
            let range = self.block_byte_range(block, 1);
            self.backing.fetch_block(block, &mut self.data[range])?;
            self.loaded.set(block);
        }
        Ok(())
    }

    /// A read-only view of `count` blocks starting at `start`, loading
    /// any that aren't cached yet.
    pub fn slice(&mut self, start: LogicalBlock, count: u64) -> Result<&[u8]> {
        self.check_block_range(start, count)?;
        self.load_range(start, count)?;
        let range = self.block_byte_range(start, count);
        Ok(&self.data[range])
    }

    /// A mutable view of `count` blocks starting at `start`, loading any
    /// that aren't cached yet. The returned guard marks the whole range
    /// dirty when dropped, so mutations cannot be lost by a forgotten
    /// bookkeeping call.
    pub fn slice_mut(&mut self, start: LogicalBlock, count: u64) -> Result<BlockSliceMut<'_>> {
        self.check_block_range(start, count)?;
        self.load_range(start, count)?;
        let range = self.block_byte_range(start, count);
        Ok(BlockSliceMut {
            data: &mut self.data[range],
            loaded: &mut self.loaded,
            dirty: &mut self.dirty,
            start,
            count,
        })
    }

    /// Copies cached bytes into `buf`, beginning at block `start`.
    /// Returns the number of bytes copied, always `buf.len()`.
    pub fn read_at(&mut self, buf: &mut [u8], start: LogicalBlock) -> Result<usize> {
        self.check_bounds(start, buf.len())?;
        let span = self.min_blocks_for_size(buf.len() as u64);
        self.load_range(start, span)?;
        let from = start as usize * self.bytes_per_block;
        buf.copy_from_slice(&self.data[from..from + buf.len()]);
        Ok(buf.len())
    }

    /// Copies `data` into the cache, beginning at block `start`, and
    /// marks every touched block loaded and dirty. Returns the number
    /// of bytes copied, always `data.len()`.
    ///
    /// The range is loaded before the copy, the same as
    /// [`slice_mut`](Self::slice_mut): a write that ends mid-block must
    /// not clobber the rest of that block with stale buffer content.
    pub fn write_at(&mut self, data: &[u8], start: LogicalBlock) -> Result<usize> {
        self.check_bounds(start, data.len())?;
        let span = self.min_blocks_for_size(data.len() as u64);
        self.load_range(start, span)?;
        let from = start as usize * self.bytes_per_block;
        self.data[from..from + data.len()].copy_from_slice(data);
        self.dirty.set_range(start, span);
        Ok(data.len())
    }

    /// Marks every block in `[start, start + count)` loaded and dirty,
    /// for callers that mutated a shared view directly.
    pub fn mark_block_range_dirty(&mut self, start: LogicalBlock, count: u64) -> Result<()> {
        self.check_block_range(start, count)?;
        self.loaded.set_range(start, count);
        self.dirty.set_range(start, count);
        Ok(())
    }

    /// Writes every dirty block back to storage in ascending order.
    /// Unloaded blocks are never dirty, so they are never written. A
    /// block's dirty bit is cleared only once its write-back succeeds;
    /// on failure the remaining dirty bits are left set so a later
    /// flush can still complete.
    pub fn flush(&mut self) -> Result<()> {
        let mut flushed = 0u64;
        for block in 0..self.total_blocks {
            if !self.dirty.get(block) {
                continue;
            }
            let range = self.block_byte_range(block, 1);
            self.backing.flush_block(block, &self.data[range])?;
            self.dirty.clear(block);
            flushed += 1;
        }
        if flushed > 0 {
            trace!("flushed {flushed} dirty blocks");
        }
        Ok(())
    }

    /// Ensures every block is loaded.
    pub fn load_all(&mut self) -> Result<()> {
        self.load_range(0, self.total_blocks)
    }

    /// Resizes the cache (and, through the backing, the object) to
    /// `new_total_blocks` blocks.
    ///
    /// Grown blocks come in zero-filled and both loaded and dirty, so a
    /// following [`flush`](Self::flush) writes deterministic zeroes to
    /// storage rather than leaving the tail uninitialized. Shrinking
    /// just truncates the buffer and bitmaps; nothing is flushed.
    pub fn resize(&mut self, new_total_blocks: u64) -> Result<()> {
        self.backing.resize(new_total_blocks)?;
        let old_total = self.total_blocks;
        self.data
            .resize(self.bytes_per_block * new_total_blocks as usize, 0);
        self.loaded.resize(new_total_blocks);
        self.dirty.resize(new_total_blocks);
        debug_assert_eq!(self.loaded.len(), new_total_blocks);
        if new_total_blocks > old_total {
            self.loaded.set_range(old_total, new_total_blocks - old_total);
            self.dirty.set_range(old_total, new_total_blocks - old_total);
        }
        self.total_blocks = new_total_blocks;
        Ok(())
    }
}

/// Mutable view into a cache's buffer, handed out by
/// [`BlockCache::slice_mut`]. Dereferences to the byte span and marks
/// the covered blocks loaded and dirty when dropped.
#[derive(Debug)]
pub struct BlockSliceMut<'a> {
    data: &'a mut [u8],
    loaded: &'a mut BlockBitmap,
    dirty: &'a mut BlockBitmap,
    start: LogicalBlock,
    count: u64,
}

impl std::ops::Deref for BlockSliceMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl std::ops::DerefMut for BlockSliceMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

impl Drop for BlockSliceMut<'_> {
    fn drop(&mut self) {
        self.loaded.set_range(self.start, self.count);
        self.dirty.set_range(self.start, self.count);
    }
}

/// [`BlockBacking`] over any seekable byte stream. Fixed-size: the
/// default `resize` refusal applies.
#[derive(Debug)]
pub struct StreamBacking<S> {
    stream: S,
    bytes_per_block: u64,
}

impl<S: Read + Write + Seek> StreamBacking<S> {
    /// Wraps `stream`, mapping block `i` to the byte span starting at
    /// `i * bytes_per_block`.
    pub fn new(stream: S, bytes_per_block: u64) -> Self {
        Self {
            stream,
            bytes_per_block,
        }
    }
}

impl<S: Read + Write + Seek + fmt::Debug> BlockBacking for StreamBacking<S> {
    fn fetch_block(&mut self, block: LogicalBlock, buf: &mut [u8]) -> Result<()> {
        self.stream
            .seek(SeekFrom::Start(block * self.bytes_per_block))?;
        self.stream.read_exact(buf)?;
        Ok(())
    }

    fn flush_block(&mut self, block: LogicalBlock, data: &[u8]) -> Result<()> {
        self.stream
            .seek(SeekFrom::Start(block * self.bytes_per_block))?;
        self.stream.write_all(data)?;
        Ok(())
    }
}

/// [`BlockBacking`] over an open disk-image file. Resizable through
/// the file's length.
#[derive(Debug)]
pub struct FileBacking {
    file: fs::File,
    bytes_per_block: u64,
}

impl FileBacking {
    /// Wraps `file`, mapping block `i` to the byte span starting at
    /// `i * bytes_per_block`.
    pub fn new(file: fs::File, bytes_per_block: u64) -> Self {
        Self {
            file,
            bytes_per_block,
        }
    }
}

impl BlockBacking for FileBacking {
    fn fetch_block(&mut self, block: LogicalBlock, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(block * self.bytes_per_block))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn flush_block(&mut self, block: LogicalBlock, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(block * self.bytes_per_block))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn resize(&mut self, new_total_blocks: u64) -> Result<()> {
        self.file.set_len(new_total_blocks * self.bytes_per_block)?;
        Ok(())
    }
}
