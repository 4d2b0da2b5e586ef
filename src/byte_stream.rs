//! File-like byte view over a block cache.
//!
//! A stream owns its cache and layers three things on top of it: a
//! logical byte length (which may end mid-block), a current position,
//! and open-mode flag enforcement. All byte-offset to (block,
//! intra-block offset) arithmetic lives here; the cache below only ever
//! sees whole blocks.

use std::cmp::min;
use std::io::SeekFrom;

use crate::block_cache::BlockCache;
use crate::errors::{Error, ErrorKind, Result};
use crate::open_flags::OpenFlags;

/// Sequential/random-access byte stream over a [`BlockCache`].
///
/// The logical size is at most the cache's byte size and may be
/// strictly smaller when the last block is partially used. The position
/// may point past the end; reads there yield nothing and writes grow
/// the stream first.
#[derive(Debug)]
pub struct ByteStream {
    cache: BlockCache,
    size: u64,
    position: u64,
    flags: OpenFlags,
}

impl ByteStream {
    /// Builds a stream of `size` logical bytes over `cache`, positioned
    /// at zero. With [`OpenFlags::TRUNCATE`] the stream is immediately
    /// truncated to zero length.
    pub fn new(cache: BlockCache, size: u64, flags: OpenFlags) -> Result<Self> {
        if size > cache.size() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "logical size {size} exceeds cache capacity {}",
                    cache.size()
                ),
            ));
        }
        let mut stream = Self {
            cache,
            size,
            position: 0,
            flags,
        };
        if flags.contains(OpenFlags::TRUNCATE) {
            stream.resize_to(0)?;
        }
        Ok(stream)
    }

    /// Logical length in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Whether the stream holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current position. May exceed [`len`](Self::len).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The open-mode flags this stream enforces.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn require_readable(&self) -> Result<()> {
        if !self.flags.readable() {
            return Err(Error::new(
                ErrorKind::NotPermitted,
                "stream not open for reading",
            ));
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        if !self.flags.writable() {
            return Err(Error::new(
                ErrorKind::NotPermitted,
                "stream not open for writing",
            ));
        }
        Ok(())
    }

    /// Reads from the current position, advancing it. Returns the
    /// number of bytes read; `Ok(0)` means end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Reads at most `buf.len()` bytes starting at byte `off`, without
    /// touching the position. Short counts happen only at end of
    /// stream; at or past the end the result is `Ok(0)`.
    pub fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize> {
        self.require_readable()?;
        if off >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let n = min(buf.len() as u64, self.size - off) as usize;
        let bytes_per_block = self.cache.bytes_per_block() as u64;
        let first = off / bytes_per_block;
        let last = (off + n as u64 - 1) / bytes_per_block;
        let view = self.cache.slice(first, last - first + 1)?;
        let skip = (off - first * bytes_per_block) as usize;
        buf[..n].copy_from_slice(&view[skip..skip + n]);
        Ok(n)
    }

    /// Writes at the current position (or at the end first, in append
    /// mode), growing the stream as needed, and advances the position
    /// past the written bytes.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.require_writable()?;
        if self.flags.contains(OpenFlags::APPEND) {
            self.position = self.size;
        }
        let n = self.write_at_pos(buf, self.position)?;
        self.position += n as u64;
        if self.flags.contains(OpenFlags::SYNCHRONOUS) {
            self.sync()?;
        }
        Ok(n)
    }

    /// Writes `buf` at byte `off` without moving the position. Refused
    /// on append streams, where every write must land at the end.
    pub fn write_at(&mut self, buf: &[u8], off: u64) -> Result<usize> {
        self.require_writable()?;
        if self.flags.contains(OpenFlags::APPEND) {
            return Err(Error::new(
                ErrorKind::NotPermitted,
                "positioned writes not permitted on append streams",
            ));
        }
        let n = self.write_at_pos(buf, off)?;
        if self.flags.contains(OpenFlags::SYNCHRONOUS) {
            self.sync()?;
        }
        Ok(n)
    }

    fn write_at_pos(&mut self, buf: &[u8], off: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let end = off + buf.len() as u64;
        if end > self.size {
            self.resize_to(end)?;
        }
        let bytes_per_block = self.cache.bytes_per_block() as u64;
        let first = off / bytes_per_block;
        let last = (end - 1) / bytes_per_block;
        let mut view = self.cache.slice_mut(first, last - first + 1)?;
        let skip = (off - first * bytes_per_block) as usize;
        view[skip..skip + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    /// Moves the position. Seeking past the end is allowed; a negative
    /// absolute target is `InvalidArgument`.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target: i128 = match pos {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => self.size as i128 + delta as i128,
        };
        if target < 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("seek to negative position {target}"),
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }

    /// Changes the logical length to `new_size`, resizing the cache to
    /// the minimum block count that holds it. The position is not
    /// moved, even if it now points past the end.
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.require_writable()?;
        self.resize_to(new_size)?;
        if self.flags.contains(OpenFlags::SYNCHRONOUS) {
            self.sync()?;
        }
        Ok(())
    }

    fn resize_to(&mut self, new_size: u64) -> Result<()> {
        let blocks = self.cache.min_blocks_for_size(new_size);
        self.cache.resize(blocks)?;
        self.size = new_size;
        Ok(())
    }

    /// Writes every dirty cached block back to storage.
    pub fn sync(&mut self) -> Result<()> {
        self.cache.flush()
    }

    /// Flushes outstanding writes. Equivalent to [`sync`](Self::sync);
    /// the stream remains usable, final teardown is its owner's call.
    pub fn close(&mut self) -> Result<()> {
        self.sync()
    }
}
