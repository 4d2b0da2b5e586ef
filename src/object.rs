//! The object-handle contract between the core and a format implementer.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::SystemTime;

use crate::block_cache::{BlockBacking, LogicalBlock};
use crate::errors::Result;
use crate::stat::{FileMode, FileStat};

/// One object (regular file, directory or symbolic link) inside a
/// mounted format.
///
/// Implemented by format back-ends; the core never sees past this
/// trait. Block indices are logical: they address the object's own
/// block space, not volume sectors. Discriminating between files,
/// directories and links is always done through [`stat`](Self::stat)
/// mode bits, never through downcasting.
pub trait ObjectHandle: fmt::Debug {
    /// Metadata for this object.
    fn stat(&self) -> FileStat;

    /// The object's name within its directory.
    fn name(&self) -> String;

    /// Reads whole blocks starting at `start` into `buf`. `buf` must be
    /// a multiple of the block size, and the range must be allocated.
    fn read_blocks(&mut self, start: LogicalBlock, buf: &mut [u8]) -> Result<()>;

    /// Writes whole blocks starting at `start` from `data`.
    fn write_blocks(&mut self, start: LogicalBlock, data: &[u8]) -> Result<()>;

    /// Zero-fills `count` blocks starting at `start`. The default body
    /// writes zero buffers block by block; formats with cheaper ways to
    /// deallocate (sparse chains, cluster freeing) override it.
    fn zero_out_blocks(&mut self, start: LogicalBlock, count: u64) -> Result<()> {
        let zeroes = vec![0u8; self.stat().blksize as usize];
        for block in start..start + count {
            self.write_blocks(block, &zeroes)?;
        }
        Ok(())
    }

    /// Grows or shrinks the object's storage to `new_size` bytes.
    fn resize(&mut self, new_size: u64) -> Result<()>;

    /// Removes this object's directory entry and releases its storage.
    fn unlink(&mut self) -> Result<()>;

    /// Replaces the permission bits.
    fn chmod(&mut self, mode: FileMode) -> Result<()>;

    /// Replaces the owner and group.
    fn chown(&mut self, uid: u32, gid: u32) -> Result<()>;

    /// Replaces the access and modification times. `None` leaves a
    /// timestamp untouched.
    fn chtimes(&mut self, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<()>;

    /// Names of this directory's entries, including any synthetic `.`
    /// and `..` the format stores. Fails on non-directories.
    fn list_dir(&self) -> Result<Vec<String>>;

    /// Whether `other` refers to the same underlying object. The
    /// default compares stat inode numbers.
    fn same_as(&self, other: &dyn ObjectHandle) -> bool {
        self.stat().ino == other.stat().ino
    }
}

/// Shared reference to an object handle.
///
/// The core is single-threaded by contract, so handles are shared with
/// plain `Rc`/`RefCell` rather than atomics: the format implementer
/// owns the objects, the driver and any open [`File`](crate::File)s
/// borrow them through clones of this.
pub type HandleRef = Rc<RefCell<dyn ObjectHandle>>;

/// A handle plus the absolute path it was looked up under.
///
/// The path is a driver-side annotation made at lookup time; it never
/// reaches the format implementer or storage. Keeping it out here means
/// format back-ends never have to model paths at all.
#[derive(Clone, Debug)]
pub(crate) struct AnnotatedHandle {
    pub(crate) handle: HandleRef,
    pub(crate) path: String,
}

impl AnnotatedHandle {
    pub(crate) fn new(handle: HandleRef, path: impl Into<String>) -> Self {
        Self {
            handle,
            path: path.into(),
        }
    }

    pub(crate) fn stat(&self) -> FileStat {
        self.handle.borrow().stat()
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.stat().mode.is_dir()
    }

    pub(crate) fn is_symlink(&self) -> bool {
        self.stat().mode.is_symlink()
    }
}

/// Adapts an [`ObjectHandle`]'s block I/O to the cache's backing
/// contract. This is what a [`File`](crate::File)'s cache talks to.
#[derive(Debug)]
pub struct HandleBacking {
    handle: HandleRef,
    bytes_per_block: u64,
}

impl HandleBacking {
    /// Wraps `handle`, transferring blocks of `bytes_per_block` bytes.
    pub fn new(handle: HandleRef, bytes_per_block: u64) -> Self {
        Self {
            handle,
            bytes_per_block,
        }
    }
}

impl BlockBacking for HandleBacking {
    fn fetch_block(&mut self, block: LogicalBlock, buf: &mut [u8]) -> Result<()> {
        self.handle.borrow_mut().read_blocks(block, buf)
    }

    fn flush_block(&mut self, block: LogicalBlock, data: &[u8]) -> Result<()> {
        self.handle.borrow_mut().write_blocks(block, data)
    }

    fn resize(&mut self, new_total_blocks: u64) -> Result<()> {
        // Block I/O can only express block-granular sizes; byte-precise
        // lengths are recorded separately by whoever knows them.
        self.handle
            .borrow_mut()
            .resize(new_total_blocks * self.bytes_per_block)
    }
}
