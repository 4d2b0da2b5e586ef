//! The open-file wrapper handed to callers.

use std::io;

use log::warn;

use crate::byte_stream::ByteStream;
use crate::errors::Result;
use crate::object::HandleRef;
use crate::stat::FileStat;

/// An open file: a byte stream plus the handle and absolute path it was
/// opened under.
///
/// Closing (or dropping) the file flushes the stream's dirty blocks.
/// The handle itself stays valid afterwards: the format implementer
/// owns the object, the file only borrowed it.
#[derive(Debug)]
pub struct File {
    stream: ByteStream,
    handle: HandleRef,
    path: String,
}

impl File {
    pub(crate) fn new(stream: ByteStream, handle: HandleRef, path: String) -> Self {
        Self {
            stream,
            handle,
            path,
        }
    }

    pub(crate) fn handle(&self) -> &HandleRef {
        &self.handle
    }

    /// Absolute path this file was opened under.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The object's name within its directory.
    pub fn name(&self) -> String {
        self.handle.borrow().name()
    }

    /// Fresh metadata from the underlying object.
    pub fn stat(&self) -> FileStat {
        self.handle.borrow().stat()
    }

    /// Current logical length in bytes.
    pub fn len(&self) -> u64 {
        self.stream.len()
    }

    /// Whether the file holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// Reads at `off` without moving the position.
    pub fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize> {
        self.stream.read_at(buf, off)
    }

    /// Writes at `off` without moving the position.
    pub fn write_at(&mut self, buf: &[u8], off: u64) -> Result<usize> {
        self.stream.write_at(buf, off)
    }

    /// Changes the logical length. The position is not moved.
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.stream.truncate(new_size)
    }

    /// Flushes dirty blocks back to the format implementer.
    pub fn sync(&mut self) -> Result<()> {
        self.stream.sync()
    }

    /// Flushes and consumes the file. Dropping without calling this
    /// also flushes, but has nowhere to report a failure.
    pub fn close(mut self) -> Result<()> {
        self.stream.close()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Err(err) = self.stream.sync() {
            warn!("flush of {} failed on drop: {err}", self.path);
        }
    }
}

impl io::Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).map_err(Into::into)
    }
}

impl io::Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.sync().map_err(Into::into)
    }
}

impl io::Seek for File {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos).map_err(Into::into)
    }
}
