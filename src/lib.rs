//! Read and write historical disk-image file systems through a uniform
//! path-based API.
//!
//! This crate is the storage core shared by every format back-end:
//! a lazy write-back [`BlockCache`] over an object's logical blocks, a
//! file-like [`ByteStream`] layered on top of it, and a [`Driver`] that
//! normalizes paths, walks them through a pluggable
//! [`FormatImplementer`], resolves symbolic links with cycle detection,
//! and hands out [`File`]s. Format back-ends (FAT12/16, Unix v1, ...)
//! implement [`FormatImplementer`] and [`ObjectHandle`] and get the
//! whole file API for free.
//!
//! The core is single-threaded by design: handles are shared with
//! `Rc`/`RefCell`, nothing locks, and a driver must be used from one
//! thread of control at a time.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::block_cache::BlockBacking;
pub use crate::block_cache::BlockCache;
pub use crate::block_cache::BlockSliceMut;
pub use crate::block_cache::FileBacking;
pub use crate::block_cache::LogicalBlock;
pub use crate::block_cache::StreamBacking;
pub use crate::byte_stream::ByteStream;
pub use crate::driver::Driver;
pub use crate::errors::Error;
pub use crate::errors::ErrorKind;
pub use crate::errors::Result;
pub use crate::file::File;
pub use crate::format::FormatImplementer;
pub use crate::format::FsFeatures;
pub use crate::mount_flags::MountFlags;
pub use crate::object::HandleBacking;
pub use crate::object::HandleRef;
pub use crate::object::ObjectHandle;
pub use crate::open_flags::OpenFlags;
pub use crate::stat::DirEntry;
pub use crate::stat::FileMode;
pub use crate::stat::FileStat;

mod bitmap;
mod block_cache;
mod byte_stream;
mod driver;
mod errors;
mod file;
mod format;
mod mount_flags;
mod object;
mod open_flags;
mod path;
mod stat;
