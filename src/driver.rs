//! The driver facade: path resolution, symbolic links, and the public
//! file-system surface.
//!
//! A driver owns one format implementer and routes every operation
//! through it. Paths are normalized lexically, walked from the root one
//! component at a time with symlinks followed for intermediate
//! components, and each handle the walk produces is annotated with the
//! absolute path it was found under. The format back-end never deals
//! in paths at all.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::SystemTime;

use log::debug;

use crate::block_cache::BlockCache;
use crate::byte_stream::ByteStream;
use crate::errors::{Error, ErrorKind, Result};
use crate::file::File;
use crate::format::{FormatImplementer, FsFeatures};
use crate::mount_flags::MountFlags;
use crate::object::{AnnotatedHandle, HandleBacking, HandleRef};
use crate::open_flags::OpenFlags;
use crate::path;
use crate::stat::{DirEntry, FileMode, FileStat};

/// Block size assumed when neither the object nor the format advertises
/// one. Matches the sector size of most of the media this crate reads.
const FALLBACK_BLOCK_SIZE: u32 = 512;

/// Path-based facade over a mounted disk format.
///
/// All methods take `&self` except
/// [`set_current_dir`](Self::set_current_dir); the driver and everything
/// reachable from it are single-threaded by contract.
#[derive(Debug)]
pub struct Driver {
    format: Box<dyn FormatImplementer>,
    flags: MountFlags,
    cwd: String,
}

/// Outcome of following a symlink chain: either a real object, or the
/// normalized path of an absent final target along with the lookup
/// failure that discovered it.
enum LinkTarget {
    Object(AnnotatedHandle),
    Missing(String, Error),
}

impl Driver {
    /// Mounts `format` with the given capabilities. The working
    /// directory starts at the root.
    pub fn new<F: FormatImplementer + 'static>(format: F, flags: MountFlags) -> Self {
        Self {
            format: Box::new(format),
            flags,
            cwd: "/".to_string(),
        }
    }

    /// The mounted format's capability advertisement.
    pub fn features(&self) -> FsFeatures {
        self.format.features()
    }

    /// Converts `path` to absolute forward-slash form, resolving `.`
    /// and `..` lexically against the current working directory.
    pub fn normalize_path(&self, path: &str) -> String {
        path::normalize(path, &self.cwd)
    }

    /// The current working directory, always absolute.
    pub fn current_dir(&self) -> &str {
        &self.cwd
    }

    fn require_writable(&self) -> Result<()> {
        if !self.flags.can_write() {
            return Err(Error::from_kind(ErrorKind::ReadOnlyFilesystem));
        }
        Ok(())
    }

    fn root(&self) -> AnnotatedHandle {
        AnnotatedHandle::new(self.format.get_root_directory(), "/")
    }

    /// Resolves a normalized absolute path to a handle, following
    /// symlinks for intermediate components but not for the final one.
    fn lookup(&self, abspath: &str) -> Result<AnnotatedHandle> {
        if abspath == "/" {
            return Ok(self.root());
        }
        let (dir, base) = path::split(abspath);
        let parent = self.resolve_symlinks(self.lookup(dir)?)?;
        if !parent.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory).with_path(dir));
        }
        let handle = self
            .format
            .get_object(base, &parent.handle)
            .map_err(|err| err.with_path(abspath))?;
        Ok(AnnotatedHandle::new(handle, abspath))
    }

    /// Follows `handle` until it is no longer a symlink, failing if the
    /// final target is absent.
    fn resolve_symlinks(&self, handle: AnnotatedHandle) -> Result<AnnotatedHandle> {
        match self.follow_links(handle)? {
            LinkTarget::Object(resolved) => Ok(resolved),
            LinkTarget::Missing(_, err) => Err(err),
        }
    }

    /// Follows `handle` until it is no longer a symlink. A chain whose
    /// final target does not exist is reported as dangling rather than
    /// an error, so creating opens can materialize the target. Cycle
    /// detection is by absolute path: the set of visited paths is
    /// per-call and seeded with the starting path before the first link
    /// is read, so even a one-hop self-link fails cleanly.
    fn follow_links(&self, handle: AnnotatedHandle) -> Result<LinkTarget> {
        if !handle.is_symlink() {
            return Ok(LinkTarget::Object(handle));
        }
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(handle.path.clone());
        let mut current = handle;
        loop {
            if !current.is_symlink() {
                return Ok(LinkTarget::Object(current));
            }
            let target = self.read_link_target(&current)?;
            let next = self.normalize_path(&target);
            if !visited.insert(next.clone()) {
                return Err(Error::from_kind(ErrorKind::LoopDetected).with_path(&next));
            }
            current = match self.lookup(&next) {
                Ok(found) => found,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Ok(LinkTarget::Missing(next, err));
                }
                Err(err) => return Err(err),
            };
        }
    }

    /// Reads a symlink's contents as a path.
    fn read_link_target(&self, handle: &AnnotatedHandle) -> Result<String> {
        let size = handle.stat().size;
        let mut stream = self.open_stream(&handle.handle, OpenFlags::READ)?;
        let mut buf = vec![0u8; size as usize];
        let n = stream.read(&mut buf)?;
        buf.truncate(n);
        String::from_utf8(buf).map_err(|_| {
            Error::new(ErrorKind::InvalidArgument, "symlink target is not valid text")
                .with_path(&handle.path)
        })
    }

    fn block_cache_for(&self, handle: &HandleRef) -> BlockCache {
        let stat = handle.borrow().stat();
        let mut bytes_per_block = stat.blksize;
        if bytes_per_block == 0 {
            bytes_per_block = self.format.features().default_block_size;
        }
        if bytes_per_block == 0 {
            bytes_per_block = FALLBACK_BLOCK_SIZE;
        }
        let total_blocks = stat
            .blocks
            .max(stat.size.div_ceil(bytes_per_block as u64));
        BlockCache::new(
            Box::new(HandleBacking::new(
                Rc::clone(handle),
                bytes_per_block as u64,
            )),
            bytes_per_block as usize,
            total_blocks,
        )
    }

    fn open_stream(&self, handle: &HandleRef, flags: OpenFlags) -> Result<ByteStream> {
        let size = handle.borrow().stat().size;
        ByteStream::new(self.block_cache_for(handle), size, flags)
    }

    /// Opens an existing regular file for reading.
    pub fn open(&self, path: &str) -> Result<File> {
        self.open_file(path, OpenFlags::READ, FileMode::default())
    }

    /// Creates a regular file that must not already exist and opens it
    /// for reading and writing.
    pub fn create(&self, path: &str) -> Result<File> {
        self.open_file(
            path,
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE,
            FileMode::REGULAR | FileMode(0o644),
        )
    }

    /// Opens `path` with explicit open-mode flags. With
    /// [`OpenFlags::CREATE`] a missing final component is created in
    /// its parent with mode `perm`; adding [`OpenFlags::EXCLUSIVE`]
    /// makes an existing object an error. Symlinks are followed, and a
    /// creating open through a dangling link materializes the link's
    /// target. The final object must be a regular file.
    pub fn open_file(&self, path: &str, flags: OpenFlags, perm: FileMode) -> Result<File> {
        let abspath = self.normalize_path(path);
        if flags.requires_write_perm() && !self.flags.can_write() {
            return Err(Error::from_kind(ErrorKind::ReadOnlyFilesystem).with_path(&abspath));
        }
        let handle = match self.lookup(&abspath) {
            Ok(found) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) {
                    return Err(Error::from_kind(ErrorKind::Exists).with_path(&abspath));
                }
                match self.follow_links(found)? {
                    LinkTarget::Object(resolved) => resolved,
                    LinkTarget::Missing(target, err) => {
                        if !flags.contains(OpenFlags::CREATE) {
                            return Err(err);
                        }
                        // Dangling link: create the target, leave the
                        // link itself alone.
                        self.create_regular(&target, perm)?
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound && flags.contains(OpenFlags::CREATE) => {
                self.create_regular(&abspath, perm)?
            }
            Err(err) => return Err(err),
        };
        if !handle.stat().mode.is_file() {
            return Err(Error::from_kind(ErrorKind::IsDirectory).with_path(&handle.path));
        }
        let stream = self.open_stream(&handle.handle, flags)?;
        Ok(File::new(stream, handle.handle, handle.path))
    }

    /// Creates a regular file at the normalized absolute `abspath`,
    /// whose parent must be an existing directory.
    fn create_regular(&self, abspath: &str, perm: FileMode) -> Result<AnnotatedHandle> {
        let (dir, base) = path::split(abspath);
        let parent = self.resolve_symlinks(self.lookup(dir)?)?;
        if !parent.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory).with_path(dir));
        }
        debug!("creating {abspath}");
        let created = self
            .format
            .create_object(base, &parent.handle, perm)
            .map_err(|err| err.with_path(abspath))?;
        Ok(AnnotatedHandle::new(created, abspath))
    }

    /// Reads a whole regular file into memory.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.open(path)?;
        let mut data = vec![0u8; file.len() as usize];
        let n = file.read_at(&mut data, 0)?;
        data.truncate(n);
        file.close()?;
        Ok(data)
    }

    /// Writes `data` to `path`, creating the file with mode `perm` if
    /// needed and truncating it otherwise. The object's byte-precise
    /// length is recorded with the implementer once the blocks settle.
    pub fn write_file(&self, path: &str, data: &[u8], perm: FileMode) -> Result<()> {
        let mut file = self.open_file(
            path,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            perm,
        )?;
        if !data.is_empty() {
            file.write_at(data, 0)?;
        }
        file.sync()?;
        file.handle()
            .borrow_mut()
            .resize(data.len() as u64)
            .map_err(|err| err.with_path(file.path()))?;
        file.close()
    }

    /// Metadata for the object at `path`, following symlinks.
    pub fn metadata(&self, path: &str) -> Result<FileStat> {
        let handle = self.lookup(&self.normalize_path(path))?;
        Ok(self.resolve_symlinks(handle)?.stat())
    }

    /// Metadata for the object at `path` without following a final
    /// symlink.
    pub fn symlink_metadata(&self, path: &str) -> Result<FileStat> {
        Ok(self.lookup(&self.normalize_path(path))?.stat())
    }

    /// The textual target of the symlink at `path`.
    pub fn read_link(&self, path: &str) -> Result<String> {
        if !self.format.features().has_symbolic_links {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "format has no symbolic links",
            ));
        }
        let abspath = self.normalize_path(path);
        let handle = self.lookup(&abspath)?;
        if !handle.is_symlink() {
            return Err(
                Error::new(ErrorKind::InvalidArgument, "not a symbolic link").with_path(&abspath)
            );
        }
        self.read_link_target(&handle)
    }

    /// Creates a symbolic link at `linkpath` pointing at `target`.
    /// Refused when the format cannot store symlinks.
    pub fn symlink(&self, target: &str, linkpath: &str) -> Result<()> {
        self.require_writable()?;
        if !self.format.features().has_symbolic_links {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "format has no symbolic links",
            ));
        }
        let abspath = self.normalize_path(linkpath);
        if self.lookup(&abspath).is_ok() {
            return Err(Error::from_kind(ErrorKind::Exists).with_path(&abspath));
        }
        let (dir, base) = path::split(&abspath);
        let parent = self.resolve_symlinks(self.lookup(dir)?)?;
        if !parent.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory).with_path(dir));
        }
        let handle = self
            .format
            .create_object(base, &parent.handle, FileMode::SYMLINK | FileMode(0o777))
            .map_err(|err| err.with_path(&abspath))?;
        let mut stream = self.open_stream(&handle, OpenFlags::WRITE)?;
        stream.write(target.as_bytes())?;
        stream.close()?;
        handle
            .borrow_mut()
            .resize(target.len() as u64)
            .map_err(|err| err.with_path(&abspath))
    }

    /// Lists the directory at `path`, following symlinks. The synthetic
    /// `.` and `..` entries are filtered out.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let abspath = self.normalize_path(path);
        let handle = self.resolve_symlinks(self.lookup(&abspath)?)?;
        if !handle.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory).with_path(&abspath));
        }
        let names = handle
            .handle
            .borrow()
            .list_dir()
            .map_err(|err| err.with_path(&abspath))?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if name == "." || name == ".." {
                continue;
            }
            let child_path = path::join(&handle.path, &name);
            let child = self
                .format
                .get_object(&name, &handle.handle)
                .map_err(|err| err.with_path(&child_path))?;
            let stat = child.borrow().stat();
            entries.push(DirEntry { name, stat });
        }
        Ok(entries)
    }

    /// Changes the working directory to the directory at `path`.
    pub fn set_current_dir(&mut self, path: &str) -> Result<()> {
        let abspath = self.normalize_path(path);
        let handle = self.resolve_symlinks(self.lookup(&abspath)?)?;
        if !handle.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory).with_path(&abspath));
        }
        self.cwd = handle.path;
        Ok(())
    }

    /// Creates the directory at `path`. The parent must already exist.
    /// The directory type bit is forced into `perm`.
    pub fn create_dir(&self, path: &str, perm: FileMode) -> Result<()> {
        self.require_writable()?;
        let abspath = self.normalize_path(path);
        if abspath == "/" {
            return Err(Error::from_kind(ErrorKind::Exists).with_path("/"));
        }
        let (dir, base) = path::split(&abspath);
        let parent = self.resolve_symlinks(self.lookup(dir)?)?;
        if !parent.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory).with_path(dir));
        }
        debug!("creating directory {abspath}");
        self.format
            .create_object(base, &parent.handle, perm | FileMode::DIRECTORY)
            .map_err(|err| err.with_path(&abspath))?;
        Ok(())
    }

    /// Creates the directory at `path` along with any missing parents.
    /// Existing directories along the way are fine; an existing
    /// non-directory is not.
    pub fn create_dir_all(&self, path: &str, perm: FileMode) -> Result<()> {
        let abspath = self.normalize_path(path);
        match self.lookup(&abspath) {
            Ok(existing) => {
                let existing = self.resolve_symlinks(existing)?;
                return if existing.is_dir() {
                    Ok(())
                } else {
                    Err(Error::from_kind(ErrorKind::NotDirectory).with_path(&abspath))
                };
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let (dir, _) = path::split(&abspath);
        if dir != abspath {
            self.create_dir_all(dir, perm)?;
        }
        self.create_dir(&abspath, perm)
    }

    /// Removes the object at `path`. Directories must be empty;
    /// anything that is neither a file nor a directory is refused.
    pub fn remove(&self, path: &str) -> Result<()> {
        self.require_writable()?;
        let abspath = self.normalize_path(path);
        let handle = self.lookup(&abspath)?;
        let stat = handle.stat();
        if stat.mode.is_dir() {
            let names = handle
                .handle
                .borrow()
                .list_dir()
                .map_err(|err| err.with_path(&abspath))?;
            if names.iter().any(|name| name != "." && name != "..") {
                return Err(Error::from_kind(ErrorKind::DirectoryNotEmpty).with_path(&abspath));
            }
        } else if !stat.mode.is_file() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "only files and directories can be removed",
            )
            .with_path(&abspath));
        }
        debug!("unlinking {abspath}");
        handle
            .handle
            .borrow_mut()
            .unlink()
            .map_err(|err| err.with_path(&abspath))
    }

    /// Removes the directory at `path` and everything beneath it,
    /// children before parents, stopping at the first failure. The
    /// root itself can never be removed.
    pub fn remove_dir_all(&self, path: &str) -> Result<()> {
        self.require_writable()?;
        let abspath = self.normalize_path(path);
        if abspath == "/" {
            return Err(Error::new(
                ErrorKind::NotPermitted,
                "refusing to remove the root directory",
            ));
        }
        let handle = self.lookup(&abspath)?;
        if !handle.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory).with_path(&abspath));
        }
        self.remove_tree(&handle)
    }

    fn remove_tree(&self, dir: &AnnotatedHandle) -> Result<()> {
        let names = dir
            .handle
            .borrow()
            .list_dir()
            .map_err(|err| err.with_path(&dir.path))?;
        for name in names {
            if name == "." || name == ".." {
                continue;
            }
            let child_path = path::join(&dir.path, &name);
            let child = self
                .format
                .get_object(&name, &dir.handle)
                .map_err(|err| err.with_path(&child_path))?;
            let child = AnnotatedHandle::new(child, child_path);
            if child.is_dir() {
                self.remove_tree(&child)?;
            } else {
                child
                    .handle
                    .borrow_mut()
                    .unlink()
                    .map_err(|err| err.with_path(&child.path))?;
            }
        }
        debug!("unlinking {}", dir.path);
        dir.handle
            .borrow_mut()
            .unlink()
            .map_err(|err| err.with_path(&dir.path))
    }

    /// Whether `a` and `b` name the same underlying object, judged by
    /// stat identity. Symlinks are followed on both sides.
    pub fn same_file(&self, a: &str, b: &str) -> Result<bool> {
        Ok(self.metadata(a)?.ino == self.metadata(b)?.ino)
    }

    /// Truncates the regular file at `path` to zero length.
    pub fn truncate(&self, path: &str) -> Result<()> {
        self.require_writable()?;
        let abspath = self.normalize_path(path);
        let handle = self.resolve_symlinks(self.lookup(&abspath)?)?;
        if handle.is_dir() {
            return Err(Error::from_kind(ErrorKind::IsDirectory).with_path(&abspath));
        }
        handle
            .handle
            .borrow_mut()
            .resize(0)
            .map_err(|err| err.with_path(&abspath))
    }

    /// Replaces the permission bits of the object at `path`, following
    /// symlinks.
    pub fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        self.require_writable()?;
        let abspath = self.normalize_path(path);
        let handle = self.resolve_symlinks(self.lookup(&abspath)?)?;
        handle
            .handle
            .borrow_mut()
            .chmod(mode)
            .map_err(|err| err.with_path(&abspath))
    }

    /// Replaces the owner and group of the object at `path`, following
    /// symlinks.
    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.require_writable()?;
        let abspath = self.normalize_path(path);
        let handle = self.resolve_symlinks(self.lookup(&abspath)?)?;
        handle
            .handle
            .borrow_mut()
            .chown(uid, gid)
            .map_err(|err| err.with_path(&abspath))
    }

    /// Replaces access and modification times of the object at `path`,
    /// following symlinks. `None` leaves a timestamp untouched.
    pub fn set_times(
        &self,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        self.require_writable()?;
        let abspath = self.normalize_path(path);
        let handle = self.resolve_symlinks(self.lookup(&abspath)?)?;
        handle
            .handle
            .borrow_mut()
            .chtimes(atime, mtime)
            .map_err(|err| err.with_path(&abspath))
    }
}
