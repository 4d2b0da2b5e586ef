//! In-memory format implementer used by the driver tests.
//!
//! Objects live in an inode table behind `Rc<RefCell<...>>`; handles
//! carry just an inode number. Directory listings include synthetic `.`
//! and `..` entries so the driver's filtering is actually exercised,
//! and the fixture logs every create and unlink so tests can assert on
//! argument values and ordering.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use retrofs::{
    Error, ErrorKind, FileMode, FileStat, FormatImplementer, FsFeatures, HandleRef, LogicalBlock,
    ObjectHandle, Result,
};

const ROOT_INO: u64 = 1;
const BLOCK_SIZE: u32 = 512;

#[derive(Debug)]
struct Node {
    ino: u64,
    name: String,
    mode: FileMode,
    size: u64,
    data: Vec<u8>,
    children: BTreeMap<String, u64>,
    parent: u64,
    uid: u32,
    gid: u32,
    atime: SystemTime,
    mtime: SystemTime,
}

impl Node {
    fn new(ino: u64, name: &str, mode: FileMode, parent: u64) -> Self {
        Self {
            ino,
            name: name.to_string(),
            mode,
            size: 0,
            data: Vec::new(),
            children: BTreeMap::new(),
            parent,
            uid: 0,
            gid: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
        }
    }
}

#[derive(Debug)]
struct MemFsInner {
    nodes: RefCell<HashMap<u64, Node>>,
    next_ino: Cell<u64>,
    features: FsFeatures,
    create_log: RefCell<Vec<(String, FileMode)>>,
    unlink_log: RefCell<Vec<String>>,
}

/// Cloneable in-memory file system; clones share the same inode table.
#[derive(Clone, Debug)]
pub struct MemFs {
    inner: Rc<MemFsInner>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::build(FsFeatures {
            has_directories: true,
            has_symbolic_links: true,
            has_unix_permissions: true,
            default_block_size: BLOCK_SIZE,
            ..FsFeatures::default()
        })
    }

    /// A fixture whose format advertises no symlink support.
    pub fn without_symlinks() -> Self {
        Self::build(FsFeatures {
            has_directories: true,
            has_symbolic_links: false,
            default_block_size: BLOCK_SIZE,
            ..FsFeatures::default()
        })
    }

    fn build(features: FsFeatures) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Node::new(
                ROOT_INO,
                "/",
                FileMode::DIRECTORY | FileMode(0o755),
                ROOT_INO,
            ),
        );
        Self {
            inner: Rc::new(MemFsInner {
                nodes: RefCell::new(nodes),
                next_ino: Cell::new(ROOT_INO + 1),
                features,
                create_log: RefCell::new(Vec::new()),
                unlink_log: RefCell::new(Vec::new()),
            }),
        }
    }

    fn handle(&self, ino: u64) -> HandleRef {
        Rc::new(RefCell::new(MemHandle {
            fs: Rc::clone(&self.inner),
            ino,
        }))
    }

    /// `(name, mode)` pairs passed to `create_object`, in call order.
    pub fn create_log(&self) -> Vec<(String, FileMode)> {
        self.inner.create_log.borrow().clone()
    }

    /// Names of unlinked objects, in call order.
    pub fn unlink_log(&self) -> Vec<String> {
        self.inner.unlink_log.borrow().clone()
    }
}

impl FormatImplementer for MemFs {
    fn get_root_directory(&self) -> HandleRef {
        self.handle(ROOT_INO)
    }

    fn get_object(&self, name: &str, parent: &HandleRef) -> Result<HandleRef> {
        let parent_ino = parent.borrow().stat().ino;
        let nodes = self.inner.nodes.borrow();
        let parent_node = nodes
            .get(&parent_ino)
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        if !parent_node.mode.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory));
        }
        let ino = match name {
            "." => parent_ino,
            ".." => parent_node.parent,
            _ => *parent_node
                .children
                .get(name)
                .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?,
        };
        Ok(self.handle(ino))
    }

    fn create_object(&self, name: &str, parent: &HandleRef, perm: FileMode) -> Result<HandleRef> {
        self.inner
            .create_log
            .borrow_mut()
            .push((name.to_string(), perm));
        let parent_ino = parent.borrow().stat().ino;
        let mut nodes = self.inner.nodes.borrow_mut();
        let parent_node = nodes
            .get(&parent_ino)
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        if !parent_node.mode.is_dir() {
            return Err(Error::from_kind(ErrorKind::NotDirectory));
        }
        if parent_node.children.contains_key(name) {
            return Err(Error::from_kind(ErrorKind::Exists));
        }
        // Untyped modes create regular files.
        let mode = if (perm & FileMode::TYPE_MASK).bits() == 0 {
            FileMode::REGULAR | perm
        } else {
            perm
        };
        let ino = self.inner.next_ino.get();
        self.inner.next_ino.set(ino + 1);
        nodes.insert(ino, Node::new(ino, name, mode, parent_ino));
        nodes
            .get_mut(&parent_ino)
            .expect("parent just looked up")
            .children
            .insert(name.to_string(), ino);
        Ok(self.handle(ino))
    }

    fn features(&self) -> FsFeatures {
        self.inner.features
    }
}

#[derive(Debug)]
struct MemHandle {
    fs: Rc<MemFsInner>,
    ino: u64,
}

impl MemHandle {
    fn with_node<T>(&self, f: impl FnOnce(&Node) -> T) -> T {
        let nodes = self.fs.nodes.borrow();
        f(nodes.get(&self.ino).expect("node exists"))
    }

    fn with_node_mut<T>(&self, f: impl FnOnce(&mut Node) -> T) -> T {
        let mut nodes = self.fs.nodes.borrow_mut();
        f(nodes.get_mut(&self.ino).expect("node exists"))
    }
}

impl ObjectHandle for MemHandle {
    fn stat(&self) -> FileStat {
        self.with_node(|node| FileStat {
            ino: node.ino,
            mode: node.mode,
            size: node.size,
            blksize: BLOCK_SIZE,
            blocks: (node.data.len() as u64) / BLOCK_SIZE as u64,
            uid: node.uid,
            gid: node.gid,
            atime: node.atime,
            mtime: node.mtime,
            ..FileStat::default()
        })
    }

    fn name(&self) -> String {
        self.with_node(|node| node.name.clone())
    }

    fn read_blocks(&mut self, start: LogicalBlock, buf: &mut [u8]) -> Result<()> {
        self.with_node(|node| {
            let from = start as usize * BLOCK_SIZE as usize;
            if from + buf.len() > node.data.len() {
                return Err(Error::from_kind(ErrorKind::OutOfRange));
            }
            buf.copy_from_slice(&node.data[from..from + buf.len()]);
            Ok(())
        })
    }

    fn write_blocks(&mut self, start: LogicalBlock, data: &[u8]) -> Result<()> {
        self.with_node_mut(|node| {
            let from = start as usize * BLOCK_SIZE as usize;
            if from + data.len() > node.data.len() {
                return Err(Error::from_kind(ErrorKind::OutOfRange));
            }
            node.data[from..from + data.len()].copy_from_slice(data);
            Ok(())
        })
    }

    fn resize(&mut self, new_size: u64) -> Result<()> {
        self.with_node_mut(|node| {
            // Storage stays block-granular; the logical size is exact.
            let capacity = new_size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
            node.data.resize(capacity as usize, 0);
            node.size = new_size;
            Ok(())
        })
    }

    fn unlink(&mut self) -> Result<()> {
        let mut nodes = self.fs.nodes.borrow_mut();
        let (name, parent) = {
            let node = nodes.get(&self.ino).expect("node exists");
            (node.name.clone(), node.parent)
        };
        if let Some(parent_node) = nodes.get_mut(&parent) {
            parent_node.children.remove(&name);
        }
        nodes.remove(&self.ino);
        self.fs.unlink_log.borrow_mut().push(name);
        Ok(())
    }

    fn chmod(&mut self, mode: FileMode) -> Result<()> {
        self.with_node_mut(|node| {
            node.mode = (node.mode & FileMode::TYPE_MASK) | mode.perm();
            Ok(())
        })
    }

    fn chown(&mut self, uid: u32, gid: u32) -> Result<()> {
        self.with_node_mut(|node| {
            node.uid = uid;
            node.gid = gid;
            Ok(())
        })
    }

    fn chtimes(&mut self, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<()> {
        self.with_node_mut(|node| {
            if let Some(atime) = atime {
                node.atime = atime;
            }
            if let Some(mtime) = mtime {
                node.mtime = mtime;
            }
            Ok(())
        })
    }

    fn list_dir(&self) -> Result<Vec<String>> {
        self.with_node(|node| {
            if !node.mode.is_dir() {
                return Err(Error::from_kind(ErrorKind::NotDirectory));
            }
            let mut names = vec![".".to_string(), "..".to_string()];
            names.extend(node.children.keys().cloned());
            Ok(names)
        })
    }
}
