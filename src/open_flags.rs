//! Open-mode flags accepted when opening a byte stream or file.

use bitflags::bitflags;

bitflags! {
    /// Open-mode flags, the moral equivalents of the classic `O_*` set.
    ///
    /// The bit layout is this crate's own; only the semantics are shared
    /// with the OS flags. A read-only open is `READ` alone, the
    /// read-write equivalent of `O_RDWR` is `READ | WRITE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Reads are permitted (`O_RDONLY` when alone).
        const READ = 1 << 0;
        /// Writes are permitted (`O_WRONLY` when alone).
        const WRITE = 1 << 1;
        /// Every write lands at the current end of the stream (`O_APPEND`).
        const APPEND = 1 << 2;
        /// Create the object if it does not exist (`O_CREAT`).
        const CREATE = 1 << 3;
        /// With `CREATE`, fail if the object already exists (`O_EXCL`).
        const EXCLUSIVE = 1 << 4;
        /// Truncate the stream to zero length on open (`O_TRUNC`).
        const TRUNCATE = 1 << 5;
        /// Flush dirty blocks after every write (`O_SYNC`).
        const SYNCHRONOUS = 1 << 6;
    }
}

impl OpenFlags {
    /// Whether an open with these flags needs a write-capable mount.
    ///
    /// Anything that can mutate the object counts, not just `WRITE`:
    /// creation, truncation and appends all change storage.
    pub fn requires_write_perm(self) -> bool {
        self.intersects(
            OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        )
    }

    /// Whether reads are permitted.
    pub fn readable(self) -> bool {
        self.contains(OpenFlags::READ)
    }

    /// Whether writes are permitted.
    pub fn writable(self) -> bool {
        self.contains(OpenFlags::WRITE)
    }
}
