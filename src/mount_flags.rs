//! Capabilities granted to a [`Driver`](crate::Driver) at construction.

use bitflags::bitflags;

bitflags! {
    /// What the mount as a whole is allowed to do.
    ///
    /// A driver mounted without `WRITE` refuses every operation that
    /// could alter storage with `ReadOnlyFilesystem`, before the format
    /// implementer is ever consulted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MountFlags: u32 {
        /// Objects may be read.
        const READ = 1 << 0;
        /// Objects may be created, written and removed.
        const WRITE = 1 << 1;
        /// Everything the driver can do.
        const ALL = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl MountFlags {
    /// Whether write-capable operations are allowed on this mount.
    pub fn can_write(self) -> bool {
        self.contains(MountFlags::WRITE)
    }
}
