//! Error type shared by every layer of the storage core.
//!
//! Errors are a closed set of kinds plus a human-readable message. The
//! driver is the only place a failure is rewritten, and even there only the
//! message changes: path context is prepended while the kind is preserved,
//! so callers can always dispatch on [`Error::kind`].

use std::fmt;
use std::io;

/// Classifies every failure the storage core produces or propagates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The named object does not exist.
    NotFound,
    /// Exclusive creation was requested but the object already exists.
    Exists,
    /// A directory was found where a regular file is required.
    IsDirectory,
    /// A non-directory was found where a directory is required.
    NotDirectory,
    /// A malformed argument: negative seek, unknown whence, a non-symlink
    /// passed to a readlink, and similar.
    InvalidArgument,
    /// The operation is not permitted on this object or stream, e.g.
    /// writing through a read-only stream or positioned writes on an
    /// append-only stream.
    NotPermitted,
    /// A write-capable operation was attempted on a read-only mount.
    ReadOnlyFilesystem,
    /// A directory slated for removal still has entries.
    DirectoryNotEmpty,
    /// Symbolic-link resolution revisited an absolute path.
    LoopDetected,
    /// The format implementer does not support the requested feature.
    NotSupported,
    /// A lower-level I/O failure, wrapped unchanged.
    Io,
    /// The object cannot grow any further on this format.
    FileTooLarge,
    /// The underlying volume is out of allocatable space.
    NoSpace,
    /// A block index or byte range fell outside the object's bounds.
    OutOfRange,
}

impl ErrorKind {
    /// The closest classic errno value for this kind, for interop with
    /// OS-flavored callers.
    pub fn errno(self) -> libc::c_int {
        match self {
            ErrorKind::NotFound => libc::ENOENT,
            ErrorKind::Exists => libc::EEXIST,
            ErrorKind::IsDirectory => libc::EISDIR,
            ErrorKind::NotDirectory => libc::ENOTDIR,
            ErrorKind::InvalidArgument => libc::EINVAL,
            ErrorKind::NotPermitted => libc::EPERM,
            ErrorKind::ReadOnlyFilesystem => libc::EROFS,
            ErrorKind::DirectoryNotEmpty => libc::ENOTEMPTY,
            ErrorKind::LoopDetected => libc::ELOOP,
            ErrorKind::NotSupported => libc::ENOTSUP,
            ErrorKind::Io => libc::EIO,
            ErrorKind::FileTooLarge => libc::EFBIG,
            ErrorKind::NoSpace => libc::ENOSPC,
            ErrorKind::OutOfRange => libc::ERANGE,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Exists => "already exists",
            ErrorKind::IsDirectory => "is a directory",
            ErrorKind::NotDirectory => "not a directory",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotPermitted => "not permitted",
            ErrorKind::ReadOnlyFilesystem => "read-only file system",
            ErrorKind::DirectoryNotEmpty => "directory not empty",
            ErrorKind::LoopDetected => "loop detected",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::Io => "i/o failed",
            ErrorKind::FileTooLarge => "file too large",
            ErrorKind::NoSpace => "no space on device",
            ErrorKind::OutOfRange => "argument out of range",
        }
    }
}

/// A structured error value: a [`ErrorKind`] plus a message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds an error of `kind` with an explicit message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Builds an error whose message is the kind's canonical text.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.as_str().to_string(),
        }
    }

    /// The error's kind. Stable across path annotation.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The classic errno value for this error's kind.
    pub fn errno(&self) -> libc::c_int {
        self.kind.errno()
    }

    /// Prepends the originating path to the message. The kind is
    /// preserved so callers can still dispatch on it.
    pub fn with_path(self, path: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("{path}: {}", self.message),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::from_kind(kind)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ErrorKind::Exists,
            io::ErrorKind::PermissionDenied => ErrorKind::NotPermitted,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            _ => ErrorKind::Io,
        };
        Error::new(kind, err.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::Exists => io::ErrorKind::AlreadyExists,
            ErrorKind::NotPermitted | ErrorKind::ReadOnlyFilesystem => {
                io::ErrorKind::PermissionDenied
            }
            ErrorKind::InvalidArgument | ErrorKind::OutOfRange => io::ErrorKind::InvalidInput,
            ErrorKind::NotSupported => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_path_preserves_kind() {
        let err = Error::from_kind(ErrorKind::NotFound).with_path("/boot/kernel");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "/boot/kernel: not found");
    }

    #[test]
    fn errno_round_trip_spot_checks() {
        assert_eq!(Error::from_kind(ErrorKind::NotFound).errno(), libc::ENOENT);
        assert_eq!(
            Error::from_kind(ErrorKind::LoopDetected).errno(),
            libc::ELOOP
        );
        assert_eq!(
            Error::from_kind(ErrorKind::ReadOnlyFilesystem).errno(),
            libc::EROFS
        );
    }

    #[test]
    fn io_error_conversion_keeps_classification() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let back: io::Error = Error::from_kind(ErrorKind::Exists).into();
        assert_eq!(back.kind(), io::ErrorKind::AlreadyExists);
    }
}
