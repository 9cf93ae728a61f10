//! VFS error types.

use std::io;
use thiserror::Error;

use crate::errno::Errno;

/// VFS error type.
///
/// Backends report failure exclusively through this type; nothing unwinds
/// across the backend boundary.
#[derive(Debug, Error)]
pub enum DfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// No mount point covers the path.
    #[error("no mount point for path: {0}")]
    NoMountPoint(String),

    /// Path is held by a live descriptor, or a mount is still in use.
    #[error("resource busy: {0}")]
    Busy(String),

    /// Operation not implemented by the backend.
    #[error("operation not supported")]
    NotSupported,

    /// Malformed path, out-of-range offset, or degenerate flags.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failure while growing a table or building a path.
    #[error("out of memory")]
    OutOfMemory,

    /// A bounded table reached its ceiling.
    #[error("{0} table is full")]
    TableFull(&'static str),

    /// A mount already owns this path.
    #[error("path already mounted: {0}")]
    PathConflict(String),

    /// Name already registered or file already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Rename across two mounted backends.
    #[error("cross-device link")]
    CrossDevice,

    /// Device name lookup miss.
    #[error("no such device: {0}")]
    NoDevice(String),

    /// Descriptor index out of range, recycled, or not open.
    #[error("bad file descriptor: {0}")]
    BadDescriptor(usize),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Mount data is not an image this filesystem understands.
    #[error("not a valid filesystem image")]
    NotBlockDevice,

    /// Path longer than the configured maximum.
    #[error("file name too long")]
    NameTooLong,

    /// Backend failure with no more specific cause.
    #[error("I/O error: {0}")]
    Io(String),
}

impl DfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NoMountPoint error.
    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    /// Create a Busy error.
    pub fn busy(what: impl Into<String>) -> Self {
        Self::Busy(what.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists(name.into())
    }

    /// Create a NoDevice error.
    pub fn no_device(name: impl Into<String>) -> Self {
        Self::NoDevice(name.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an Io error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// The POSIX error number this failure is reported as.
    pub fn errno(&self) -> Errno {
        match self {
            DfsError::NotFound(_) | DfsError::NoMountPoint(_) => Errno::NoEntry,
            DfsError::Busy(_) | DfsError::PathConflict(_) => Errno::Busy,
            DfsError::NotSupported => Errno::NoSys,
            DfsError::InvalidArgument(_) => Errno::Invalid,
            DfsError::OutOfMemory | DfsError::TableFull(_) => Errno::NoMemory,
            DfsError::AlreadyExists(_) => Errno::Exists,
            DfsError::CrossDevice => Errno::CrossDevice,
            DfsError::NoDevice(_) => Errno::NoDevice,
            DfsError::BadDescriptor(_) => Errno::BadFile,
            DfsError::NotADirectory(_) => Errno::NotDir,
            DfsError::IsADirectory(_) => Errno::IsDir,
            DfsError::ReadOnly => Errno::ReadOnlyFs,
            DfsError::NotBlockDevice => Errno::NotBlock,
            DfsError::NameTooLong => Errno::NameTooLong,
            DfsError::Io(_) => Errno::Io,
        }
    }
}

/// Convert DfsError to std::io::Error for host tooling.
impl From<DfsError> for io::Error {
    fn from(e: DfsError) -> Self {
        let kind = match &e {
            DfsError::NotFound(_) | DfsError::NoMountPoint(_) | DfsError::NoDevice(_) => {
                io::ErrorKind::NotFound
            }
            DfsError::AlreadyExists(_) | DfsError::PathConflict(_) => {
                io::ErrorKind::AlreadyExists
            }
            DfsError::Busy(_) => io::ErrorKind::ResourceBusy,
            DfsError::NotSupported => io::ErrorKind::Unsupported,
            DfsError::InvalidArgument(_) | DfsError::BadDescriptor(_) | DfsError::NameTooLong => {
                io::ErrorKind::InvalidInput
            }
            DfsError::OutOfMemory | DfsError::TableFull(_) => io::ErrorKind::OutOfMemory,
            DfsError::CrossDevice => io::ErrorKind::CrossesDevices,
            DfsError::NotADirectory(_) => io::ErrorKind::NotADirectory,
            DfsError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            DfsError::ReadOnly => io::ErrorKind::ReadOnlyFilesystem,
            DfsError::NotBlockDevice | DfsError::Io(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e.to_string())
    }
}

/// VFS result type.
pub type DfsResult<T> = Result<T, DfsError>;
