//! Backend contracts.
//!
//! Filesystems and devices plug into the core through three traits:
//!
//! - [`FileOps`] - per-descriptor operations, bound to a descriptor at open
//! - [`FileSystem`] - a mounted instance: path-addressed operations
//! - [`FileSystemType`] - a registered driver that produces instances
//!
//! Every optional operation has a default body reporting
//! [`DfsError::NotSupported`], so a backend implements only what it has.

use std::sync::Arc;

use dfs_types::{DfsError, DfsResult, DirEntry, MountFlags, PollEvents, Stat, StatFs};

use crate::fd::Descriptor;

/// Which path a filesystem receives from the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Addressing {
    /// The portion below the mount point (`/` for the mount point itself).
    #[default]
    MountRelative,
    /// The whole canonical path, mount prefix included.
    FullPath,
}

/// Per-descriptor operations.
///
/// The dispatcher never holds its table lock while calling these, so a
/// backend may block in `read`/`write`/`ioctl` on its own synchronization.
pub trait FileOps: Send + Sync {
    /// Prepare `file` for I/O. `file.path()` holds the translated path.
    fn open(&self, _file: &mut Descriptor) -> DfsResult<()> {
        Err(DfsError::NotSupported)
    }

    /// Tear down backend state. Absence is a successful no-op.
    fn close(&self, _file: &mut Descriptor) -> DfsResult<()> {
        Ok(())
    }

    /// Device-specific control.
    fn ioctl(&self, _file: &mut Descriptor, _cmd: u32, _arg: usize) -> DfsResult<usize> {
        Err(DfsError::NotSupported)
    }

    /// Read into `buf` from the current position; returns bytes read.
    fn read(&self, _file: &mut Descriptor, _buf: &mut [u8]) -> DfsResult<usize> {
        Err(DfsError::NotSupported)
    }

    /// Write `buf` at the current position; returns bytes written.
    fn write(&self, _file: &mut Descriptor, _buf: &[u8]) -> DfsResult<usize> {
        Err(DfsError::NotSupported)
    }

    /// Push buffered data to the medium.
    fn flush(&self, _file: &mut Descriptor) -> DfsResult<()> {
        Err(DfsError::NotSupported)
    }

    /// Move to absolute `offset`; returns the position actually reached.
    fn lseek(&self, _file: &mut Descriptor, _offset: u64) -> DfsResult<u64> {
        Err(DfsError::NotSupported)
    }

    /// Fill `entries` from the directory cursor; returns entries filled.
    fn getdents(&self, _file: &mut Descriptor, _entries: &mut [DirEntry]) -> DfsResult<usize> {
        Err(DfsError::NotSupported)
    }

    /// Current readiness for `events`.
    fn poll(&self, _file: &mut Descriptor, _events: PollEvents) -> DfsResult<PollEvents> {
        Err(DfsError::NotSupported)
    }
}

/// A mounted filesystem instance.
pub trait FileSystem: Send + Sync {
    /// Driver name, for diagnostics.
    fn name(&self) -> &str;

    /// Operations bound to every descriptor opened on this instance.
    fn file_ops(&self) -> Arc<dyn FileOps>;

    /// Release the instance. Called with no descriptors open on it.
    fn unmount(&self) -> DfsResult<()> {
        Ok(())
    }

    /// Metadata for `path`.
    fn stat(&self, _path: &str) -> DfsResult<Stat> {
        Err(DfsError::NotSupported)
    }

    /// Move `old` to `new` within this instance.
    fn rename(&self, _old: &str, _new: &str) -> DfsResult<()> {
        Err(DfsError::NotSupported)
    }

    /// Remove `path`.
    fn unlink(&self, _path: &str) -> DfsResult<()> {
        Err(DfsError::NotSupported)
    }

    /// Capacity figures.
    fn statfs(&self) -> DfsResult<StatFs> {
        Err(DfsError::NotSupported)
    }
}

/// A filesystem driver, registered once and mounted any number of times.
pub trait FileSystemType: Send + Sync {
    /// Name used to select the driver at mount time.
    fn name(&self) -> &str;

    /// Path convention the instances expect.
    fn addressing(&self) -> Addressing {
        Addressing::MountRelative
    }

    /// Produce an instance from mount flags and optional source data.
    fn mount(&self, flags: MountFlags, data: Option<Arc<[u8]>>) -> DfsResult<Arc<dyn FileSystem>>;
}
