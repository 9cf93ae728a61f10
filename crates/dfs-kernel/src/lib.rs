//! Virtual filesystem core for small embedded systems.
//!
//! One call surface (`open`, `read`, `stat`, `rename`, ...) over several
//! mounted filesystems and named devices. Key components:
//!
//! - [`Vfs`] - the dispatcher; owns every table and the working directory
//! - [`MountTable`] - routes canonical paths to mounts by longest prefix
//! - [`FdTable`] - bounded, growable, reference-counted descriptor slots
//! - [`DeviceRegistry`] - named devices for `/dev` and device-only opens
//! - [`FileOps`], [`FileSystem`], [`FileSystemType`] - backend contracts
//! - [`backends`] - read-only archive, device and in-memory filesystems
//!
//! ## Design Decisions
//!
//! - **Index identity**: a descriptor is an index into the table, never a
//!   pointer. A closed index simply stops resolving.
//! - **First open wins**: a file already open on a mount cannot be opened
//!   again until it is closed.
//! - **Short lock holds**: the table mutex covers table changes only;
//!   backends run without it and may block.
//!
//! ```
//! use std::sync::Arc;
//! use dfs_kernel::{Addressing, DfsConfig, OpenFlags, Vfs};
//! use dfs_kernel::backends::MemoryFs;
//!
//! let vfs = Vfs::new(DfsConfig::default()).unwrap();
//! vfs.mount_instance("/", Arc::new(MemoryFs::new()), Addressing::MountRelative)
//!     .unwrap();
//!
//! let fd = vfs.open("/data/../hello.txt", OpenFlags::create()).unwrap();
//! vfs.write(fd, b"hi").unwrap();
//! vfs.close(fd).unwrap();
//! assert_eq!(vfs.stat("/hello.txt").unwrap().size, 2);
//! ```

pub mod backends;
mod config;
mod device;
mod fd;
mod mount;
mod ops;
pub mod path;
mod vfs;

pub use config::{ConfigError, DfsConfig};
pub use device::{Device, DeviceClass, DeviceRegistry};
pub use fd::{Descriptor, FD_MAGIC, FdTable, OpenFile};
pub use mount::{MountEntry, MountId, MountTable};
pub use ops::{Addressing, FileOps, FileSystem, FileSystemType};
pub use vfs::Vfs;

pub use dfs_types::{
    DfsError, DfsResult, DirEntry, Errno, FileType, MountFlags, OpenFlags, PollEvents, Stat,
    StatFs, Whence, mode, to_posix,
};
