//! Bundled backends.
//!
//! Each backend implements [`FileSystem`](crate::FileSystem) and
//! [`FileOps`](crate::FileOps) for a different storage type, plus a
//! [`FileSystemType`](crate::FileSystemType) driver for mounting by name.

mod devfs;
mod memory;
mod romfs;

pub use devfs::{DevFs, DevFsType};
pub use memory::{MemFsType, MemoryFs};
pub use romfs::{ROMFS_MAGIC, RomFs, RomfsBuilder, RomfsType, XIP_GET_DATA_ADDRESS};
