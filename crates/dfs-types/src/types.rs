//! Core VFS value types.
//!
//! Metadata and directory records are serializable so host tooling can dump
//! them; masks are plain bitflags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Logical type recorded on a descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    /// Regular file or device stream.
    #[default]
    Regular,
    /// Socket.
    Socket,
    /// Directory, iterable with `getdents`.
    Directory,
    /// Backend-defined.
    User,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::Regular)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// `st_mode` bits.
pub mod mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFCHR: u32 = 0o020000;
    pub const S_IFBLK: u32 = 0o060000;
    pub const S_IFREG: u32 = 0o100000;

    pub const S_IRWXU: u32 = 0o700;
    pub const S_IRUSR: u32 = 0o400;
    pub const S_IWUSR: u32 = 0o200;
    pub const S_IXUSR: u32 = 0o100;
    pub const S_IRGRP: u32 = 0o040;
    pub const S_IWGRP: u32 = 0o020;
    pub const S_IXGRP: u32 = 0o010;
    pub const S_IROTH: u32 = 0o004;
    pub const S_IWOTH: u32 = 0o002;
    pub const S_IXOTH: u32 = 0o001;

    /// Read and write for everyone.
    pub const RW_ALL: u32 = S_IRUSR | S_IRGRP | S_IROTH | S_IWUSR | S_IWGRP | S_IWOTH;
    /// Read, write and execute for everyone.
    pub const RWX_ALL: u32 = RW_ALL | S_IXUSR | S_IXGRP | S_IXOTH;
}

/// File attributes (metadata).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Device number (always 0 here).
    pub dev: u32,
    /// Type and permission bits.
    pub mode: u32,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, seconds since the epoch.
    pub mtime: u64,
}

impl Stat {
    /// A read/write/execute directory, as synthesized for `/` and mount points.
    pub fn directory() -> Self {
        Self {
            mode: mode::S_IFDIR | mode::RWX_ALL,
            ..Default::default()
        }
    }

    /// A regular file of `size` bytes.
    pub fn file(size: u64) -> Self {
        Self {
            mode: mode::S_IFREG | mode::RW_ALL,
            size,
            ..Default::default()
        }
    }

    /// A character device node.
    pub fn char_device() -> Self {
        Self {
            mode: mode::S_IFCHR | mode::RW_ALL,
            ..Default::default()
        }
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFDIR
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFREG
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & !mode::S_IFMT
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFs {
    /// Block size.
    pub bsize: u32,
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
}

/// Directory entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Regular)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

bitflags! {
    /// Readiness mask reported by `poll`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PollEvents: u16 {
        const IN = 0x01;
        const OUT = 0x02;
        const ERR = 0x04;
        const HUP = 0x08;
        const NVAL = 0x10;
    }
}

impl PollEvents {
    /// Mask for a backend that is always ready.
    pub const DEFAULT_MASK: PollEvents = PollEvents::IN.union(PollEvents::OUT);
}

bitflags! {
    /// Flags handed to a filesystem driver at mount time.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct MountFlags: u32 {
        const READ_ONLY = 0x01;
    }
}

/// Origin for `lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the file.
    Set,
    /// From the current position.
    Cur,
    /// From the declared size.
    End,
}
