//! Open flags.

use serde::{Deserialize, Serialize};

use crate::{DfsError, DfsResult};

/// POSIX open(2) bit values (Linux generic numbering).
pub mod bits {
    pub const O_RDONLY: u32 = 0o0;
    pub const O_WRONLY: u32 = 0o1;
    pub const O_RDWR: u32 = 0o2;
    pub const O_ACCMODE: u32 = 0o3;
    pub const O_CREAT: u32 = 0o100;
    pub const O_EXCL: u32 = 0o200;
    pub const O_TRUNC: u32 = 0o1000;
    pub const O_APPEND: u32 = 0o2000;
    pub const O_DIRECTORY: u32 = 0o200000;
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
    /// Open a directory for `getdents`.
    pub directory: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
            directory: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write-only access.
    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
            ..Default::default()
        }
    }

    /// Read and write access.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            truncate: true,
            ..Self::create()
        }
    }

    /// Open a directory for iteration.
    pub fn directory() -> Self {
        Self {
            directory: true,
            ..Default::default()
        }
    }

    /// Set append mode.
    pub fn with_append(mut self) -> Self {
        self.append = true;
        self
    }

    /// Set exclusive create.
    pub fn with_exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// True if any flag implies modifying the target.
    pub fn modifies(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }

    /// Reject degenerate combinations before anything touches a table.
    pub fn validate(&self) -> DfsResult<()> {
        if !self.read && !self.write {
            return Err(DfsError::invalid("neither read nor write access requested"));
        }
        if self.directory && self.modifies() {
            return Err(DfsError::invalid("directory opened with write intent"));
        }
        if self.truncate && !self.write {
            return Err(DfsError::invalid("truncate without write access"));
        }
        if self.exclusive && !self.create {
            return Err(DfsError::invalid("exclusive without create"));
        }
        Ok(())
    }

    /// Decode POSIX open(2) bits.
    pub fn from_posix(flags: u32) -> DfsResult<Self> {
        let (read, write) = match flags & bits::O_ACCMODE {
            bits::O_RDONLY => (true, false),
            bits::O_WRONLY => (false, true),
            bits::O_RDWR => (true, true),
            _ => return Err(DfsError::invalid(format!("access mode in {flags:#o}"))),
        };
        Ok(Self {
            read,
            write,
            append: flags & bits::O_APPEND != 0,
            create: flags & bits::O_CREAT != 0,
            truncate: flags & bits::O_TRUNC != 0,
            exclusive: flags & bits::O_EXCL != 0,
            directory: flags & bits::O_DIRECTORY != 0,
        })
    }

    /// Encode as POSIX open(2) bits.
    pub fn to_posix(&self) -> u32 {
        let mut flags = match (self.read, self.write) {
            (_, false) => bits::O_RDONLY,
            (false, true) => bits::O_WRONLY,
            (true, true) => bits::O_RDWR,
        };
        if self.append {
            flags |= bits::O_APPEND;
        }
        if self.create {
            flags |= bits::O_CREAT;
        }
        if self.truncate {
            flags |= bits::O_TRUNC;
        }
        if self.exclusive {
            flags |= bits::O_EXCL;
        }
        if self.directory {
            flags |= bits::O_DIRECTORY;
        }
        flags
    }
}
