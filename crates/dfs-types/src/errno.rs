//! Conventional POSIX error numbers.
//!
//! Values follow the Linux asm-generic numbering so results can be handed to
//! a libc shim without translation.

use strum::{Display, IntoStaticStr};

use crate::DfsResult;

/// POSIX error number reported by the call surface.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum Errno {
    /// No such file or directory.
    #[strum(serialize = "ENOENT")]
    NoEntry = 2,
    /// I/O error.
    #[strum(serialize = "EIO")]
    Io = 5,
    /// Bad file number.
    #[strum(serialize = "EBADF")]
    BadFile = 9,
    /// Out of memory.
    #[strum(serialize = "ENOMEM")]
    NoMemory = 12,
    /// Block device required.
    #[strum(serialize = "ENOTBLK")]
    NotBlock = 15,
    /// Device or resource busy.
    #[strum(serialize = "EBUSY")]
    Busy = 16,
    /// File exists.
    #[strum(serialize = "EEXIST")]
    Exists = 17,
    /// Cross-device link.
    #[strum(serialize = "EXDEV")]
    CrossDevice = 18,
    /// No such device.
    #[strum(serialize = "ENODEV")]
    NoDevice = 19,
    /// Not a directory.
    #[strum(serialize = "ENOTDIR")]
    NotDir = 20,
    /// Is a directory.
    #[strum(serialize = "EISDIR")]
    IsDir = 21,
    /// Invalid argument.
    #[strum(serialize = "EINVAL")]
    Invalid = 22,
    /// Read-only filesystem.
    #[strum(serialize = "EROFS")]
    ReadOnlyFs = 30,
    /// File name too long.
    #[strum(serialize = "ENAMETOOLONG")]
    NameTooLong = 36,
    /// Function not implemented.
    #[strum(serialize = "ENOSYS")]
    NoSys = 38,
}

impl Errno {
    /// The positive error number.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// The negated error number, as returned by the syscall convention.
    pub fn as_neg(self) -> isize {
        -(self as i32 as isize)
    }
}

/// Flatten a call result into "non-negative value or negated errno".
pub fn to_posix(result: DfsResult<usize>) -> isize {
    match result {
        Ok(n) => isize::try_from(n).unwrap_or(isize::MAX),
        Err(e) => e.errno().as_neg(),
    }
}
