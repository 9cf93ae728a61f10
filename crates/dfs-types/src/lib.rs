//! Shared value types for the dfs virtual filesystem.
//!
//! This is a leaf crate: the VFS core and every backend depend on it, and it
//! depends on nothing internal. It carries no behaviour beyond conversions.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`DfsError`]      | Every failure the call surface can report    |
//! | [`Errno`]         | Conventional POSIX error numbers             |
//! | [`OpenFlags`]     | Access mode and open-time behaviour          |
//! | [`Stat`]          | File metadata returned by `stat`/`fstat`     |
//! | [`DirEntry`]      | One record produced by `getdents`            |
//! | [`PollEvents`]    | Readiness mask for `poll`                    |
//! |-------------------|----------------------------------------------|

pub mod errno;
mod error;
pub mod flags;
mod types;

pub use errno::{to_posix, Errno};
pub use error::{DfsError, DfsResult};
pub use flags::OpenFlags;
pub use types::{mode, DirEntry, FileType, MountFlags, PollEvents, Stat, StatFs, Whence};
