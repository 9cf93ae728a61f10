//! Descriptor-based calls.

use std::sync::Arc;

use dfs_types::{DfsError, DfsResult, DirEntry, FileType, OpenFlags, PollEvents, Stat, Whence};
use tracing::{debug, warn};

use super::Vfs;
use crate::fd::{Descriptor, OpenFile, OpenKey};
use crate::path;

impl Vfs {
    /// Open `path` and return its descriptor index.
    ///
    /// A second open of the same file on the same mount fails with
    /// [`DfsError::Busy`] until the first is closed.
    pub fn open(&self, path: &str, flags: OpenFlags) -> DfsResult<usize> {
        flags.validate()?;
        let canonical = self.normalize(path)?;

        let (index, file) = {
            let mut tables = self.tables.lock();
            let entry = tables.mounts.lookup(&canonical)?;
            let key = OpenKey {
                mount: entry.id(),
                path: entry.translate(&canonical),
            };
            let ops = entry.fs().file_ops();
            if tables.fds.is_open(&key) {
                warn!(path = %canonical, "already open");
                return Err(DfsError::busy(canonical));
            }
            let file = Arc::new(OpenFile::new(
                ops,
                Some(key.clone()),
                Descriptor::new(key.path.clone(), flags),
            ));
            let index = tables.fds.allocate(0, Arc::clone(&file), Some(key))?;
            (index, file)
        };

        debug!(fd = index, path = %canonical, ?flags, "open");
        self.finish_open(index, &file)?;
        Ok(index)
    }

    /// Open a registered device by name, bypassing the mount table. Only
    /// the final path component is used, so `/dev/uart0` and `uart0` name
    /// the same device.
    pub fn open_device(&self, name: &str, flags: OpenFlags) -> DfsResult<usize> {
        flags.validate()?;
        let name = path::file_name(name);
        let device = self
            .devices
            .find(name)
            .ok_or_else(|| DfsError::no_device(name))?;

        let mut state = Descriptor::new(name, flags);
        state.bind_device(Arc::clone(&device));
        let file = Arc::new(OpenFile::new(Arc::clone(device.ops()), None, state));
        let allocated = self.tables.lock().fds.allocate(0, Arc::clone(&file), None);
        let index = match allocated {
            Ok(index) => index,
            Err(err) => {
                file.state().lock().release_device();
                return Err(err);
            }
        };

        debug!(fd = index, device = %name, "open device");
        self.finish_open(index, &file)?;
        Ok(index)
    }

    /// Run the backend open on a freshly allocated slot, then publish the
    /// slot or roll it back. Nobody else can reach the slot yet, so the
    /// state lock is held across the call.
    fn finish_open(&self, index: usize, file: &OpenFile) -> DfsResult<()> {
        let result = {
            let mut state = file.state().lock();
            let result = file.ops().open(&mut state);
            match result {
                Ok(()) => {
                    state.mark_open();
                    if state.flags.directory {
                        state.kind = FileType::Directory;
                    }
                }
                Err(_) => {
                    state.release_device();
                    state.clear_data();
                }
            }
            result
        };

        let mut tables = self.tables.lock();
        match result {
            Ok(()) => {
                tables.fds.mark_ready(index);
                Ok(())
            }
            Err(err) => {
                tables.fds.retire(index);
                tables.fds.put(index);
                warn!(fd = index, error = %err, "backend open failed");
                Err(err)
            }
        }
    }

    /// Close a descriptor. A backend close failure leaves it open.
    ///
    /// The slot stops resolving before the backend runs, so of two racing
    /// closes only one reaches the backend.
    pub fn close(&self, fd: usize) -> DfsResult<()> {
        let file = self.fd_claim(fd)?;
        if let Err(err) = file.call(|ops, state| ops.close(state)) {
            self.tables.lock().fds.mark_ready(fd);
            warn!(fd, error = %err, "backend close failed");
            return Err(err);
        }
        {
            let mut state = file.state().lock();
            state.release_path();
            state.release_device();
            state.clear_data();
        }
        {
            let mut tables = self.tables.lock();
            tables.fds.retire(fd);
            tables.fds.put(fd);
        }
        debug!(fd, "close");
        Ok(())
    }

    /// Read from the current position. A backend error marks end of file.
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> DfsResult<usize> {
        let file = self.fd_get(fd)?;
        file.call(|ops, state| {
            let result = ops.read(state, buf);
            if result.is_err() {
                state.set_eof(true);
            }
            result
        })
    }

    pub fn write(&self, fd: usize, buf: &[u8]) -> DfsResult<usize> {
        let file = self.fd_get(fd)?;
        file.call(|ops, state| ops.write(state, buf))
    }

    /// Device or filesystem control. Not valid on directories.
    pub fn ioctl(&self, fd: usize, cmd: u32, arg: usize) -> DfsResult<usize> {
        let file = self.fd_get(fd)?;
        file.call(|ops, state| {
            if state.kind == FileType::Directory {
                return Err(DfsError::invalid("ioctl on a directory"));
            }
            ops.ioctl(state, cmd, arg)
        })
    }

    pub fn flush(&self, fd: usize) -> DfsResult<()> {
        let file = self.fd_get(fd)?;
        file.call(|ops, state| ops.flush(state))
    }

    /// Reposition. The target may not lie beyond the declared size; the
    /// cached position becomes whatever the backend reports.
    pub fn lseek(&self, fd: usize, offset: i64, whence: Whence) -> DfsResult<u64> {
        let file = self.fd_get(fd)?;
        file.call(|ops, state| {
            let base = match whence {
                Whence::Set => 0,
                Whence::Cur => state.pos,
                Whence::End => state.size,
            };
            let target = i64::try_from(base)
                .ok()
                .and_then(|base| base.checked_add(offset))
                .and_then(|t| u64::try_from(t).ok())
                .ok_or_else(|| DfsError::invalid(format!("seek to {offset} from {whence:?}")))?;
            if target > state.size {
                return Err(DfsError::invalid(format!(
                    "seek to {target} beyond size {}",
                    state.size
                )));
            }
            let pos = ops.lseek(state, target)?;
            state.pos = pos;
            Ok(pos)
        })
    }

    /// Next batch of directory entries; zero means the end.
    pub fn getdents(&self, fd: usize, entries: &mut [DirEntry]) -> DfsResult<usize> {
        let file = self.fd_get(fd)?;
        file.call(|ops, state| {
            if state.kind != FileType::Directory {
                return Err(DfsError::invalid("getdents on a non-directory"));
            }
            if entries.is_empty() {
                return Err(DfsError::invalid("empty entry buffer"));
            }
            ops.getdents(state, entries)
        })
    }

    /// Readiness of `fd` for `events`. Error and hang-up are always
    /// reported; a dead descriptor reports `NVAL`, a backend without poll
    /// support is always ready.
    pub fn poll(&self, fd: usize, events: PollEvents) -> PollEvents {
        let Ok(file) = self.fd_get(fd) else {
            return PollEvents::NVAL;
        };
        let ready = match file.call(|ops, state| ops.poll(state, events)) {
            Ok(ready) => ready,
            Err(DfsError::NotSupported) => PollEvents::DEFAULT_MASK,
            Err(err) => {
                debug!(fd, error = %err, "poll failed");
                PollEvents::ERR
            }
        };
        ready & (events | PollEvents::ERR | PollEvents::HUP)
    }

    /// Metadata from the descriptor itself; the backend is not consulted.
    pub fn fstat(&self, fd: usize) -> DfsResult<Stat> {
        let file = self.fd_get(fd)?;
        let state = file.state().lock();
        let mut stat = if state.kind == FileType::Directory {
            Stat::directory()
        } else if state.device().is_some() {
            Stat::char_device()
        } else {
            Stat::file(0)
        };
        stat.size = state.size;
        Ok(stat)
    }

    /// Duplicate `fd` onto the lowest free index at or above `min`. The
    /// copy has its own position and does not take part in the
    /// already-open check, though it still keeps its file from being
    /// unlinked.
    pub fn dup(&self, fd: usize, min: usize) -> DfsResult<usize> {
        let src = self.fd_get(fd)?;
        let state = src.state().lock().clone();
        let file = Arc::new(OpenFile::new(Arc::clone(src.ops()), src.target().cloned(), state));
        let index = {
            let mut tables = self.tables.lock();
            let index = tables.fds.allocate(min, Arc::clone(&file), None)?;
            tables.fds.mark_ready(index);
            index
        };
        file.state().lock().retain_device();
        debug!(fd, new = index, "dup");
        Ok(index)
    }

    /// Duplicate `old` onto exactly `new`, closing whatever `new` held.
    pub fn dup2(&self, old: usize, new: usize) -> DfsResult<usize> {
        if new >= self.config.fd_max {
            return Err(DfsError::BadDescriptor(new));
        }
        let src = self.fd_get(old)?;
        if old == new {
            return Ok(new);
        }
        if self.tables.lock().fds.is_live(new) {
            self.close(new)?;
        }

        let state = src.state().lock().clone();
        let file = Arc::new(OpenFile::new(Arc::clone(src.ops()), src.target().cloned(), state));
        {
            let mut tables = self.tables.lock();
            tables.fds.allocate_at(new, Arc::clone(&file), None)?;
            tables.fds.mark_ready(new);
        }
        file.state().lock().retain_device();
        debug!(fd = old, new, "dup2");
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DfsConfig;
    use crate::backends::MemoryFs;
    use crate::ops::Addressing;

    fn vfs() -> Vfs {
        let vfs = Vfs::new(DfsConfig::default()).unwrap();
        vfs.mount_instance("/", Arc::new(MemoryFs::new()), Addressing::MountRelative)
            .unwrap();
        vfs
    }

    fn write_file(vfs: &Vfs, path: &str, data: &[u8]) {
        let fd = vfs.open(path, OpenFlags::create_truncate()).unwrap();
        assert_eq!(vfs.write(fd, data).unwrap(), data.len());
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_open_twice_is_busy() {
        let vfs = vfs();
        write_file(&vfs, "/a", b"x");

        let fd = vfs.open("/a", OpenFlags::read()).unwrap();
        assert!(matches!(vfs.open("/a", OpenFlags::read()), Err(DfsError::Busy(_))));
        assert!(matches!(vfs.open("/./a", OpenFlags::read()), Err(DfsError::Busy(_))));
        vfs.close(fd).unwrap();

        let again = vfs.open("/a", OpenFlags::read()).unwrap();
        assert_eq!(again, fd);
    }

    #[test]
    fn test_failed_open_rolls_back() {
        let vfs = vfs();
        assert!(matches!(
            vfs.open("/missing", OpenFlags::read()),
            Err(DfsError::NotFound(_))
        ));
        assert_eq!(vfs.open_count(), 0);
        // The key was released too.
        write_file(&vfs, "/missing", b"now here");
    }

    #[test]
    fn test_bad_flags_rejected_before_lookup() {
        let vfs = Vfs::new(DfsConfig::default()).unwrap();
        let flags = OpenFlags {
            read: false,
            ..OpenFlags::read()
        };
        assert!(matches!(vfs.open("/a", flags), Err(DfsError::InvalidArgument(_))));
        assert!(matches!(
            vfs.open("/a", OpenFlags::read()),
            Err(DfsError::NoMountPoint(_))
        ));
    }

    #[test]
    fn test_closed_descriptor_is_bad() {
        let vfs = vfs();
        write_file(&vfs, "/a", b"abc");
        let fd = vfs.open("/a", OpenFlags::read()).unwrap();
        vfs.close(fd).unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(vfs.read(fd, &mut buf), Err(DfsError::BadDescriptor(_))));
        assert!(matches!(vfs.close(fd), Err(DfsError::BadDescriptor(_))));
        assert!(matches!(vfs.fstat(fd), Err(DfsError::BadDescriptor(_))));
    }

    #[test]
    fn test_read_write_seek() {
        let vfs = vfs();
        write_file(&vfs, "/a", b"hello world");

        let fd = vfs.open("/a", OpenFlags::read()).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(vfs.read(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        assert_eq!(vfs.lseek(fd, 1, Whence::Cur).unwrap(), 6);
        assert_eq!(vfs.read(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");

        assert_eq!(vfs.lseek(fd, -5, Whence::End).unwrap(), 6);
        assert_eq!(vfs.lseek(fd, 0, Whence::Set).unwrap(), 0);
        assert!(matches!(
            vfs.lseek(fd, 12, Whence::Set),
            Err(DfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            vfs.lseek(fd, -1, Whence::Set),
            Err(DfsError::InvalidArgument(_))
        ));
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_read_error_marks_eof() {
        let vfs = vfs();
        write_file(&vfs, "/w", b"data");
        let fd = vfs.open("/w", OpenFlags::write_only()).unwrap();
        let mut buf = [0u8; 4];
        assert!(vfs.read(fd, &mut buf).is_err());

        let file = vfs.fd_get(fd).unwrap();
        assert!(file.state().lock().is_eof());
        drop(file);
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_ioctl_on_directory() {
        let vfs = Vfs::new(DfsConfig::default()).unwrap();
        vfs.mount_instance("/", Arc::new(MemoryFs::with_dirs(["d"])), Addressing::MountRelative)
            .unwrap();
        let fd = vfs.open("/d", OpenFlags::directory()).unwrap();
        assert!(matches!(vfs.ioctl(fd, 1, 0), Err(DfsError::InvalidArgument(_))));
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_getdents_requires_directory() {
        let vfs = Vfs::new(DfsConfig::default()).unwrap();
        vfs.mount_instance("/", Arc::new(MemoryFs::with_dirs(["d"])), Addressing::MountRelative)
            .unwrap();
        write_file(&vfs, "/d/one", b"1");
        write_file(&vfs, "/f", b"1");

        let f = vfs.open("/f", OpenFlags::read()).unwrap();
        let mut entries = vec![DirEntry::default(); 4];
        assert!(matches!(
            vfs.getdents(f, &mut entries),
            Err(DfsError::InvalidArgument(_))
        ));

        let d = vfs.open("/d", OpenFlags::directory()).unwrap();
        assert!(vfs.fstat(d).unwrap().is_dir());
        assert!(vfs.getdents(d, &mut []).is_err());
        assert_eq!(vfs.getdents(d, &mut entries).unwrap(), 1);
        assert_eq!(entries[0], DirEntry::file("one"));
        assert_eq!(vfs.getdents(d, &mut entries).unwrap(), 0);
    }

    #[test]
    fn test_dup_shares_nothing_but_state() {
        let vfs = vfs();
        write_file(&vfs, "/a", b"abcdef");
        let fd = vfs.open("/a", OpenFlags::read()).unwrap();
        let mut buf = [0u8; 2];
        vfs.read(fd, &mut buf).unwrap();

        let copy = vfs.dup(fd, 3).unwrap();
        assert!(copy >= 3);
        vfs.read(copy, &mut buf).unwrap();
        assert_eq!(&buf, b"cd");
        vfs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"cd");

        vfs.close(fd).unwrap();
        vfs.read(copy, &mut buf).unwrap();
        assert_eq!(&buf, b"ef");
        vfs.close(copy).unwrap();
        assert_eq!(vfs.open_count(), 0);
    }

    #[test]
    fn test_dup2_replaces_target() {
        let vfs = vfs();
        write_file(&vfs, "/a", b"aaaa");
        write_file(&vfs, "/b", b"bbbb");
        let a = vfs.open("/a", OpenFlags::read()).unwrap();
        let b = vfs.open("/b", OpenFlags::read()).unwrap();

        assert_eq!(vfs.dup2(a, b).unwrap(), b);
        let mut buf = [0u8; 1];
        vfs.read(b, &mut buf).unwrap();
        assert_eq!(&buf, b"a");

        // /b was closed by dup2, so it can be opened again.
        let again = vfs.open("/b", OpenFlags::read()).unwrap();
        vfs.close(again).unwrap();

        assert_eq!(vfs.dup2(a, a).unwrap(), a);
        assert!(matches!(vfs.dup2(a, 1000), Err(DfsError::BadDescriptor(1000))));
        assert!(matches!(vfs.dup2(99, 2), Err(DfsError::BadDescriptor(99))));
    }

    #[test]
    fn test_poll() {
        let vfs = vfs();
        write_file(&vfs, "/a", b"x");
        let fd = vfs.open("/a", OpenFlags::read()).unwrap();
        assert_eq!(vfs.poll(fd, PollEvents::IN), PollEvents::IN);
        vfs.close(fd).unwrap();
        assert_eq!(vfs.poll(fd, PollEvents::IN), PollEvents::NVAL);
    }

    #[test]
    fn test_fstat_size() {
        let vfs = vfs();
        write_file(&vfs, "/a", b"12345");
        let fd = vfs.open("/a", OpenFlags::read()).unwrap();
        let stat = vfs.fstat(fd).unwrap();
        assert!(stat.is_file());
        assert_eq!(stat.size, 5);
    }
}
