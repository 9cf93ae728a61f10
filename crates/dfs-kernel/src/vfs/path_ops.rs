//! Path-based calls: stat, rename, unlink, statfs.

use std::sync::Arc;

use dfs_types::{DfsError, DfsResult, Stat, StatFs};
use tracing::{debug, warn};

use super::Vfs;
use crate::fd::OpenKey;
use crate::ops::FileSystem;

impl Vfs {
    /// Resolve `canonical` to its filesystem and the path that filesystem expects.
    fn resolve(&self, canonical: &str) -> DfsResult<(Arc<dyn FileSystem>, String)> {
        let tables = self.tables.lock();
        let entry = tables.mounts.lookup(canonical)?;
        Ok((Arc::clone(entry.fs()), entry.translate(canonical)))
    }

    /// Metadata for `path`. `/` and mount points are always directories.
    pub fn stat(&self, path: &str) -> DfsResult<Stat> {
        let canonical = self.normalize(path)?;
        if canonical == "/" {
            return Ok(Stat::directory());
        }
        let (fs, translated) = {
            let tables = self.tables.lock();
            if tables.mounts.is_mount_point(&canonical) {
                return Ok(Stat::directory());
            }
            let entry = tables.mounts.lookup(&canonical)?;
            (Arc::clone(entry.fs()), entry.translate(&canonical))
        };
        fs.stat(&translated)
    }

    /// Rename within one filesystem.
    pub fn rename(&self, old: &str, new: &str) -> DfsResult<()> {
        let old = self.normalize(old)?;
        let new = self.normalize(new)?;
        let (fs, old_path, new_path) = {
            let tables = self.tables.lock();
            let from = tables.mounts.lookup(&old)?;
            let to = tables.mounts.lookup(&new)?;
            if from.id() != to.id() {
                warn!(%old, %new, "rename across filesystems");
                return Err(DfsError::CrossDevice);
            }
            (Arc::clone(from.fs()), from.translate(&old), to.translate(&new))
        };
        debug!(%old, %new, "rename");
        fs.rename(&old_path, &new_path)
    }

    /// Remove a file no descriptor refers to, `dup` copies included.
    pub fn unlink(&self, path: &str) -> DfsResult<()> {
        let canonical = self.normalize(path)?;
        let (fs, translated) = {
            let tables = self.tables.lock();
            let entry = tables.mounts.lookup(&canonical)?;
            let key = OpenKey {
                mount: entry.id(),
                path: entry.translate(&canonical),
            };
            if tables.fds.references(&key) {
                warn!(path = %canonical, "unlink refused, file is open");
                return Err(DfsError::busy(canonical));
            }
            (Arc::clone(entry.fs()), key.path)
        };
        debug!(path = %canonical, "unlink");
        fs.unlink(&translated)
    }

    /// Capacity of the filesystem holding `path`.
    pub fn statfs(&self, path: &str) -> DfsResult<StatFs> {
        let canonical = self.normalize(path)?;
        let (fs, _) = self.resolve(&canonical)?;
        fs.statfs()
    }
}

#[cfg(test)]
mod tests {
    use dfs_types::OpenFlags;

    use super::*;
    use crate::DfsConfig;
    use crate::backends::MemoryFs;
    use crate::ops::Addressing;

    fn vfs() -> Vfs {
        let vfs = Vfs::new(DfsConfig::default()).unwrap();
        vfs.mount_instance("/", Arc::new(MemoryFs::new()), Addressing::MountRelative)
            .unwrap();
        vfs.mount_instance("/data", Arc::new(MemoryFs::new()), Addressing::MountRelative)
            .unwrap();
        vfs
    }

    fn touch(vfs: &Vfs, path: &str) {
        let fd = vfs.open(path, OpenFlags::create()).unwrap();
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_stat_synthesized() {
        let vfs = Vfs::new(DfsConfig::default()).unwrap();
        assert!(vfs.stat("/").unwrap().is_dir());

        let vfs = self::vfs();
        let stat = vfs.stat("/data").unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.perm(), dfs_types::mode::RWX_ALL);
        assert!(vfs.stat("/data/../data/").unwrap().is_dir());
    }

    #[test]
    fn test_stat_delegates() {
        let vfs = vfs();
        touch(&vfs, "/data/f");
        assert!(vfs.stat("/data/f").unwrap().is_file());
        assert!(matches!(vfs.stat("/f"), Err(DfsError::NotFound(_))));
    }

    #[test]
    fn test_rename_same_mount() {
        let vfs = vfs();
        touch(&vfs, "/data/a");
        vfs.rename("/data/a", "/data/b").unwrap();
        assert!(vfs.stat("/data/a").is_err());
        assert!(vfs.stat("/data/b").is_ok());
    }

    #[test]
    fn test_rename_cross_device() {
        let vfs = vfs();
        touch(&vfs, "/data/a");
        assert!(matches!(
            vfs.rename("/data/a", "/a"),
            Err(DfsError::CrossDevice)
        ));
        assert!(vfs.stat("/data/a").is_ok());
    }

    #[test]
    fn test_unlink_busy_while_open() {
        let vfs = vfs();
        touch(&vfs, "/data/a");
        let fd = vfs.open("/data/a", OpenFlags::read()).unwrap();
        assert!(matches!(vfs.unlink("/data/a"), Err(DfsError::Busy(_))));
        vfs.close(fd).unwrap();
        vfs.unlink("/data/a").unwrap();
        assert!(vfs.stat("/data/a").is_err());
    }

    #[test]
    fn test_unlink_busy_while_copy_open() {
        let vfs = vfs();
        touch(&vfs, "/data/a");
        let fd = vfs.open("/data/a", OpenFlags::read()).unwrap();
        let copy = vfs.dup(fd, 0).unwrap();
        vfs.close(fd).unwrap();

        assert!(matches!(vfs.unlink("/data/a"), Err(DfsError::Busy(_))));
        let mut buf = [0u8; 1];
        assert_eq!(vfs.read(copy, &mut buf).unwrap(), 0);

        vfs.close(copy).unwrap();
        vfs.unlink("/data/a").unwrap();
    }

    #[test]
    fn test_unlink_busy_while_dup2_copy_open() {
        let vfs = vfs();
        touch(&vfs, "/data/a");
        let fd = vfs.open("/data/a", OpenFlags::read()).unwrap();
        vfs.dup2(fd, 7).unwrap();
        vfs.close(fd).unwrap();
        assert!(matches!(vfs.unlink("/data/a"), Err(DfsError::Busy(_))));
        vfs.close(7).unwrap();
        vfs.unlink("/data/a").unwrap();
    }

    #[test]
    fn test_unlink_ignores_other_mount() {
        let vfs = vfs();
        touch(&vfs, "/a");
        touch(&vfs, "/data/a");
        let fd = vfs.open("/a", OpenFlags::read()).unwrap();
        vfs.unlink("/data/a").unwrap();
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_statfs() {
        let vfs = vfs();
        let stat = vfs.statfs("/data").unwrap();
        assert!(stat.bsize > 0);
    }
}
