//! The dispatcher.
//!
//! [`Vfs`] owns the mount table, the descriptor table, the filesystem
//! driver registry and the working directory. One mutex guards the tables;
//! it is held only while they are read or changed and never across a
//! backend call (`open`, `read`, `write`, `ioctl`, `unmount`, ...).
//! Descriptor state has its own lock, which is never taken while the
//! table lock is held. Backends work on a copy of that state, so calls on
//! one descriptor may block independently of each other.
//!
//! Descriptor calls live in `file.rs`, path calls in `path_ops.rs`.

mod file;
mod path_ops;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use dfs_types::{DfsError, DfsResult, MountFlags};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DfsConfig};
use crate::device::DeviceRegistry;
use crate::fd::{FdTable, OpenFile};
use crate::mount::MountTable;
use crate::ops::{Addressing, FileSystem, FileSystemType};
use crate::path;

struct Tables {
    mounts: MountTable,
    fds: FdTable,
    fs_types: Vec<Arc<dyn FileSystemType>>,
}

/// A VFS instance: one descriptor table, one mount table, one working
/// directory.
pub struct Vfs {
    config: DfsConfig,
    tables: Mutex<Tables>,
    cwd: RwLock<String>,
    devices: DeviceRegistry,
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("config", &self.config)
            .field("cwd", &*self.cwd.read())
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

/// A descriptor reference taken from the table, returned on drop.
pub(crate) struct FdGuard<'a> {
    vfs: &'a Vfs,
    index: usize,
    file: Arc<OpenFile>,
}

impl Deref for FdGuard<'_> {
    type Target = OpenFile;

    fn deref(&self) -> &OpenFile {
        &self.file
    }
}

impl Drop for FdGuard<'_> {
    fn drop(&mut self) {
        self.vfs.tables.lock().fds.put(self.index);
    }
}

impl Vfs {
    /// Build an empty VFS sized by `config`, with its own device registry.
    pub fn new(config: DfsConfig) -> Result<Self, ConfigError> {
        Self::with_devices(config, DeviceRegistry::new())
    }

    /// Build an empty VFS that resolves device opens through `devices`.
    pub fn with_devices(config: DfsConfig, devices: DeviceRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let tables = Tables {
            mounts: MountTable::new(config.mounts_max),
            fds: FdTable::new(config.fd_initial, config.fd_grow_step, config.fd_max),
            fs_types: Vec::with_capacity(config.fs_types_max),
        };
        Ok(Self {
            cwd: RwLock::new(config.working_directory.clone()),
            tables: Mutex::new(tables),
            devices,
            config,
        })
    }

    pub fn config(&self) -> &DfsConfig {
        &self.config
    }

    /// Registry consulted by device opens and the device filesystem.
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Canonicalize `path` against the working directory.
    pub fn normalize(&self, path: &str) -> DfsResult<String> {
        let canonical = {
            let cwd = self.cwd.read();
            path::normalize(&cwd, path)?
        };
        if canonical.len() > self.config.path_max {
            return Err(DfsError::NameTooLong);
        }
        Ok(canonical)
    }

    fn fd_get(&self, fd: usize) -> DfsResult<FdGuard<'_>> {
        let file = self.tables.lock().fds.get(fd)?;
        Ok(FdGuard {
            vfs: self,
            index: fd,
            file,
        })
    }

    /// Like `fd_get`, but the descriptor stops resolving for everyone else.
    fn fd_claim(&self, fd: usize) -> DfsResult<FdGuard<'_>> {
        let file = self.tables.lock().fds.begin_close(fd)?;
        Ok(FdGuard {
            vfs: self,
            index: fd,
            file,
        })
    }

    /// Descriptor slots currently allocated.
    pub fn fd_capacity(&self) -> usize {
        self.tables.lock().fds.capacity()
    }

    /// Descriptors currently live.
    pub fn open_count(&self) -> usize {
        self.tables.lock().fds.live()
    }

    /// Add a filesystem driver.
    pub fn register_filesystem(&self, fs_type: Arc<dyn FileSystemType>) -> DfsResult<()> {
        let mut tables = self.tables.lock();
        if tables.fs_types.iter().any(|t| t.name() == fs_type.name()) {
            return Err(DfsError::already_exists(fs_type.name()));
        }
        if tables.fs_types.len() >= self.config.fs_types_max {
            return Err(DfsError::TableFull("filesystem type registry"));
        }
        info!(name = %fs_type.name(), "registered filesystem type");
        tables.fs_types.push(fs_type);
        Ok(())
    }

    /// Names of registered drivers.
    pub fn filesystems(&self) -> Vec<String> {
        self.tables
            .lock()
            .fs_types
            .iter()
            .map(|t| t.name().to_owned())
            .collect()
    }

    /// Mount an instance of driver `fs_type` at `path`.
    pub fn mount(
        &self,
        path: &str,
        fs_type: &str,
        flags: MountFlags,
        data: Option<Arc<[u8]>>,
    ) -> DfsResult<()> {
        let canonical = self.normalize(path)?;
        let driver = {
            let tables = self.tables.lock();
            if tables.mounts.is_mount_point(&canonical) {
                return Err(DfsError::PathConflict(canonical));
            }
            if tables.mounts.len() >= self.config.mounts_max {
                return Err(DfsError::TableFull("mount table"));
            }
            tables
                .fs_types
                .iter()
                .find(|t| t.name() == fs_type)
                .cloned()
                .ok_or_else(|| DfsError::not_found(fs_type))?
        };

        let fs = driver.mount(flags, data)?;
        let result = self
            .tables
            .lock()
            .mounts
            .register(&canonical, Arc::clone(&fs), driver.addressing());
        match result {
            Ok(_) => {
                info!(path = %canonical, fs = %fs_type, ?flags, "mounted");
                Ok(())
            }
            Err(err) => {
                // Lost a race for the mount point; give the instance back.
                if let Err(unmount_err) = fs.unmount() {
                    warn!(path = %canonical, error = %unmount_err, "unmount after failed mount");
                }
                Err(err)
            }
        }
    }

    /// Mount an already constructed instance.
    pub fn mount_instance(
        &self,
        path: &str,
        fs: Arc<dyn FileSystem>,
        addressing: Addressing,
    ) -> DfsResult<()> {
        let canonical = self.normalize(path)?;
        let name = fs.name().to_owned();
        self.tables
            .lock()
            .mounts
            .register(&canonical, fs, addressing)?;
        info!(path = %canonical, fs = %name, ?addressing, "mounted");
        Ok(())
    }

    /// Remove the mount at exactly `path`. Fails while descriptors are open on it.
    pub fn unmount(&self, path: &str) -> DfsResult<()> {
        let canonical = self.normalize(path)?;
        let entry = {
            let mut tables = self.tables.lock();
            let id = tables
                .mounts
                .get(&canonical)
                .map(|e| e.id())
                .ok_or_else(|| DfsError::no_mount_point(canonical.as_str()))?;
            if tables.fds.mount_in_use(id) {
                warn!(path = %canonical, "unmount refused, descriptors open");
                return Err(DfsError::busy(canonical));
            }
            tables.mounts.unregister(&canonical)?
        };

        if let Err(err) = entry.fs().unmount() {
            warn!(path = %canonical, error = %err, "backend unmount failed, remounting");
            if let Err(restore_err) = self.tables.lock().mounts.reinstate(entry) {
                warn!(path = %canonical, error = %restore_err, "mount lost after failed unmount");
            }
            return Err(err);
        }
        info!(path = %canonical, "unmounted");
        Ok(())
    }

    /// `(mount path, filesystem name)` for every mount.
    pub fn mounts(&self) -> Vec<(String, String)> {
        self.tables
            .lock()
            .mounts
            .iter()
            .map(|e| (e.path().to_owned(), e.fs().name().to_owned()))
            .collect()
    }

    /// Change the working directory. The target must be a directory.
    pub fn chdir(&self, path: &str) -> DfsResult<()> {
        let canonical = self.normalize(path)?;
        let stat = self.stat(&canonical)?;
        if !stat.is_dir() {
            return Err(DfsError::not_a_directory(canonical));
        }
        debug!(cwd = %canonical, "chdir");
        *self.cwd.write() = canonical;
        Ok(())
    }

    pub fn getcwd(&self) -> String {
        self.cwd.read().clone()
    }
}
