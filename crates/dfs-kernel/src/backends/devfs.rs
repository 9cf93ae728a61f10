//! Device filesystem.
//!
//! Exposes every device in a [`DeviceRegistry`] as a node directly under
//! the mount point, conventionally `/dev`. Opening a node binds the device
//! to the descriptor and hands each later call to the device's own
//! [`FileOps`].

use std::sync::Arc;

use dfs_types::{DfsError, DfsResult, DirEntry, FileType, MountFlags, PollEvents, Stat, mode};

use crate::device::{Device, DeviceClass, DeviceRegistry};
use crate::fd::Descriptor;
use crate::ops::{FileOps, FileSystem, FileSystemType};

fn device_name(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[derive(Debug)]
struct DevOps {
    registry: DeviceRegistry,
}

impl DevOps {
    fn bound(file: &Descriptor) -> DfsResult<Arc<Device>> {
        file.device()
            .cloned()
            .ok_or_else(|| DfsError::io(format!("{} has no device bound", file.path())))
    }
}

impl FileOps for DevOps {
    fn open(&self, file: &mut Descriptor) -> DfsResult<()> {
        let name = device_name(file.path()).to_owned();
        if name.is_empty() {
            if !file.flags.directory {
                return Err(DfsError::is_a_directory("/"));
            }
            file.kind = FileType::Directory;
            file.size = self.registry.len() as u64;
            file.pos = 0;
            return Ok(());
        }
        if file.flags.directory {
            return Err(DfsError::not_a_directory(name));
        }
        let device = self
            .registry
            .find(&name)
            .ok_or_else(|| DfsError::no_device(name))?;
        file.bind_device(Arc::clone(&device));
        device.ops().open(file)
    }

    fn close(&self, file: &mut Descriptor) -> DfsResult<()> {
        match file.device().cloned() {
            Some(device) => device.ops().close(file),
            None => Ok(()),
        }
    }

    fn ioctl(&self, file: &mut Descriptor, cmd: u32, arg: usize) -> DfsResult<usize> {
        Self::bound(file)?.ops().ioctl(file, cmd, arg)
    }

    fn read(&self, file: &mut Descriptor, buf: &mut [u8]) -> DfsResult<usize> {
        Self::bound(file)?.ops().read(file, buf)
    }

    fn write(&self, file: &mut Descriptor, buf: &[u8]) -> DfsResult<usize> {
        Self::bound(file)?.ops().write(file, buf)
    }

    fn flush(&self, file: &mut Descriptor) -> DfsResult<()> {
        Self::bound(file)?.ops().flush(file)
    }

    fn lseek(&self, file: &mut Descriptor, offset: u64) -> DfsResult<u64> {
        if file.kind == FileType::Directory {
            file.pos = offset;
            return Ok(offset);
        }
        Self::bound(file)?.ops().lseek(file, offset)
    }

    fn getdents(&self, file: &mut Descriptor, out: &mut [DirEntry]) -> DfsResult<usize> {
        if file.kind != FileType::Directory {
            return Err(DfsError::not_a_directory(file.path()));
        }
        let names = self.registry.names();
        let start = usize::try_from(file.pos).unwrap_or(usize::MAX);
        let mut filled = 0;
        for (slot, name) in out.iter_mut().zip(names.into_iter().skip(start)) {
            *slot = DirEntry::file(name);
            filled += 1;
        }
        file.pos += filled as u64;
        Ok(filled)
    }

    fn poll(&self, file: &mut Descriptor, events: PollEvents) -> DfsResult<PollEvents> {
        Self::bound(file)?.ops().poll(file, events)
    }
}

/// A mounted device filesystem.
#[derive(Debug, Clone)]
pub struct DevFs {
    ops: Arc<DevOps>,
}

impl DevFs {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            ops: Arc::new(DevOps { registry }),
        }
    }
}

impl FileSystem for DevFs {
    fn name(&self) -> &str {
        "devfs"
    }

    fn file_ops(&self) -> Arc<dyn FileOps> {
        Arc::clone(&self.ops) as Arc<dyn FileOps>
    }

    fn stat(&self, path: &str) -> DfsResult<Stat> {
        let name = device_name(path);
        if name.is_empty() {
            return Ok(Stat::directory());
        }
        let device = self
            .ops
            .registry
            .find(name)
            .ok_or_else(|| DfsError::not_found(name))?;
        let mut stat = Stat::char_device();
        if device.class() == DeviceClass::Block {
            stat.mode = mode::S_IFBLK | mode::RW_ALL;
        }
        Ok(stat)
    }
}

/// Driver producing [`DevFs`] instances over a shared registry.
#[derive(Debug, Clone)]
pub struct DevFsType {
    registry: DeviceRegistry,
}

impl DevFsType {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }
}

impl FileSystemType for DevFsType {
    fn name(&self) -> &str {
        "devfs"
    }

    fn mount(&self, _flags: MountFlags, _data: Option<Arc<[u8]>>) -> DfsResult<Arc<dyn FileSystem>> {
        Ok(Arc::new(DevFs::new(self.registry.clone())))
    }
}
