//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use dfs_kernel::backends::MemoryFs;
use dfs_kernel::{
    Addressing, DfsConfig, DfsResult, Descriptor, FileOps, FileSystem, Stat, Vfs,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. Honours `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A VFS with default limits and an empty in-memory root.
pub fn vfs_with_root() -> Vfs {
    init_tracing();
    let vfs = Vfs::new(DfsConfig::default()).expect("default config");
    vfs.mount_instance("/", Arc::new(MemoryFs::new()), Addressing::MountRelative)
        .expect("root mount");
    vfs
}

// ============================================================================
// Recording backend
// ============================================================================

/// Filesystem that accepts every path and logs what it was asked for, as
/// `"<op> <path>"` lines.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.log.lock().last().cloned()
    }

    fn record(&self, op: &str, path: &str) {
        self.log.lock().push(format!("{op} {path}"));
    }
}

impl FileOps for Recorder {
    fn open(&self, file: &mut Descriptor) -> DfsResult<()> {
        self.record("open", file.path());
        file.size = 16;
        Ok(())
    }

    fn close(&self, file: &mut Descriptor) -> DfsResult<()> {
        self.record("close", file.path());
        Ok(())
    }

    fn read(&self, file: &mut Descriptor, buf: &mut [u8]) -> DfsResult<usize> {
        let n = buf.len().min(file.size.saturating_sub(file.pos) as usize);
        buf[..n].fill(b'r');
        file.pos += n as u64;
        Ok(n)
    }

    fn lseek(&self, file: &mut Descriptor, offset: u64) -> DfsResult<u64> {
        // Clamp to an 8-byte boundary so callers can see the reported position win.
        file.pos = offset & !7;
        Ok(file.pos)
    }
}

impl FileSystem for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn file_ops(&self) -> Arc<dyn FileOps> {
        Arc::new(self.clone())
    }

    fn stat(&self, path: &str) -> DfsResult<Stat> {
        self.record("stat", path);
        Ok(Stat::file(16))
    }

    fn rename(&self, old: &str, new: &str) -> DfsResult<()> {
        self.record("rename", &format!("{old} -> {new}"));
        Ok(())
    }

    fn unlink(&self, path: &str) -> DfsResult<()> {
        self.record("unlink", path);
        Ok(())
    }
}
