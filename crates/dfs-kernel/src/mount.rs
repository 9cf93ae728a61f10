//! Mount table with longest-prefix routing.
//!
//! Mount points are matched by longest prefix on a separator boundary. If
//! `/` and `/data` are both mounted, `/data/log.txt` routes to `/data` and
//! `/database` routes to `/`.

use std::fmt;
use std::sync::Arc;

use dfs_types::{DfsError, DfsResult};

use crate::ops::{Addressing, FileSystem};
use crate::path;

/// Identity of a mount, unique for the lifetime of its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountId(u64);

impl MountId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// One mounted filesystem instance.
pub struct MountEntry {
    id: MountId,
    path: String,
    fs: Arc<dyn FileSystem>,
    addressing: Addressing,
}

impl fmt::Debug for MountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountEntry")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("fs", &self.fs.name())
            .field("addressing", &self.addressing)
            .finish()
    }
}

impl MountEntry {
    pub fn id(&self) -> MountId {
        self.id
    }

    /// Canonical mount path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// The path this filesystem expects for `canonical`, which must lie
    /// under the mount.
    pub fn translate(&self, canonical: &str) -> String {
        match self.addressing {
            Addressing::FullPath => canonical.to_owned(),
            Addressing::MountRelative => path::subdir(&self.path, canonical)
                .unwrap_or("/")
                .to_owned(),
        }
    }
}

/// Bounded set of mounts.
#[derive(Debug)]
pub struct MountTable {
    entries: Vec<MountEntry>,
    capacity: usize,
    next_id: u64,
}

impl MountTable {
    /// Create an empty table holding at most `capacity` mounts.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    /// Mount `fs` at canonical `path`.
    pub fn register(
        &mut self,
        path: &str,
        fs: Arc<dyn FileSystem>,
        addressing: Addressing,
    ) -> DfsResult<MountId> {
        if self.entries.iter().any(|e| e.path == path) {
            return Err(DfsError::PathConflict(path.to_owned()));
        }
        if self.entries.len() >= self.capacity {
            return Err(DfsError::TableFull("mount table"));
        }
        let id = MountId(self.next_id);
        self.next_id += 1;
        self.entries.push(MountEntry {
            id,
            path: path.to_owned(),
            fs,
            addressing,
        });
        Ok(id)
    }

    /// Remove the mount at exactly `path`.
    pub fn unregister(&mut self, path: &str) -> DfsResult<MountEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.path == path)
            .ok_or_else(|| DfsError::no_mount_point(path))?;
        Ok(self.entries.remove(index))
    }

    /// Put back an entry taken out by [`unregister`](Self::unregister),
    /// keeping its id.
    pub fn reinstate(&mut self, entry: MountEntry) -> DfsResult<()> {
        if self.entries.iter().any(|e| e.path == entry.path) {
            return Err(DfsError::PathConflict(entry.path));
        }
        if self.entries.len() >= self.capacity {
            return Err(DfsError::TableFull("mount table"));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// The mount owning `canonical`. The matched prefix length is
    /// `entry.path().len()`.
    pub fn lookup(&self, canonical: &str) -> DfsResult<&MountEntry> {
        self.entries
            .iter()
            .filter(|e| path::is_under(&e.path, canonical))
            .max_by_key(|e| e.path.len())
            .ok_or_else(|| DfsError::no_mount_point(canonical))
    }

    /// The mount registered at exactly `path`.
    pub fn get(&self, path: &str) -> Option<&MountEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn is_mount_point(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MountEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
