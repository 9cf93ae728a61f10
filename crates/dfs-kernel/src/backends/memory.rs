//! In-memory filesystem backend.
//!
//! Used as a scratch or root filesystem and for testing. All data is
//! ephemeral.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dfs_types::{
    DfsError, DfsResult, DirEntry, FileType, MountFlags, PollEvents, Stat, StatFs,
};
use parking_lot::RwLock;

use crate::fd::Descriptor;
use crate::ops::{Addressing, FileOps, FileSystem, FileSystemType};

const BLOCK_SIZE: u32 = 512;

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mtime: u64 },
    Directory { mtime: u64 },
}

impl Entry {
    fn file() -> Self {
        Entry::File {
            data: Vec::new(),
            mtime: now(),
        }
    }

    fn directory() -> Self {
        Entry::Directory { mtime: now() }
    }

    fn kind(&self) -> FileType {
        match self {
            Entry::File { .. } => FileType::Regular,
            Entry::Directory { .. } => FileType::Directory,
        }
    }

    fn stat(&self) -> Stat {
        match self {
            Entry::File { data, mtime } => Stat {
                mtime: *mtime,
                ..Stat::file(data.len() as u64)
            },
            Entry::Directory { mtime } => Stat {
                mtime: *mtime,
                ..Stat::directory()
            },
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Map a backend path to a tree key: no leading slash, root is `""`.
/// Works for both mount-relative (`/`, `a/b`) and full (`/mnt/a/b`) paths.
fn key(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map_or("", |(parent, _)| parent))
}

#[derive(Debug)]
struct Tree {
    entries: RwLock<HashMap<String, Entry>>,
    read_only: bool,
}

impl Tree {
    fn new(read_only: bool) -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(String::new(), Entry::directory());
        Self {
            entries: RwLock::new(entries),
            read_only,
        }
    }

    fn check_writable(&self) -> DfsResult<()> {
        if self.read_only {
            return Err(DfsError::ReadOnly);
        }
        Ok(())
    }

    /// Ensure all parent directories of `key` exist.
    fn ensure_parents(entries: &mut HashMap<String, Entry>, key: &str) -> DfsResult<()> {
        let mut current = String::new();
        let Some(parent) = parent(key) else {
            return Ok(());
        };
        for component in parent.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            match entries.get(&current) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File { .. }) => return Err(DfsError::not_a_directory(current)),
                None => {
                    entries.insert(current.clone(), Entry::directory());
                }
            }
        }
        Ok(())
    }

    fn children(entries: &HashMap<String, Entry>, dir: &str) -> Vec<DirEntry> {
        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(k, _)| parent(k) == Some(dir))
            .map(|(k, e)| {
                let name = k.rsplit('/').next().unwrap_or(k.as_str());
                DirEntry::new(name, e.kind())
            })
            .collect();
        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }
}

impl FileOps for Tree {
    fn open(&self, file: &mut Descriptor) -> DfsResult<()> {
        let key = key(file.path());
        let flags = file.flags;
        if flags.modifies() {
            self.check_writable()?;
        }

        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(Entry::Directory { .. }) => {
                if !flags.directory {
                    return Err(DfsError::is_a_directory(key));
                }
                file.kind = FileType::Directory;
                file.size = 0;
                file.pos = 0;
            }
            Some(Entry::File { data, mtime }) => {
                if flags.directory {
                    return Err(DfsError::not_a_directory(key));
                }
                if flags.create && flags.exclusive {
                    return Err(DfsError::already_exists(key));
                }
                if flags.truncate {
                    data.clear();
                    *mtime = now();
                }
                file.kind = FileType::Regular;
                file.size = data.len() as u64;
                file.pos = if flags.append { file.size } else { 0 };
            }
            None if flags.create => {
                Self::ensure_parents(&mut entries, &key)?;
                entries.insert(key, Entry::file());
                file.kind = FileType::Regular;
                file.size = 0;
                file.pos = 0;
            }
            None => return Err(DfsError::not_found(key)),
        }
        Ok(())
    }

    fn read(&self, file: &mut Descriptor, buf: &mut [u8]) -> DfsResult<usize> {
        if !file.flags.read {
            return Err(DfsError::invalid("not open for reading"));
        }
        let key = key(file.path());
        let entries = self.entries.read();
        match entries.get(&key) {
            Some(Entry::File { data, .. }) => {
                let start = usize::try_from(file.pos).unwrap_or(usize::MAX).min(data.len());
                let end = start.saturating_add(buf.len()).min(data.len());
                let n = end - start;
                buf[..n].copy_from_slice(&data[start..end]);
                file.pos += n as u64;
                file.set_eof(end == data.len());
                Ok(n)
            }
            Some(Entry::Directory { .. }) => Err(DfsError::is_a_directory(key)),
            None => Err(DfsError::not_found(key)),
        }
    }

    fn write(&self, file: &mut Descriptor, buf: &[u8]) -> DfsResult<usize> {
        if !file.flags.write {
            return Err(DfsError::invalid("not open for writing"));
        }
        self.check_writable()?;
        let key = key(file.path());
        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(Entry::File { data, mtime }) => {
                let offset = if file.flags.append {
                    data.len()
                } else {
                    usize::try_from(file.pos).map_err(|_| DfsError::invalid("position"))?
                };
                let end = offset + buf.len();
                // Extend if necessary
                if end > data.len() {
                    data.try_reserve(end - data.len())
                        .map_err(|_| DfsError::OutOfMemory)?;
                    data.resize(end, 0);
                }
                data[offset..end].copy_from_slice(buf);
                *mtime = now();
                file.pos = end as u64;
                file.size = data.len() as u64;
                Ok(buf.len())
            }
            Some(Entry::Directory { .. }) => Err(DfsError::is_a_directory(key)),
            None => Err(DfsError::not_found(key)),
        }
    }

    fn flush(&self, _file: &mut Descriptor) -> DfsResult<()> {
        Ok(())
    }

    fn lseek(&self, file: &mut Descriptor, offset: u64) -> DfsResult<u64> {
        file.set_eof(false);
        Ok(offset)
    }

    fn getdents(&self, file: &mut Descriptor, out: &mut [DirEntry]) -> DfsResult<usize> {
        let key = key(file.path());
        let entries = self.entries.read();
        if !matches!(entries.get(&key), Some(Entry::Directory { .. })) {
            return Err(DfsError::not_a_directory(key));
        }
        let children = Self::children(&entries, &key);
        let start = usize::try_from(file.pos).unwrap_or(usize::MAX);
        let mut n = 0;
        for (slot, entry) in out.iter_mut().zip(children.into_iter().skip(start)) {
            *slot = entry;
            n += 1;
        }
        file.pos += n as u64;
        Ok(n)
    }

    fn poll(&self, _file: &mut Descriptor, _events: PollEvents) -> DfsResult<PollEvents> {
        Ok(PollEvents::DEFAULT_MASK)
    }
}

/// In-memory filesystem instance.
///
/// Thread-safe via an internal `RwLock`. All data is lost when dropped.
#[derive(Debug, Clone)]
pub struct MemoryFs {
    name: String,
    tree: Arc<Tree>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Create a new empty writable filesystem.
    pub fn new() -> Self {
        Self {
            name: "memfs".to_string(),
            tree: Arc::new(Tree::new(false)),
        }
    }

    /// Create an empty filesystem that refuses every modification.
    pub fn read_only() -> Self {
        Self {
            tree: Arc::new(Tree::new(true)),
            ..Self::new()
        }
    }

    /// Create a filesystem with the given directories (and their parents).
    pub fn with_dirs<I, S>(dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fs = Self::new();
        {
            let mut entries = fs.tree.entries.write();
            for dir in dirs {
                let key = key(dir.as_ref());
                // Parents of a fresh tree are always directories.
                let _ = Tree::ensure_parents(&mut entries, &key);
                entries.entry(key).or_insert_with(Entry::directory);
            }
        }
        fs
    }

    fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl FileSystem for MemoryFs {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_ops(&self) -> Arc<dyn FileOps> {
        Arc::clone(&self.tree) as Arc<dyn FileOps>
    }

    fn stat(&self, path: &str) -> DfsResult<Stat> {
        let key = key(path);
        self.tree
            .entries
            .read()
            .get(&key)
            .map(Entry::stat)
            .ok_or_else(|| DfsError::not_found(key))
    }

    fn rename(&self, old: &str, new: &str) -> DfsResult<()> {
        self.tree.check_writable()?;
        let from = key(old);
        let to = key(new);
        if from.is_empty() || to.is_empty() {
            return Err(DfsError::invalid("cannot rename root"));
        }

        let mut entries = self.tree.entries.write();
        let moving_dir = match entries.get(&from) {
            Some(entry) => matches!(entry, Entry::Directory { .. }),
            None => return Err(DfsError::not_found(from)),
        };
        if from == to {
            return Ok(());
        }
        if to.starts_with(&format!("{from}/")) {
            return Err(DfsError::invalid("cannot move a directory into itself"));
        }
        // An existing target is replaced only by the same kind, and a
        // directory only while empty.
        match entries.get(&to) {
            Some(Entry::Directory { .. }) if !moving_dir => {
                return Err(DfsError::is_a_directory(to));
            }
            Some(Entry::File { .. }) if moving_dir => {
                return Err(DfsError::not_a_directory(to));
            }
            Some(Entry::Directory { .. }) => {
                let prefix = format!("{to}/");
                if entries.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(DfsError::busy(to));
                }
            }
            _ => {}
        }
        Tree::ensure_parents(&mut entries, &to)?;

        let Some(entry) = entries.remove(&from) else {
            return Err(DfsError::not_found(from));
        };
        // If it's a directory, we need to rename all children too
        if matches!(entry, Entry::Directory { .. }) {
            let prefix = format!("{from}/");
            let children: Vec<String> = entries
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for child in children {
                if let Some(child_entry) = entries.remove(&child) {
                    let new_path = format!("{to}/{}", &child[prefix.len()..]);
                    entries.insert(new_path, child_entry);
                }
            }
        }
        // Replaces an empty directory or a file of the same kind.
        entries.insert(to, entry);
        Ok(())
    }

    fn unlink(&self, path: &str) -> DfsResult<()> {
        self.tree.check_writable()?;
        let key = key(path);
        if key.is_empty() {
            return Err(DfsError::invalid("cannot remove root"));
        }
        let mut entries = self.tree.entries.write();
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {
                let prefix = format!("{key}/");
                if entries.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(DfsError::busy(key));
                }
                entries.remove(&key);
                Ok(())
            }
            Some(Entry::File { .. }) => {
                entries.remove(&key);
                Ok(())
            }
            None => Err(DfsError::not_found(key)),
        }
    }

    /// Memory grows on demand, so nothing is reported free.
    fn statfs(&self) -> DfsResult<StatFs> {
        let used: u64 = self
            .tree
            .entries
            .read()
            .values()
            .map(|e| match e {
                Entry::File { data, .. } => data.len() as u64,
                Entry::Directory { .. } => 0,
            })
            .sum();
        Ok(StatFs {
            bsize: BLOCK_SIZE,
            blocks: used.div_ceil(u64::from(BLOCK_SIZE)),
            bfree: 0,
        })
    }
}

/// Driver producing empty [`MemoryFs`] instances.
#[derive(Debug, Clone)]
pub struct MemFsType {
    name: String,
    addressing: Addressing,
}

impl Default for MemFsType {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFsType {
    pub fn new() -> Self {
        Self::named("memfs")
    }

    /// Register under another name, e.g. `tmpfs`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addressing: Addressing::MountRelative,
        }
    }

    /// Ask for full paths instead of mount-relative ones.
    pub fn with_addressing(mut self, addressing: Addressing) -> Self {
        self.addressing = addressing;
        self
    }
}

impl FileSystemType for MemFsType {
    fn name(&self) -> &str {
        &self.name
    }

    fn addressing(&self) -> Addressing {
        self.addressing
    }

    fn mount(&self, flags: MountFlags, _data: Option<Arc<[u8]>>) -> DfsResult<Arc<dyn FileSystem>> {
        let fs = if flags.contains(MountFlags::READ_ONLY) {
            MemoryFs::read_only()
        } else {
            MemoryFs::new()
        };
        Ok(Arc::new(fs.with_name(&self.name)))
    }
}
