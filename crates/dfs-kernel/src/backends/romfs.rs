//! Read-only archive filesystem.
//!
//! An image is one contiguous byte arena, little-endian throughout:
//!
//! | offset | field                                  |
//! |--------|----------------------------------------|
//! | 0      | magic `0x32534652`                     |
//! | 4      | volume id                              |
//! | 8      | root entry (32 bytes)                  |
//!
//! Every entry is `kind: u32, size: u32, data: u32, pos: u32, name: [u8; 16]`.
//! `kind` is 1 for a file and 2 for a directory. `size` is the byte length of
//! a file or the child count of a directory. `data` and `pos` are addresses
//! in the image's link-time address space: `pos` is where the entry itself
//! was placed and `data` where its payload (file bytes or child array) was,
//! so the payload sits at `entry_offset - pos + data` in the arena. An entry
//! with an unknown kind or a zero size is corrupt.
//!
//! Images come from flash or from [`RomfsBuilder`].

use std::sync::Arc;

use dfs_types::{DfsError, DfsResult, DirEntry, FileType, MountFlags, Stat, mode};

use crate::fd::Descriptor;
use crate::ops::{FileOps, FileSystem, FileSystemType};

pub const ROMFS_MAGIC: u32 = 0x3253_4652;

/// `ioctl` returning the arena offset of a file's bytes, for execute-in-place.
pub const XIP_GET_DATA_ADDRESS: u32 = 0x5846_4441;

const HEADER_LEN: usize = 8;
const ENTRY_LEN: usize = 32;
const NAME_LEN: usize = 16;

const KIND_FILE: u32 = 1;
const KIND_DIR: u32 = 2;

#[derive(Debug, Clone, Copy)]
struct RawEntry {
    offset: usize,
    kind: u32,
    size: u32,
    data: u32,
    pos: u32,
    name: [u8; NAME_LEN],
}

impl RawEntry {
    fn check(&self) -> DfsResult<()> {
        if (self.kind != KIND_FILE && self.kind != KIND_DIR) || self.size == 0 {
            return Err(DfsError::io(format!("corrupt entry at {:#x}", self.offset)));
        }
        Ok(())
    }

    fn is_dir(&self) -> bool {
        self.kind == KIND_DIR
    }

    fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..end]
    }

    /// Arena offset of the payload.
    fn payload(&self) -> DfsResult<usize> {
        let offset = self.offset as i64 - i64::from(self.pos) + i64::from(self.data);
        usize::try_from(offset)
            .map_err(|_| DfsError::io(format!("bad relocation at {:#x}", self.offset)))
    }

    fn stat(&self) -> Stat {
        let mut stat = Stat::file(u64::from(self.size));
        if self.is_dir() {
            stat.mode = mode::S_IFDIR | mode::RWX_ALL;
        }
        stat
    }
}

/// Arena offset of an entry, kept in the descriptor between calls.
#[derive(Debug, Clone, Copy)]
struct EntryRef(usize);

#[derive(Debug)]
struct Image {
    arena: Arc<[u8]>,
}

impl Image {
    fn u32_at(&self, offset: usize) -> DfsResult<u32> {
        offset
            .checked_add(4)
            .and_then(|end| self.arena.get(offset..end))
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| DfsError::io(format!("image truncated at {offset:#x}")))
    }

    fn entry(&self, offset: usize) -> DfsResult<RawEntry> {
        let name_at = offset + 16;
        let name = self
            .arena
            .get(name_at..name_at + NAME_LEN)
            .ok_or_else(|| DfsError::io(format!("image truncated at {offset:#x}")))?;
        let mut name_buf = [0u8; NAME_LEN];
        name_buf.copy_from_slice(name);
        Ok(RawEntry {
            offset,
            kind: self.u32_at(offset)?,
            size: self.u32_at(offset + 4)?,
            data: self.u32_at(offset + 8)?,
            pos: self.u32_at(offset + 12)?,
            name: name_buf,
        })
    }

    fn root(&self) -> DfsResult<RawEntry> {
        let root = self.entry(HEADER_LEN)?;
        root.check()?;
        Ok(root)
    }

    fn child(&self, dir: &RawEntry, index: usize) -> DfsResult<RawEntry> {
        let entry = self.entry(dir.payload()? + index * ENTRY_LEN)?;
        entry.check()?;
        Ok(entry)
    }

    fn lookup(&self, path: &str) -> DfsResult<RawEntry> {
        let mut current = self.root()?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_dir() {
                return Err(DfsError::not_found(path));
            }
            let mut found = None;
            for index in 0..current.size as usize {
                let child = self.child(&current, index)?;
                if child.name() == segment.as_bytes() {
                    found = Some(child);
                    break;
                }
            }
            current = found.ok_or_else(|| DfsError::not_found(path))?;
        }
        Ok(current)
    }

    fn bound_entry(&self, file: &Descriptor) -> DfsResult<RawEntry> {
        let EntryRef(offset) = *file
            .data::<EntryRef>()
            .ok_or_else(|| DfsError::io("descriptor has no entry"))?;
        let entry = self.entry(offset)?;
        entry.check()?;
        Ok(entry)
    }
}

impl FileOps for Image {
    fn open(&self, file: &mut Descriptor) -> DfsResult<()> {
        self.root()?;
        if file.flags.modifies() {
            return Err(DfsError::invalid("read-only filesystem"));
        }
        let entry = self.lookup(file.path())?;
        if entry.is_dir() != file.flags.directory {
            return Err(DfsError::not_found(file.path()));
        }
        file.set_data(EntryRef(entry.offset));
        file.kind = if entry.is_dir() {
            FileType::Directory
        } else {
            FileType::Regular
        };
        file.size = u64::from(entry.size);
        file.pos = 0;
        Ok(())
    }

    fn close(&self, file: &mut Descriptor) -> DfsResult<()> {
        file.clear_data();
        Ok(())
    }

    fn ioctl(&self, file: &mut Descriptor, cmd: u32, _arg: usize) -> DfsResult<usize> {
        if cmd != XIP_GET_DATA_ADDRESS {
            return Err(DfsError::NotSupported);
        }
        let entry = self.bound_entry(file)?;
        if entry.is_dir() {
            return Err(DfsError::is_a_directory(file.path()));
        }
        entry.payload()
    }

    fn read(&self, file: &mut Descriptor, buf: &mut [u8]) -> DfsResult<usize> {
        let entry = self.bound_entry(file)?;
        if entry.is_dir() {
            return Err(DfsError::is_a_directory(file.path()));
        }
        let size = u64::from(entry.size);
        let remaining = size.saturating_sub(file.pos);
        let length = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        if length > 0 {
            let start = entry.payload()? + file.pos as usize;
            let bytes = self
                .arena
                .get(start..start + length)
                .ok_or_else(|| DfsError::io(format!("file data truncated at {start:#x}")))?;
            buf[..length].copy_from_slice(bytes);
        }
        file.pos += length as u64;
        Ok(length)
    }

    fn lseek(&self, file: &mut Descriptor, offset: u64) -> DfsResult<u64> {
        if offset > file.size {
            return Err(DfsError::io(format!("seek to {offset} past {}", file.size)));
        }
        file.pos = offset;
        Ok(offset)
    }

    fn getdents(&self, file: &mut Descriptor, out: &mut [DirEntry]) -> DfsResult<usize> {
        let dir = self.bound_entry(file)?;
        if !dir.is_dir() {
            return Err(DfsError::not_a_directory(file.path()));
        }
        let mut filled = 0;
        while filled < out.len() && file.pos < u64::from(dir.size) {
            let child = self.child(&dir, file.pos as usize)?;
            let kind = if child.is_dir() {
                FileType::Directory
            } else {
                FileType::Regular
            };
            out[filled] = DirEntry::new(String::from_utf8_lossy(child.name()), kind);
            filled += 1;
            file.pos += 1;
        }
        Ok(filled)
    }
}

/// A mounted archive.
#[derive(Debug, Clone)]
pub struct RomFs {
    image: Arc<Image>,
}

impl RomFs {
    /// Validate the header of `arena` and wrap it.
    pub fn new(arena: Arc<[u8]>) -> DfsResult<Self> {
        let image = Image { arena };
        if image.u32_at(0).ok() != Some(ROMFS_MAGIC) {
            return Err(DfsError::NotBlockDevice);
        }
        Ok(Self {
            image: Arc::new(image),
        })
    }

    pub fn volume(&self) -> u32 {
        self.image.u32_at(4).unwrap_or(0)
    }
}

impl FileSystem for RomFs {
    fn name(&self) -> &str {
        "romfs"
    }

    fn file_ops(&self) -> Arc<dyn FileOps> {
        Arc::clone(&self.image) as Arc<dyn FileOps>
    }

    fn stat(&self, path: &str) -> DfsResult<Stat> {
        Ok(self.image.lookup(path)?.stat())
    }
}

/// Driver for archive images handed over as mount data.
#[derive(Debug, Clone, Copy, Default)]
pub struct RomfsType;

impl FileSystemType for RomfsType {
    fn name(&self) -> &str {
        "romfs"
    }

    fn mount(&self, _flags: MountFlags, data: Option<Arc<[u8]>>) -> DfsResult<Arc<dyn FileSystem>> {
        let arena = data.ok_or_else(|| DfsError::io("romfs needs an image"))?;
        Ok(Arc::new(RomFs::new(arena)?))
    }
}

#[derive(Debug, Clone)]
enum Payload {
    File(Vec<u8>),
    Dir(Vec<Node>),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    payload: Payload,
}

/// Assembles an archive image from an in-memory tree.
///
/// ```
/// use dfs_kernel::backends::RomfsBuilder;
///
/// let image = RomfsBuilder::new()
///     .file("etc/motd", b"hello\n")
///     .file("bin/app", vec![0x7f, b'E', b'L', b'F'])
///     .build()
///     .unwrap();
/// assert_eq!(&image[..4], &0x3253_4652u32.to_le_bytes());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RomfsBuilder {
    volume: u32,
    items: Vec<(String, Option<Vec<u8>>)>,
}

impl RomfsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(mut self, volume: u32) -> Self {
        self.volume = volume;
        self
    }

    /// Add a file; missing parent directories are implied.
    pub fn file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.items.push((path.to_owned(), Some(data.into())));
        self
    }

    /// Add a directory. It must end up with at least one child.
    pub fn dir(mut self, path: &str) -> Self {
        self.items.push((path.to_owned(), None));
        self
    }

    /// Lay out the image.
    pub fn build(&self) -> DfsResult<Arc<[u8]>> {
        let mut root = Vec::new();
        for (path, data) in &self.items {
            insert(&mut root, path, data.as_deref())?;
        }
        if root.is_empty() {
            return Err(DfsError::invalid("empty image"));
        }

        let mut buf = vec![0u8; HEADER_LEN + ENTRY_LEN];
        buf[0..4].copy_from_slice(&ROMFS_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.volume.to_le_bytes());
        let children = emit_children(&mut buf, &root)?;
        write_entry(&mut buf, HEADER_LEN, KIND_DIR, root.len(), children, "")?;
        Ok(buf.into())
    }
}

fn insert(nodes: &mut Vec<Node>, path: &str, data: Option<&[u8]>) -> DfsResult<()> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(DfsError::invalid(format!("bad archive path {path:?}")));
    };
    let mut level = nodes;
    for segment in parents {
        check_name(segment)?;
        let index = match level.iter().position(|n| n.name == *segment) {
            Some(index) => index,
            None => {
                level.push(Node {
                    name: (*segment).to_owned(),
                    payload: Payload::Dir(Vec::new()),
                });
                level.len() - 1
            }
        };
        level = match &mut level[index].payload {
            Payload::Dir(children) => children,
            Payload::File(_) => return Err(DfsError::not_a_directory(path)),
        };
    }

    check_name(last)?;
    let payload = match data {
        Some(bytes) if bytes.is_empty() => {
            return Err(DfsError::invalid(format!("empty file {path:?}")));
        }
        Some(bytes) => Payload::File(bytes.to_vec()),
        None => Payload::Dir(Vec::new()),
    };
    match level.iter().position(|n| n.name == *last) {
        Some(index) => match (&level[index].payload, &payload) {
            (Payload::Dir(_), Payload::Dir(_)) => Ok(()),
            _ => Err(DfsError::already_exists(path)),
        },
        None => {
            level.push(Node {
                name: (*last).to_owned(),
                payload,
            });
            Ok(())
        }
    }
}

fn check_name(name: &str) -> DfsResult<()> {
    if name.len() >= NAME_LEN {
        return Err(DfsError::NameTooLong);
    }
    if name == "." || name == ".." {
        return Err(DfsError::invalid(format!("reserved name {name:?}")));
    }
    Ok(())
}

fn align4(buf: &mut Vec<u8>) {
    let padded = buf.len().next_multiple_of(4);
    buf.resize(padded, 0);
}

fn offset_u32(value: usize) -> DfsResult<u32> {
    u32::try_from(value).map_err(|_| DfsError::invalid("image larger than 4 GiB"))
}

/// Write a child array and everything below it; returns the array offset.
fn emit_children(buf: &mut Vec<u8>, nodes: &[Node]) -> DfsResult<usize> {
    align4(buf);
    let array = buf.len();
    buf.resize(array + nodes.len() * ENTRY_LEN, 0);
    for (index, node) in nodes.iter().enumerate() {
        let (kind, size, data) = match &node.payload {
            Payload::File(bytes) => {
                align4(buf);
                let at = buf.len();
                buf.extend_from_slice(bytes);
                (KIND_FILE, bytes.len(), at)
            }
            Payload::Dir(children) if children.is_empty() => {
                return Err(DfsError::invalid(format!("empty directory {:?}", node.name)));
            }
            Payload::Dir(children) => (KIND_DIR, children.len(), emit_children(buf, children)?),
        };
        write_entry(buf, array + index * ENTRY_LEN, kind, size, data, &node.name)?;
    }
    Ok(array)
}

fn write_entry(
    buf: &mut [u8],
    at: usize,
    kind: u32,
    size: usize,
    data: usize,
    name: &str,
) -> DfsResult<()> {
    let fields = [kind, offset_u32(size)?, offset_u32(data)?, offset_u32(at)?];
    for (i, field) in fields.iter().enumerate() {
        buf[at + i * 4..at + i * 4 + 4].copy_from_slice(&field.to_le_bytes());
    }
    buf[at + 16..at + 16 + name.len()].copy_from_slice(name.as_bytes());
    Ok(())
}
