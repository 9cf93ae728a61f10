//! Descriptor table.
//!
//! Descriptors are addressed by index. The table owns every slot; callers
//! get an `Arc<OpenFile>` through [`FdTable::get`], which bumps the slot's
//! reference count, and must hand it back with [`FdTable::put`]. A slot is
//! cleared when its count reaches zero and only then becomes reusable.
//!
//! Growth appends slots; indices already issued are never moved.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dfs_types::{DfsError, DfsResult, FileType, OpenFlags};
use parking_lot::Mutex;

use crate::device::Device;
use crate::mount::MountId;
use crate::ops::FileOps;

/// Sentinel carried by every live slot.
pub const FD_MAGIC: u32 = 0xfdfd;

/// Mutable state of one open file, handed to backends on every call.
#[derive(Clone)]
pub struct Descriptor {
    /// Flags the file was opened with.
    pub flags: OpenFlags,
    /// Logical type. Backends set it during `open`.
    pub kind: FileType,
    /// Declared size in bytes.
    pub size: u64,
    /// Current position. For directories this is the backend's cursor.
    pub pos: u64,
    path: String,
    eof: bool,
    is_open: bool,
    device: Option<Arc<Device>>,
    data: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .field("eof", &self.eof)
            .field("is_open", &self.is_open)
            .field("device", &self.device.as_ref().map(|d| d.name().to_owned()))
            .finish_non_exhaustive()
    }
}

impl Descriptor {
    /// Fresh, not yet opened state for `path`.
    pub fn new(path: impl Into<String>, flags: OpenFlags) -> Self {
        Self {
            flags,
            kind: FileType::Regular,
            size: 0,
            pos: 0,
            path: path.into(),
            eof: false,
            is_open: false,
            device: None,
            data: None,
        }
    }

    /// Path as the backend sees it (translated per its addressing mode).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn release_path(&mut self) {
        self.path = String::new();
    }

    /// Attach backend-private state.
    pub fn set_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.data = Some(Arc::new(data));
    }

    /// Backend-private state, if it has type `T`.
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|d| d.downcast_ref::<T>())
    }

    pub fn clear_data(&mut self) {
        self.data = None;
    }

    /// Bind a device; its open count is taken here.
    pub fn bind_device(&mut self, device: Arc<Device>) {
        device.acquire();
        if let Some(old) = self.device.replace(device) {
            old.release();
        }
    }

    pub fn device(&self) -> Option<&Arc<Device>> {
        self.device.as_ref()
    }

    /// Unbind the device and drop its open count.
    pub(crate) fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            device.release();
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn set_eof(&mut self, eof: bool) {
        self.eof = eof;
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub(crate) fn mark_open(&mut self) {
        self.is_open = true;
    }

    /// Count another opener on the bound device, for a duplicated descriptor.
    pub(crate) fn retain_device(&self) {
        if let Some(device) = &self.device {
            device.acquire();
        }
    }

    /// Fold in what a backend changed on `after`, a copy of `before`.
    /// Fields the backend left alone keep any update made meanwhile by
    /// another call on the same descriptor.
    fn absorb(&mut self, before: &Descriptor, after: Descriptor) {
        if after.flags != before.flags {
            self.flags = after.flags;
        }
        if after.kind != before.kind {
            self.kind = after.kind;
        }
        if after.size != before.size {
            self.size = after.size;
        }
        if after.pos != before.pos {
            self.pos = after.pos;
        }
        if after.eof != before.eof {
            self.eof = after.eof;
        }
        if !same_arc(&after.data, &before.data) {
            self.data = after.data;
        }
        // `bind_device` on the copy already moved the open counts.
        if !same_arc(&after.device, &before.device) {
            self.device = after.device;
        }
    }
}

fn same_arc<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// An open file: its immutable operation table and target plus locked state.
///
/// The state lock is held only to copy the state out or fold changes back
/// in. Backends run on a copy, see [`OpenFile::call`].
pub struct OpenFile {
    ops: Arc<dyn FileOps>,
    target: Option<OpenKey>,
    state: Mutex<Descriptor>,
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl OpenFile {
    pub(crate) fn new(ops: Arc<dyn FileOps>, target: Option<OpenKey>, state: Descriptor) -> Self {
        Self {
            ops,
            target,
            state: Mutex::new(state),
        }
    }

    pub fn ops(&self) -> &Arc<dyn FileOps> {
        &self.ops
    }

    /// Owning mount; `None` for device-only opens.
    pub fn mount(&self) -> Option<MountId> {
        self.target.as_ref().map(|t| t.mount)
    }

    /// Mount and translated path this file was opened through. Copies made
    /// by `dup` share it.
    pub(crate) fn target(&self) -> Option<&OpenKey> {
        self.target.as_ref()
    }

    pub fn state(&self) -> &Mutex<Descriptor> {
        &self.state
    }

    /// Run `op` against a copy of the state without holding the state
    /// lock, then fold back what it changed. A backend blocked in one call
    /// does not hold up another call on the same descriptor.
    pub(crate) fn call<R>(&self, op: impl FnOnce(&dyn FileOps, &mut Descriptor) -> R) -> R {
        let before = self.state.lock().clone();
        let mut working = before.clone();
        let result = op(self.ops.as_ref(), &mut working);
        self.state.lock().absorb(&before, working);
        result
    }
}

/// Identity used for the duplicate-open check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenKey {
    pub mount: MountId,
    pub path: String,
}

#[derive(Debug)]
struct Slot {
    magic: u32,
    ref_count: u32,
    ready: bool,
    file: Arc<OpenFile>,
    key: Option<OpenKey>,
}

/// Bounded, growable table of descriptor slots.
#[derive(Debug)]
pub struct FdTable {
    slots: Vec<Option<Slot>>,
    grow_step: usize,
    max: usize,
}

impl FdTable {
    /// Table with `initial` slots that grows by `grow_step` up to `max`.
    pub fn new(initial: usize, grow_step: usize, max: usize) -> Self {
        let initial = initial.min(max);
        let mut slots = Vec::with_capacity(initial);
        slots.resize_with(initial, || None);
        Self {
            slots,
            grow_step: grow_step.max(1),
            max,
        }
    }

    /// Current number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots holding a descriptor.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Install `file` in the first free slot at or above `min`, growing the
    /// table if needed. The slot starts with one reference and is not
    /// reachable through [`get`](Self::get) until [`mark_ready`](Self::mark_ready).
    pub(crate) fn allocate(
        &mut self,
        min: usize,
        file: Arc<OpenFile>,
        key: Option<OpenKey>,
    ) -> DfsResult<usize> {
        let index = self.find_free(min)?;
        self.slots[index] = Some(Slot {
            magic: FD_MAGIC,
            ref_count: 1,
            ready: false,
            file,
            key,
        });
        Ok(index)
    }

    /// Like [`allocate`](Self::allocate) but for exactly `index`, which must be free.
    pub(crate) fn allocate_at(
        &mut self,
        index: usize,
        file: Arc<OpenFile>,
        key: Option<OpenKey>,
    ) -> DfsResult<()> {
        match self.find_free(index)? {
            found if found == index => {
                self.slots[index] = Some(Slot {
                    magic: FD_MAGIC,
                    ref_count: 1,
                    ready: false,
                    file,
                    key,
                });
                Ok(())
            }
            _ => Err(DfsError::busy(format!("descriptor {index}"))),
        }
    }

    fn find_free(&mut self, min: usize) -> DfsResult<usize> {
        if min >= self.max {
            return Err(DfsError::TableFull("descriptor table"));
        }
        if let Some(index) = self
            .slots
            .iter()
            .enumerate()
            .skip(min)
            .find_map(|(i, s)| match s {
                None => Some(i),
                Some(slot) if slot.ref_count == 0 => Some(i),
                Some(_) => None,
            })
        {
            return Ok(index);
        }

        let len = self.slots.len();
        if len >= self.max {
            return Err(DfsError::TableFull("descriptor table"));
        }
        let target = (len + self.grow_step).max(min + 1).min(self.max);
        self.slots
            .try_reserve_exact(target - len)
            .map_err(|_| DfsError::OutOfMemory)?;
        self.slots.resize_with(target, || None);
        Ok(len.max(min))
    }

    /// Make a freshly allocated slot addressable.
    pub(crate) fn mark_ready(&mut self, index: usize) {
        if let Some(Some(slot)) = self.slots.get_mut(index) {
            slot.ready = true;
        }
    }

    /// Look up a live descriptor and take a reference on it.
    pub fn get(&mut self, index: usize) -> DfsResult<Arc<OpenFile>> {
        match self.slots.get_mut(index) {
            Some(Some(slot)) if slot.magic == FD_MAGIC && slot.ready => {
                slot.ref_count += 1;
                Ok(Arc::clone(&slot.file))
            }
            _ => Err(DfsError::BadDescriptor(index)),
        }
    }

    /// Drop one reference; the slot is cleared when none remain.
    pub fn put(&mut self, index: usize) {
        let Some(entry) = self.slots.get_mut(index) else {
            return;
        };
        let Some(slot) = entry.as_mut() else {
            return;
        };
        if slot.magic != FD_MAGIC {
            return;
        }
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count == 0 {
            *entry = None;
        }
    }

    /// Force-clear a slot whose reference count is already zero.
    pub fn free(&mut self, index: usize) -> bool {
        let Some(entry) = self.slots.get_mut(index) else {
            return false;
        };
        if entry.as_ref().is_some_and(|s| s.ref_count == 0) {
            *entry = None;
            true
        } else {
            false
        }
    }

    /// Take a reference on a live descriptor and hide it from further
    /// lookups while it is being closed. The open identity stays until
    /// [`retire`](Self::retire); [`mark_ready`](Self::mark_ready) undoes this.
    pub(crate) fn begin_close(&mut self, index: usize) -> DfsResult<Arc<OpenFile>> {
        let file = self.get(index)?;
        if let Some(Some(slot)) = self.slots.get_mut(index) {
            slot.ready = false;
        }
        Ok(file)
    }

    /// Stop new lookups and drop the open identity. Outstanding references
    /// keep the slot until they are put.
    pub(crate) fn retire(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(Some(slot)) => {
                slot.ready = false;
                slot.key = None;
                true
            }
            _ => false,
        }
    }

    /// True if a descriptor opened `key` and has not been closed.
    pub(crate) fn is_open(&self, key: &OpenKey) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.key.as_ref() == Some(key))
    }

    /// True if any descriptor not yet closed, `dup` copies included, was
    /// opened through `key`.
    pub(crate) fn references(&self, key: &OpenKey) -> bool {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.ready || slot.key.is_some())
            .any(|slot| slot.file.target() == Some(key))
    }

    /// True if any descriptor belongs to `mount`.
    pub(crate) fn mount_in_use(&self, mount: MountId) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.file.mount() == Some(mount))
    }

    /// True if `index` names a slot that [`get`](Self::get) would accept.
    pub fn is_live(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(slot)) if slot.magic == FD_MAGIC && slot.ready)
    }
}
