//! Device registry.
//!
//! Drivers register named devices; the device filesystem and device-only
//! opens find them by name. Each device carries the same [`FileOps`]
//! contract as a filesystem plus an open count.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dfs_types::{DfsError, DfsResult};
use parking_lot::RwLock;
use strum::Display;
use tracing::info;

use crate::ops::FileOps;

/// Device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceClass {
    /// Byte stream (serial, keyboard, ADC).
    Char,
    /// Sector addressed storage.
    Block,
    /// In-kernel pipe or FIFO.
    Pipe,
    /// Anything else.
    Misc,
}

/// A registered device.
pub struct Device {
    name: String,
    class: DeviceClass,
    ops: Arc<dyn FileOps>,
    ref_count: AtomicU32,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl Device {
    /// Create a device.
    pub fn new(name: impl Into<String>, class: DeviceClass, ops: Arc<dyn FileOps>) -> Self {
        Self {
            name: name.into(),
            class,
            ops,
            ref_count: AtomicU32::new(0),
        }
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device class.
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Driver operations.
    pub fn ops(&self) -> &Arc<dyn FileOps> {
        &self.ops
    }

    /// Number of descriptors currently bound to this device.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let _ = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Name-indexed set of devices. Clones share the same registry.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<Vec<Arc<Device>>>>,
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.names())
            .finish()
    }
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under its name.
    pub fn register(&self, device: Device) -> DfsResult<Arc<Device>> {
        if device.name.is_empty() || device.name.contains('/') {
            return Err(DfsError::invalid(format!("device name {:?}", device.name)));
        }
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.name == device.name) {
            return Err(DfsError::already_exists(device.name));
        }
        info!(name = %device.name, class = %device.class, "registered device");
        let device = Arc::new(device);
        devices.push(Arc::clone(&device));
        Ok(device)
    }

    /// Remove a device that nothing has open.
    pub fn unregister(&self, name: &str) -> DfsResult<()> {
        let mut devices = self.devices.write();
        let index = devices
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| DfsError::no_device(name))?;
        if devices[index].ref_count() > 0 {
            return Err(DfsError::busy(name));
        }
        devices.remove(index);
        Ok(())
    }

    /// Look a device up by name.
    pub fn find(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.read().iter().find(|d| d.name == name).cloned()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.devices.read().iter().map(|d| d.name.clone()).collect()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullOps;
    impl FileOps for NullOps {}

    fn null_device(name: &str) -> Device {
        Device::new(name, DeviceClass::Char, Arc::new(NullOps))
    }

    #[test]
    fn test_register_and_find() {
        let registry = DeviceRegistry::new();
        registry.register(null_device("uart0")).unwrap();
        registry.register(null_device("adc0")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["uart0", "adc0"]);
        assert_eq!(registry.find("adc0").unwrap().class(), DeviceClass::Char);
        assert!(registry.find("spi0").is_none());
    }

    #[test]
    fn test_duplicate_and_bad_names() {
        let registry = DeviceRegistry::new();
        registry.register(null_device("uart0")).unwrap();
        assert!(matches!(
            registry.register(null_device("uart0")),
            Err(DfsError::AlreadyExists(_))
        ));
        assert!(registry.register(null_device("")).is_err());
        assert!(registry.register(null_device("a/b")).is_err());
    }

    #[test]
    fn test_ref_count_saturates() {
        let device = null_device("led");
        device.release();
        assert_eq!(device.ref_count(), 0);
        device.acquire();
        device.acquire();
        device.release();
        assert_eq!(device.ref_count(), 1);
    }

    #[test]
    fn test_unregister_busy() {
        let registry = DeviceRegistry::new();
        let device = registry.register(null_device("uart0")).unwrap();
        device.acquire();
        assert!(matches!(registry.unregister("uart0"), Err(DfsError::Busy(_))));
        device.release();
        registry.unregister("uart0").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.unregister("uart0"), Err(DfsError::NoDevice(_))));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = DeviceRegistry::new();
        let clone = registry.clone();
        clone.register(null_device("rtc")).unwrap();
        assert!(registry.find("rtc").is_some());
    }
}
