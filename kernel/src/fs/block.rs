//! Block device contract
//!
//! The interface storage drivers expose to the core. The kernel never
//! parses on-disk formats itself; a filesystem module consumes a
//! registered device and mounts the result through the VFS.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::error::FsError;

pub trait BlockDevice: Send + Sync {
    /// Bytes per sector, a power of two.
    fn sector_size(&self) -> usize;

    fn sector_count(&self) -> u64;

    /// Read whole sectors starting at `lba` into `buf`; the buffer length
    /// must be a multiple of the sector size.
    fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), FsError>;

    fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), FsError>;
}

pub type BlockDeviceRef = Arc<dyn BlockDevice>;

/// Registered block devices, by driver-chosen name ("ahci0", "nvme0n1").
pub struct BlockDevices {
    devices: Mutex<BTreeMap<String, BlockDeviceRef>>,
}

impl BlockDevices {
    pub const fn new() -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, name: &str, device: BlockDeviceRef) -> Result<(), FsError> {
        let mut devices = self.devices.lock();
        if devices.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        log::info!(
            "block: registered {} ({} sectors of {} bytes)",
            name,
            device.sector_count(),
            device.sector_size()
        );
        devices.insert(String::from(name), device);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<BlockDeviceRef, FsError> {
        self.devices
            .lock()
            .get(name)
            .cloned()
            .ok_or(FsError::NotFound)
    }

    pub fn unregister(&self, name: &str) -> Result<(), FsError> {
        self.devices
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }
}

impl Default for BlockDevices {
    fn default() -> Self {
        Self::new()
    }
}
