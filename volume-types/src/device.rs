// SPDX-License-Identifier: GPL-3.0-only

//! Block device data models
//!
//! A `BlockDeviceSet` is built fresh by every enumeration and handed to the
//! caller; nothing in this crate caches it.

use serde::{Deserialize, Serialize};

use crate::btrfs::BTRFS_CONTENT_TYPE;

/// One storage device discovered through the device-tag cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlockDevice {
    /// Device node (e.g., "/dev/sda1"), never empty
    pub device_path: String,

    /// Value of the `UUID` tag, if the device carries one
    pub uuid: Option<String>,

    /// Value of the `TYPE` tag (e.g., "btrfs", "ext4", "swap")
    pub content_type: Option<String>,
}

impl BlockDevice {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            uuid: None,
            content_type: None,
        }
    }

    /// Whether the content signature is a btrfs filesystem.
    pub fn is_btrfs(&self) -> bool {
        self.content_type.as_deref() == Some(BTRFS_CONTENT_TYPE)
    }
}

/// Ordered result of one device enumeration
///
/// Order is the cache iteration order, which may change between calls when
/// devices come and go.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BlockDeviceSet {
    devices: Vec<BlockDevice>,
}

impl BlockDeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, device: BlockDevice) {
        self.devices.push(device);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BlockDevice> {
        self.devices.iter()
    }

    pub fn as_slice(&self) -> &[BlockDevice] {
        &self.devices
    }

    pub fn into_vec(self) -> Vec<BlockDevice> {
        self.devices
    }

    /// Look up a device by its node path.
    pub fn find_by_path(&self, device_path: &str) -> Option<&BlockDevice> {
        self.devices
            .iter()
            .find(|device| device.device_path == device_path)
    }

    /// All devices carrying `uuid`. Multi-device btrfs filesystems share one
    /// filesystem UUID across every member.
    pub fn find_by_uuid(&self, uuid: &str) -> Vec<&BlockDevice> {
        self.devices
            .iter()
            .filter(|device| device.uuid.as_deref() == Some(uuid))
            .collect()
    }

    /// Devices whose content signature was recognized.
    pub fn with_content_type(&self) -> BlockDeviceSet {
        self.devices
            .iter()
            .filter(|device| device.content_type.is_some())
            .cloned()
            .collect()
    }
}

impl FromIterator<BlockDevice> for BlockDeviceSet {
    fn from_iter<I: IntoIterator<Item = BlockDevice>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for BlockDeviceSet {
    type Item = BlockDevice;
    type IntoIter = std::vec::IntoIter<BlockDevice>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

impl<'a> IntoIterator for &'a BlockDeviceSet {
    type Item = &'a BlockDevice;
    type IntoIter = std::slice::Iter<'a, BlockDevice>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}
