// SPDX-License-Identifier: GPL-3.0-only

//! Thread-safe indexes over the most recent device and mount scans.
//!
//! Both indexes start empty and stay valid at all times: a rescan builds its
//! tables outside the lock and swaps them in, and a failed rescan leaves the
//! previous contents untouched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, warn};
use volume_types::{BlockDevice, BlockDeviceSet, MountPoint};

use crate::Result;
use crate::enumerate::{CacheSource, DeviceEnumerator};
use crate::error::EnumerationError;
use crate::mounts::probe_mount_points;

#[derive(Debug, Default)]
struct DeviceTables {
    devices: BlockDeviceSet,
    by_path: HashMap<String, usize>,
    by_uuid: HashMap<String, Vec<usize>>,
}

impl DeviceTables {
    fn build(devices: BlockDeviceSet) -> Self {
        let mut by_path = HashMap::new();
        let mut by_uuid: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, device) in devices.iter().enumerate() {
            by_path.insert(device.device_path.clone(), index);
            if let Some(uuid) = &device.uuid {
                by_uuid.entry(uuid.clone()).or_default().push(index);
            }
        }

        Self {
            devices,
            by_path,
            by_uuid,
        }
    }
}

/// Block devices from the last successful enumeration
#[derive(Debug, Default)]
pub struct BlockDeviceIndex {
    tables: RwLock<DeviceTables>,
}

impl BlockDeviceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-enumerate devices and replace the index contents.
    ///
    /// Returns the number of indexed devices.
    pub fn rescan<S: CacheSource>(
        &self,
        enumerator: &DeviceEnumerator<S>,
    ) -> std::result::Result<usize, EnumerationError> {
        let devices = enumerator.enumerate()?;
        let count = devices.len();
        self.replace(devices);
        Ok(count)
    }

    pub fn replace(&self, devices: BlockDeviceSet) {
        let tables = DeviceTables::build(devices);
        *self.tables.write().unwrap_or_else(PoisonError::into_inner) = tables;
    }

    /// Look up a device by kernel identifier (e.g. "/dev/sda1").
    pub fn find_by_path(&self, device_path: &str) -> Option<BlockDevice> {
        let tables = self.read();
        tables
            .by_path
            .get(device_path)
            .map(|&index| tables.devices.as_slice()[index].clone())
    }

    pub fn find_by_uuid(&self, uuid: &str) -> Vec<BlockDevice> {
        let tables = self.read();
        tables
            .by_uuid
            .get(uuid)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&index| tables.devices.as_slice()[index].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all(&self) -> BlockDeviceSet {
        self.read().devices.clone()
    }

    /// Devices whose content type was recognized.
    pub fn recognized(&self) -> BlockDeviceSet {
        self.read().devices.with_content_type()
    }

    fn read(&self) -> RwLockReadGuard<'_, DeviceTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct MountTables {
    mounts: Vec<MountPoint>,
    by_identifier: HashMap<String, Vec<usize>>,
    root_mounts: HashMap<String, usize>,
}

/// Mount points from the last successful mount table scan
#[derive(Debug, Default)]
pub struct MountPointIndex {
    tables: RwLock<MountTables>,
}

impl MountPointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the mount table and replace the index contents.
    ///
    /// Mounts located directly inside `root_mounts_dir` are recorded as btrfs
    /// root mounts, keyed by the UUID of their device in `devices`.
    pub fn rescan(
        &self,
        mounts_file: &Path,
        devices: &BlockDeviceIndex,
        root_mounts_dir: &Path,
    ) -> Result<usize> {
        let mounts = probe_mount_points(mounts_file)?;
        let count = mounts.len();
        self.replace(mounts, devices, root_mounts_dir);
        Ok(count)
    }

    pub fn replace(
        &self,
        mounts: Vec<MountPoint>,
        devices: &BlockDeviceIndex,
        root_mounts_dir: &Path,
    ) {
        let mut by_identifier: HashMap<String, Vec<usize>> = HashMap::new();
        let mut root_mounts = HashMap::new();

        for (index, mount) in mounts.iter().enumerate() {
            by_identifier
                .entry(mount.identifier.clone())
                .or_default()
                .push(index);

            if Path::new(&mount.mount_path).parent() != Some(root_mounts_dir) {
                continue;
            }

            match devices
                .find_by_path(&mount.identifier)
                .and_then(|device| device.uuid)
            {
                Some(uuid) => {
                    debug!(uuid = %uuid, "found btrfs root mount at {}", mount.mount_path);
                    root_mounts.insert(uuid, index);
                }
                None => warn!(
                    "unable to find block device for mount point: {}",
                    mount.mount_path
                ),
            }
        }

        let tables = MountTables {
            mounts,
            by_identifier,
            root_mounts,
        };
        *self.tables.write().unwrap_or_else(PoisonError::into_inner) = tables;
    }

    /// All mounts of the given source (a device can be mounted several times).
    pub fn find_by_identifier(&self, identifier: &str) -> Vec<MountPoint> {
        let tables = self.read();
        tables
            .by_identifier
            .get(identifier)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&index| tables.mounts[index].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The root mount of the btrfs volume with `uuid`, if one is mounted.
    pub fn find_root_mount(&self, uuid: &str) -> Option<MountPoint> {
        let tables = self.read();
        tables
            .root_mounts
            .get(uuid)
            .map(|&index| tables.mounts[index].clone())
    }

    pub fn all(&self) -> Vec<MountPoint> {
        self.read().mounts.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, MountTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use crate::enumerate::CacheEntry;
    use crate::enumerate::tests::FakeSource;

    fn sample_source() -> FakeSource {
        FakeSource::with_devices(vec![
            CacheEntry::new("/dev/sda1")
                .with_tag("UUID", "efi")
                .with_tag("TYPE", "vfat"),
            CacheEntry::new("/dev/sdb")
                .with_tag("UUID", "pool")
                .with_tag("TYPE", "btrfs"),
            CacheEntry::new("/dev/sdc")
                .with_tag("UUID", "pool")
                .with_tag("TYPE", "btrfs"),
            CacheEntry::new("/dev/sdd"),
        ])
    }

    fn scanned_devices() -> BlockDeviceIndex {
        let index = BlockDeviceIndex::new();
        let count = index
            .rescan(&DeviceEnumerator::new(sample_source()))
            .expect("rescan");
        assert_eq!(count, 4);
        index
    }

    #[test]
    fn looks_up_devices_by_path_and_uuid() {
        let index = scanned_devices();

        assert_eq!(
            index.find_by_path("/dev/sda1").and_then(|d| d.uuid),
            Some("efi".to_string())
        );
        assert!(index.find_by_path("/dev/sdz").is_none());
        assert_eq!(index.find_by_uuid("pool").len(), 2);
        assert_eq!(index.recognized().len(), 3);
    }

    #[test]
    fn failed_rescan_keeps_previous_contents() {
        let index = scanned_devices();
        let broken = FakeSource {
            unavailable: true,
            ..FakeSource::default()
        };

        assert!(index.rescan(&DeviceEnumerator::new(broken)).is_err());
        assert_eq!(index.all().len(), 4);
    }

    #[test]
    fn records_root_mounts_by_volume_uuid() {
        let devices = scanned_devices();
        let mut table = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            table,
            "/dev/sda1 /boot/efi vfat rw 0 0\n\
             /dev/sdb /srv/roots/pool btrfs rw,subvolid=5 0 0\n\
             /dev/sdb /home btrfs rw,subvolid=256 0 0\n\
             /dev/sdx /srv/roots/ghost btrfs rw 0 0\n"
        )
        .expect("write mounts");

        let mounts = MountPointIndex::new();
        let count = mounts
            .rescan(table.path(), &devices, &PathBuf::from("/srv/roots"))
            .expect("rescan");

        assert_eq!(count, 4);
        assert_eq!(mounts.find_by_identifier("/dev/sdb").len(), 2);
        assert_eq!(
            mounts.find_root_mount("pool").map(|m| m.mount_path),
            Some("/srv/roots/pool".to_string())
        );
        assert!(mounts.find_root_mount("ghost").is_none());
    }

    #[test]
    fn missing_mount_table_keeps_previous_contents() {
        let devices = scanned_devices();
        let mounts = MountPointIndex::new();
        mounts.replace(
            vec![MountPoint {
                identifier: "/dev/sda1".to_string(),
                mount_path: "/boot/efi".to_string(),
                mount_type: "vfat".to_string(),
                mount_options: "rw".to_string(),
                dump_frequency: 0,
                fsck_pass_no: 2,
            }],
            &devices,
            Path::new("/srv/roots"),
        );

        let dir = tempfile::tempdir().expect("tempdir");
        assert!(
            mounts
                .rescan(&dir.path().join("mounts"), &devices, Path::new("/srv/roots"))
                .is_err()
        );
        assert_eq!(mounts.all().len(), 1);
    }
}
