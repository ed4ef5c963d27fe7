// SPDX-License-Identifier: GPL-3.0-only

//! Block device enumeration over a device-tag cache.
//!
//! The cache is acquired at the start of every call and dropped before the
//! call returns, whatever the outcome. Devices that fail verification are
//! omitted; only failing to acquire the cache is fatal.

use tracing::{Dispatch, debug, error, warn};
use volume_types::{BlockDevice, BlockDeviceSet};

use crate::blkid::BlkidSource;
use crate::config::Config;
use crate::error::{EnumerationError, Result};

pub const UUID_TAG: &str = "UUID";
pub const TYPE_TAG: &str = "TYPE";

/// A key/value tag attached to a cached device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

/// One device entry of the tag cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub devname: String,
    pub tags: Vec<Tag>,
}

impl CacheEntry {
    pub fn new(devname: impl Into<String>) -> Self {
        Self {
            devname: devname.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_tag(name, value);
        self
    }

    /// Insert a tag, replacing any previous value under the same name.
    pub fn set_tag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.tags.iter_mut().find(|tag| tag.name == name) {
            Some(tag) => tag.value = value,
            None => self.tags.push(Tag { name, value }),
        }
    }
}

/// An open handle on a device-tag cache.
///
/// Dropping the handle releases it.
pub trait DeviceTagCache {
    /// Probe every attached device so the cache reflects present hardware.
    fn probe_all(&mut self) -> Result<()>;

    /// Entries in cache iteration order.
    fn entries(&self) -> &[CacheEntry];

    /// Re-validate the device behind `entry`, returning the current entry or
    /// `None` when the device is gone or unreadable.
    fn verify(&self, entry: &CacheEntry) -> Option<CacheEntry>;
}

/// Something that can open a device-tag cache.
pub trait CacheSource {
    type Cache: DeviceTagCache;

    fn open(&self) -> std::result::Result<Self::Cache, EnumerationError>;
}

/// Enumerates block devices from a cache source.
///
/// Log events are emitted through the injected dispatch rather than any
/// process-wide hook, so callers decide where enumeration logs go.
pub struct DeviceEnumerator<S> {
    source: S,
    dispatch: Dispatch,
}

impl<S: CacheSource> DeviceEnumerator<S> {
    /// Create an enumerator logging to the dispatch current at construction.
    pub fn new(source: S) -> Self {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        Self { source, dispatch }
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn enumerate(&self) -> std::result::Result<BlockDeviceSet, EnumerationError> {
        tracing::dispatcher::with_default(&self.dispatch, || self.enumerate_scoped())
    }

    fn enumerate_scoped(&self) -> std::result::Result<BlockDeviceSet, EnumerationError> {
        let mut cache = self.source.open().inspect_err(|e| {
            error!("failed to acquire device tag cache: {e}");
        })?;

        if let Err(e) = cache.probe_all() {
            warn!("full device probe failed, using cached entries: {e}");
        }

        let mut devices = BlockDeviceSet::new();
        for entry in cache.entries() {
            let Some(verified) = cache.verify(entry) else {
                debug!(device = %entry.devname, "skipping device that failed verification");
                continue;
            };

            match block_device_from_entry(&verified) {
                Some(device) => devices.push(device),
                None => debug!("skipping verified cache entry without a device path"),
            }
        }

        debug!(count = devices.len(), "enumerated block devices");
        Ok(devices)
    }
}

/// Build a `BlockDevice` from a verified entry, reading its `UUID` and `TYPE`
/// tags. Other tags are ignored and empty values count as absent.
pub fn block_device_from_entry(entry: &CacheEntry) -> Option<BlockDevice> {
    if entry.devname.is_empty() {
        return None;
    }

    let mut device = BlockDevice::new(entry.devname.clone());
    for tag in entry.tags.iter().filter(|tag| !tag.value.is_empty()) {
        match tag.name.as_str() {
            UUID_TAG => device.uuid = Some(tag.value.clone()),
            TYPE_TAG => device.content_type = Some(tag.value.clone()),
            _ => {}
        }
    }

    Some(device)
}

/// Enumerate block devices through blkid using the default configuration.
pub fn enumerate_devices() -> std::result::Result<BlockDeviceSet, EnumerationError> {
    enumerate_devices_with(&Config::default())
}

pub fn enumerate_devices_with(
    config: &Config,
) -> std::result::Result<BlockDeviceSet, EnumerationError> {
    DeviceEnumerator::new(BlkidSource::new(config)).enumerate()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::SysError;

    /// In-memory cache source; devices listed in `present` pass verification.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub entries: Vec<CacheEntry>,
        pub present: Vec<String>,
        pub unavailable: bool,
        pub probe_fails: bool,
        pub released: Arc<AtomicUsize>,
        pub probed: Arc<AtomicBool>,
    }

    impl FakeSource {
        pub(crate) fn with_devices(entries: Vec<CacheEntry>) -> Self {
            let present = entries.iter().map(|e| e.devname.clone()).collect();
            Self {
                entries,
                present,
                ..Self::default()
            }
        }
    }

    pub(crate) struct FakeCache {
        entries: Vec<CacheEntry>,
        present: Vec<String>,
        probe_fails: bool,
        released: Arc<AtomicUsize>,
        probed: Arc<AtomicBool>,
    }

    impl CacheSource for FakeSource {
        type Cache = FakeCache;

        fn open(&self) -> std::result::Result<FakeCache, EnumerationError> {
            if self.unavailable {
                return Err(EnumerationError::CacheUnavailable(
                    "simulated outage".to_string(),
                ));
            }
            Ok(FakeCache {
                entries: self.entries.clone(),
                present: self.present.clone(),
                probe_fails: self.probe_fails,
                released: Arc::clone(&self.released),
                probed: Arc::clone(&self.probed),
            })
        }
    }

    impl DeviceTagCache for FakeCache {
        fn probe_all(&mut self) -> Result<()> {
            self.probed.store(true, Ordering::SeqCst);
            if self.probe_fails {
                return Err(SysError::CommandFailed("probe exploded".to_string()));
            }
            Ok(())
        }

        fn entries(&self) -> &[CacheEntry] {
            &self.entries
        }

        fn verify(&self, entry: &CacheEntry) -> Option<CacheEntry> {
            self.present
                .contains(&entry.devname)
                .then(|| entry.clone())
        }
    }

    impl Drop for FakeCache {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entries() -> Vec<CacheEntry> {
        vec![
            CacheEntry::new("/dev/sda1")
                .with_tag("UUID", "1111-2222")
                .with_tag("TYPE", "vfat")
                .with_tag("LABEL", "EFI"),
            CacheEntry::new("/dev/sdb").with_tag("TYPE", "btrfs"),
            CacheEntry::new("/dev/sdc")
                .with_tag("UUID", "3333")
                .with_tag("TYPE", "ext4"),
        ]
    }

    #[test]
    fn omits_entries_that_fail_verification() {
        let mut source = FakeSource::with_devices(entries());
        source.present.retain(|path| path != "/dev/sdb");

        let devices = DeviceEnumerator::new(source).enumerate().expect("enumerate");

        let paths: Vec<_> = devices.iter().map(|d| d.device_path.as_str()).collect();
        assert_eq!(paths, vec!["/dev/sda1", "/dev/sdc"]);
    }

    #[test]
    fn extracts_uuid_and_type_ignoring_other_tags() {
        let devices = DeviceEnumerator::new(FakeSource::with_devices(entries()))
            .enumerate()
            .expect("enumerate");

        let efi = devices.find_by_path("/dev/sda1").expect("sda1");
        assert_eq!(efi.uuid.as_deref(), Some("1111-2222"));
        assert_eq!(efi.content_type.as_deref(), Some("vfat"));

        let unformatted = devices.find_by_path("/dev/sdb").expect("sdb");
        assert_eq!(unformatted.uuid, None);
        assert!(unformatted.is_btrfs());
    }

    #[test]
    fn empty_tag_values_are_absent() {
        let entry = CacheEntry::new("/dev/loop0")
            .with_tag("UUID", "")
            .with_tag("TYPE", "");
        let device = block_device_from_entry(&entry).expect("device");
        assert_eq!(device.uuid, None);
        assert_eq!(device.content_type, None);
    }

    #[test]
    fn skips_verified_entries_without_a_path() {
        let source = FakeSource::with_devices(vec![
            CacheEntry::new("").with_tag("UUID", "orphan"),
            CacheEntry::new("/dev/sdc"),
        ]);

        let devices = DeviceEnumerator::new(source).enumerate().expect("enumerate");
        assert_eq!(devices.len(), 1);
        assert!(devices.iter().all(|d| !d.device_path.is_empty()));
    }

    #[test]
    fn unavailable_cache_is_fatal() {
        let source = FakeSource {
            unavailable: true,
            ..FakeSource::with_devices(entries())
        };

        let result = DeviceEnumerator::new(source).enumerate();
        assert!(matches!(result, Err(EnumerationError::CacheUnavailable(_))));
    }

    #[test]
    fn probe_failure_falls_back_to_cached_entries() {
        let source = FakeSource {
            probe_fails: true,
            ..FakeSource::with_devices(entries())
        };
        let probed = Arc::clone(&source.probed);

        let devices = DeviceEnumerator::new(source).enumerate().expect("enumerate");
        assert!(probed.load(Ordering::SeqCst));
        assert_eq!(devices.len(), 3);
    }

    #[test]
    fn releases_cache_after_every_call() {
        let source = FakeSource::with_devices(entries());
        let released = Arc::clone(&source.released);
        let enumerator = DeviceEnumerator::new(source);

        let first = enumerator.enumerate().expect("first");
        let second = enumerator.enumerate().expect("second");

        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_cache_is_not_an_error() {
        let devices = DeviceEnumerator::new(FakeSource::default())
            .enumerate()
            .expect("enumerate");
        assert!(devices.is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn logs_through_the_injected_dispatch() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut source = FakeSource::with_devices(entries());
        source.present.clear();

        let devices = DeviceEnumerator::new(source)
            .with_dispatch(Dispatch::new(subscriber))
            .enumerate()
            .expect("enumerate");
        assert!(devices.is_empty());

        let output = String::from_utf8(logs.0.lock().expect("log buffer").clone())
            .expect("utf8 logs");
        assert!(output.contains("failed verification"));
        assert!(output.contains("/dev/sdb"));
    }
}
