// SPDX-License-Identifier: GPL-3.0-only

//! btrfs volume discovery and root-subvolume mounting.

use std::fs;
use std::path::PathBuf;

use nix::mount::{MsFlags, mount};
use tracing::{debug, info};
use volume_types::{BTRFS_CONTENT_TYPE, BtrfsVolume};

use crate::command::run_capture;
use crate::config::Config;
use crate::index::{BlockDeviceIndex, MountPointIndex};
use crate::{Result, SysError};

/// Mount option selecting the top-level subvolume
const ROOT_SUBVOLUME_OPTION: &str = "subvolid=0";

/// One filesystem as printed by `btrfs filesystem show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownFilesystem {
    pub label: Option<String>,
    pub uuid: String,
    pub device_paths: Vec<String>,
}

pub fn parse_btrfs_show(output: &str) -> Vec<ShownFilesystem> {
    let mut filesystems = Vec::new();
    let mut current: Option<ShownFilesystem> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix("Label:") {
            filesystems.extend(current.take());
            current = Some(parse_show_header(header));
            continue;
        }

        if let Some(filesystem) = current.as_mut()
            && line.starts_with("devid")
            && let Some((_, path)) = line.split_once(" path ")
            && !path.trim().is_empty()
        {
            filesystem.device_paths.push(path.trim().to_string());
        }
    }

    filesystems.extend(current);
    filesystems
}

/// `'<label>'  uuid: <uuid>`, where an unlabelled filesystem shows `none`.
fn parse_show_header(header: &str) -> ShownFilesystem {
    let (label, uuid) = header.split_once("uuid:").unwrap_or((header, ""));
    let label = label.trim().trim_matches('\'');

    ShownFilesystem {
        label: (!label.is_empty() && label != "none").then(|| label.to_string()),
        uuid: uuid.trim().to_string(),
        device_paths: Vec::new(),
    }
}

/// Discover btrfs volumes through `btrfs filesystem show --all-devices`.
///
/// Member paths are resolved against `devices`; paths the index does not
/// know are dropped. Without a `btrfs` binary the result is empty.
pub fn discover_btrfs_volumes(
    config: &Config,
    devices: &BlockDeviceIndex,
) -> Result<Vec<BtrfsVolume>> {
    let Some(binary) = config.btrfs_path() else {
        debug!("btrfs binary not found, skipping volume discovery");
        return Ok(Vec::new());
    };

    let output = run_capture(&binary, &["filesystem", "show", "--all-devices"])?;
    Ok(volumes_from_filesystems(parse_btrfs_show(&output), devices))
}

fn volumes_from_filesystems(
    filesystems: Vec<ShownFilesystem>,
    devices: &BlockDeviceIndex,
) -> Vec<BtrfsVolume> {
    filesystems
        .into_iter()
        .map(|filesystem| BtrfsVolume {
            devices: filesystem
                .device_paths
                .iter()
                .filter_map(|path| devices.find_by_path(path))
                .collect(),
            label: filesystem.label,
            uuid: filesystem.uuid,
        })
        .collect()
}

/// Mount the top-level subvolume of the volume with `uuid` under
/// `<root_mounts_dir>/<uuid>` and refresh the mount index.
pub fn mount_btrfs_root(
    uuid: &str,
    devices: &BlockDeviceIndex,
    mounts: &MountPointIndex,
    config: &Config,
) -> Result<PathBuf> {
    let device = devices
        .find_by_uuid(uuid)
        .into_iter()
        .next()
        .ok_or_else(|| SysError::NoDeviceForVolume(uuid.to_string()))?;

    if !device.is_btrfs() {
        return Err(SysError::NotBtrfs(device.device_path));
    }

    let target = config.root_mounts_dir.join(uuid);
    fs::create_dir_all(&target)?;

    mount(
        Some(device.device_path.as_str()),
        target.as_path(),
        Some(BTRFS_CONTENT_TYPE),
        MsFlags::empty(),
        Some(ROOT_SUBVOLUME_OPTION),
    )
    .map_err(|source| SysError::MountFailed {
        device: device.device_path.clone(),
        target: target.clone(),
        source,
    })?;

    info!(
        uuid,
        device = %device.device_path,
        "mounted btrfs root at {}",
        target.display()
    );

    mounts.rescan(&config.mounts_file, devices, &config.root_mounts_dir)?;
    Ok(target)
}

/// Path of the volume's root mount, mounting it first if necessary.
pub fn btrfs_root_mount(
    uuid: &str,
    devices: &BlockDeviceIndex,
    mounts: &MountPointIndex,
    config: &Config,
) -> Result<PathBuf> {
    if let Some(existing) = mounts.find_root_mount(uuid) {
        return Ok(PathBuf::from(existing.mount_path));
    }

    mount_btrfs_root(uuid, devices, mounts, config)
}
