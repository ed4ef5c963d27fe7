// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the btrfs volume manager
//!
//! This crate talks to the ambient system state that the manager depends on:
//! - Block device enumeration through the blkid device-tag cache
//! - Mount table probing (`/proc/mounts`)
//! - Thread-safe indexes over the last device and mount scans
//! - btrfs volume discovery and root-subvolume mounting
//!
//! Mounting requires elevated privileges; enumeration works unprivileged but
//! only sees what the blkid cache exposes to the calling user.

pub mod blkid;
pub mod btrfs;
mod command;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod index;
pub mod mounts;

pub use blkid::{BlkidCache, BlkidSource};
pub use btrfs::{
    ShownFilesystem, btrfs_root_mount, discover_btrfs_volumes, mount_btrfs_root, parse_btrfs_show,
};
pub use config::Config;
pub use enumerate::{
    CacheEntry, CacheSource, DeviceEnumerator, DeviceTagCache, Tag, enumerate_devices,
    enumerate_devices_with,
};
pub use error::{EnumerationError, Result, SysError};
pub use index::{BlockDeviceIndex, MountPointIndex};
pub use mounts::{parse_mounts, probe_mount_points};

// Re-export shared models
pub use volume_types::*;
