// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the btrfs volume manager
//!
//! These models are shared by every layer of the stack:
//!
//! - **volume-sys**: Returns these types from device enumeration and mount probing
//! - **volume-btrfs**: Serializes them from its diagnostic CLI
//! - Consumers (backup/snapshot managers) own the returned values outright
//!
//! ## Hierarchy
//!
//! - `BlockDevice` → one device node with its UUID/TYPE tags
//! - `BlockDeviceSet` → ordered result of one enumeration
//! - `BtrfsVolume` → a btrfs filesystem and the devices it spans
//! - `MountPoint` → one entry of the kernel mount table

pub mod btrfs;
pub mod device;
pub mod mount;

pub use btrfs::{BTRFS_CONTENT_TYPE, BtrfsVolume};
pub use device::{BlockDevice, BlockDeviceSet};
pub use mount::MountPoint;
