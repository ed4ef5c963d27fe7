// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::device::BlockDevice;

/// Content type reported by the tag cache for btrfs members
pub const BTRFS_CONTENT_TYPE: &str = "btrfs";

/// A btrfs filesystem, possibly spanning several devices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BtrfsVolume {
    pub label: Option<String>,
    pub uuid: String,
    pub devices: Vec<BlockDevice>,
}
