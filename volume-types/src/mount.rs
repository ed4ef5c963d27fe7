// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// One entry of the kernel mount table (`/proc/mounts`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    /// Mounted source, usually a device node (e.g., "/dev/sda1")
    pub identifier: String,
    pub mount_path: String,
    pub mount_type: String,
    pub mount_options: String,
    pub dump_frequency: i32,
    pub fsck_pass_no: i32,
}

impl MountPoint {
    /// Whether `option` appears in the comma-separated option list.
    pub fn has_option(&self, option: &str) -> bool {
        self.mount_options.split(',').any(|value| value == option)
    }
}
