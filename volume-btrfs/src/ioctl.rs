// SPDX-License-Identifier: GPL-3.0-only

//! Kernel request structures from linux/btrfs.h.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

const BTRFS_IOCTL_MAGIC: u8 = 0x94;

pub const BTRFS_PATH_NAME_MAX: usize = 4087;
pub const BTRFS_SUBVOL_NAME_MAX: usize = 4039;
pub const BTRFS_SUBVOL_RDONLY: u64 = 1 << 1;

/// `struct btrfs_ioctl_vol_args`
#[repr(C)]
pub struct VolArgs {
    pub fd: i64,
    pub name: [u8; BTRFS_PATH_NAME_MAX + 1],
}

impl VolArgs {
    /// Zeroed arguments naming `name`. The caller checks the length.
    pub fn named(name: &OsStr) -> Self {
        let mut args = Self {
            fd: 0,
            name: [0; BTRFS_PATH_NAME_MAX + 1],
        };
        copy_name(&mut args.name, name);
        args
    }
}

/// `struct btrfs_ioctl_vol_args_v2`
#[repr(C)]
pub struct VolArgsV2 {
    pub fd: i64,
    pub transid: u64,
    pub flags: u64,
    pub unused: [u64; 4],
    pub name: [u8; BTRFS_SUBVOL_NAME_MAX + 1],
}

impl VolArgsV2 {
    pub fn named(name: &OsStr) -> Self {
        let mut args = Self {
            fd: 0,
            transid: 0,
            flags: 0,
            unused: [0; 4],
            name: [0; BTRFS_SUBVOL_NAME_MAX + 1],
        };
        copy_name(&mut args.name, name);
        args
    }
}

// Always leaves a trailing NUL.
fn copy_name(buffer: &mut [u8], name: &OsStr) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(buffer.len() - 1);
    buffer[..len].copy_from_slice(&bytes[..len]);
}

nix::ioctl_write_ptr!(snap_create_v2, BTRFS_IOCTL_MAGIC, 23, VolArgsV2);
nix::ioctl_write_ptr!(subvol_create, BTRFS_IOCTL_MAGIC, 14, VolArgs);
nix::ioctl_write_ptr!(snap_destroy, BTRFS_IOCTL_MAGIC, 15, VolArgs);
