// SPDX-License-Identifier: GPL-3.0-only

//! BTRFS operations library for the btrfs volume manager
//!
//! This library issues btrfs control requests (ioctls) for subvolume
//! creation, deletion and snapshots. Each call opens the directories it needs,
//! issues exactly one request and closes everything before returning. Nothing
//! is retried here.

pub mod error;
mod ioctl;
pub mod subvolume;

// Re-export commonly used types
pub use error::{Result, SubvolumeError, result_code};
pub use subvolume::{
    SnapshotOptions, SubvolumeManager, create_snapshot, create_snapshot_with, create_subvolume,
    delete_subvolume,
};
