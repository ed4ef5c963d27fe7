// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Fatal failure of a device enumeration.
///
/// Devices that fail verification are not errors; they are left out of the
/// result.
#[derive(Error, Debug)]
pub enum EnumerationError {
    #[error("Device tag cache unavailable: {0}")]
    CacheUnavailable(String),
}

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("No device present for volume UUID: {0}")]
    NoDeviceForVolume(String),

    #[error("Not a btrfs device: {0}")]
    NotBtrfs(String),

    #[error("Mounting {device} at {} failed: {source}", .target.display())]
    MountFailed {
        device: String,
        target: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
