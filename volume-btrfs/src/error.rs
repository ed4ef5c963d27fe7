// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error types for BTRFS subvolume operations
///
/// Every variant keeps the underlying system error so callers can recover the
/// original errno.
#[derive(Error, Debug)]
pub enum SubvolumeError {
    #[error("Cannot resolve {}: {source}", .path.display())]
    PathResolutionFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot open {}: {source}", .path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("BTRFS request for {} rejected: {source}", .path.display())]
    RequestRejected {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a BTRFS filesystem: {}", .0.display())]
    NotBtrfs(PathBuf),
}

impl SubvolumeError {
    /// The underlying system error code.
    pub fn errno(&self) -> i32 {
        match self {
            Self::PathResolutionFailed { source, .. }
            | Self::OpenFailed { source, .. }
            | Self::RequestRejected { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            // What the kernel answers when btrfs ioctls reach another filesystem.
            Self::NotBtrfs(_) => libc::ENOTTY,
        }
    }

    /// Signed result code: the negated errno.
    pub fn result_code(&self) -> i32 {
        -self.errno()
    }
}

/// Map an operation result to 0 on success or a negative errno.
pub fn result_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.result_code(),
    }
}

/// Result type alias for BTRFS operations
pub type Result<T> = std::result::Result<T, SubvolumeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_are_negated_errno() {
        let error = SubvolumeError::RequestRejected {
            path: PathBuf::from("/mnt/pool/sub"),
            source: io::Error::from_raw_os_error(libc::EEXIST),
        };
        assert_eq!(error.errno(), libc::EEXIST);
        assert_eq!(result_code(&Err(error)), -libc::EEXIST);
        assert_eq!(result_code(&Ok(())), 0);
    }

    #[test]
    fn synthetic_io_errors_fall_back_to_eio() {
        let error = SubvolumeError::OpenFailed {
            path: PathBuf::from("/x"),
            source: io::Error::other("no errno"),
        };
        assert_eq!(error.errno(), libc::EIO);
    }
}
