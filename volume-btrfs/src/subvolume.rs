// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::statfs::{BTRFS_SUPER_MAGIC, statfs};
use tracing::info;

use crate::error::{Result, SubvolumeError};
use crate::ioctl::{self, BTRFS_SUBVOL_NAME_MAX, BTRFS_SUBVOL_RDONLY, VolArgs, VolArgsV2};

/// Options for snapshot creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Create the snapshot read-only
    pub readonly: bool,
}

/// Parent directory and final component of a subvolume path
#[derive(Debug)]
struct SubvolumeTarget {
    parent: PathBuf,
    name: OsString,
}

fn resolve_target(path: &Path) -> Result<SubvolumeTarget> {
    let invalid = |errno: i32| SubvolumeError::PathResolutionFailed {
        path: path.to_path_buf(),
        source: io::Error::from_raw_os_error(errno),
    };

    let name = final_component(path).ok_or_else(|| invalid(libc::EINVAL))?;
    if name.len() > BTRFS_SUBVOL_NAME_MAX {
        return Err(invalid(libc::ENAMETOOLONG));
    }
    if name.as_bytes().contains(&0) {
        return Err(invalid(libc::EINVAL));
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let parent = fs::canonicalize(parent).map_err(|source| SubvolumeError::PathResolutionFailed {
        path: parent.to_path_buf(),
        source,
    })?;

    Ok(SubvolumeTarget {
        parent,
        name: name.to_os_string(),
    })
}

/// Last component of `path` as written, ignoring trailing slashes.
///
/// `Path::file_name` folds `sub/.` into `sub`, which would aim a request at
/// `sub` itself, so the bytes are inspected directly. `.`, `..` and the empty
/// name are not valid subvolume names.
fn final_component(path: &Path) -> Option<&OsStr> {
    let bytes = path.as_os_str().as_bytes();
    let end = bytes.iter().rposition(|&b| b != b'/')? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|&b| b == b'/')
        .map_or(0, |slash| slash + 1);

    match &bytes[start..end] {
        b"." | b".." => None,
        name => Some(OsStr::from_bytes(name)),
    }
}

fn open_directory(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(path)
        .map_err(|source| SubvolumeError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

fn rejected(path: &Path, errno: Errno) -> SubvolumeError {
    SubvolumeError::RequestRejected {
        path: path.to_path_buf(),
        source: errno.into(),
    }
}

/// Create a subvolume at `path`, named after its final component.
pub fn create_subvolume(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let target = resolve_target(path)?;
    let parent = open_directory(&target.parent)?;
    let args = VolArgs::named(&target.name);

    // SAFETY: `parent` is an open directory and `args` outlives the call.
    unsafe { ioctl::subvol_create(parent.as_raw_fd(), &args) }
        .map_err(|errno| rejected(path, errno))?;

    info!("created subvolume {}", path.display());
    Ok(())
}

/// Destroy the subvolume (or snapshot) at `path`.
pub fn delete_subvolume(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let target = resolve_target(path)?;
    let parent = open_directory(&target.parent)?;
    let args = VolArgs::named(&target.name);

    // SAFETY: as in `create_subvolume`.
    unsafe { ioctl::snap_destroy(parent.as_raw_fd(), &args) }
        .map_err(|errno| rejected(path, errno))?;

    info!("deleted subvolume {}", path.display());
    Ok(())
}

/// Snapshot the subvolume at `source` to `dest`.
pub fn create_snapshot(source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    create_snapshot_with(source, dest, SnapshotOptions::default())
}

pub fn create_snapshot_with(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: SnapshotOptions,
) -> Result<()> {
    let source = source.as_ref();
    let dest = dest.as_ref();

    let source_dir = open_directory(source)?;
    let target = resolve_target(dest)?;
    let dest_parent = open_directory(&target.parent)?;

    let mut args = VolArgsV2::named(&target.name);
    args.fd = i64::from(source_dir.as_raw_fd());
    if options.readonly {
        args.flags |= BTRFS_SUBVOL_RDONLY;
    }

    // SAFETY: both descriptors stay open for the duration of the call.
    unsafe { ioctl::snap_create_v2(dest_parent.as_raw_fd(), &args) }
        .map_err(|errno| rejected(dest, errno))?;

    info!(
        readonly = options.readonly,
        "created snapshot of {} at {}",
        source.display(),
        dest.display()
    );
    Ok(())
}

/// Subvolume operations relative to a mounted BTRFS filesystem
pub struct SubvolumeManager {
    mount_point: PathBuf,
}

impl SubvolumeManager {
    /// Create a new SubvolumeManager for the given mount point
    pub fn new<P: Into<PathBuf>>(mount_point: P) -> Result<Self> {
        let mount_point = mount_point.into();

        // Verify the path is a BTRFS filesystem
        let stat = statfs(mount_point.as_path()).map_err(|errno| {
            SubvolumeError::PathResolutionFailed {
                path: mount_point.clone(),
                source: errno.into(),
            }
        })?;
        if stat.filesystem_type() != BTRFS_SUPER_MAGIC {
            return Err(SubvolumeError::NotBtrfs(mount_point));
        }

        Ok(Self { mount_point })
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Create a new subvolume, returning its path
    pub fn create(&self, name: &str) -> Result<PathBuf> {
        let path = self.mount_point.join(name);
        create_subvolume(&path)?;
        Ok(path)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        delete_subvolume(self.mount_point.join(name))
    }

    /// Snapshot `source` to `dest`, both relative to the mount point
    pub fn snapshot(&self, source: &str, dest: &str, options: SnapshotOptions) -> Result<PathBuf> {
        let dest = self.mount_point.join(dest);
        create_snapshot_with(self.mount_point.join(source), &dest, options)?;
        Ok(dest)
    }
}
