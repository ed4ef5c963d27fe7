// SPDX-License-Identifier: GPL-3.0-only

//! Configuration for the system layer.
//!
//! Every field has a default, so an empty (or absent) TOML file yields a
//! working configuration.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, SysError};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/btrfs-volume-manager.toml";
pub const CONFIG_PATH_ENV: &str = "VOLUME_MANAGER_CONFIG";
pub const DEFAULT_BLKID_CACHE_FILE: &str = "/run/blkid/blkid.tab";
pub const DEFAULT_MOUNTS_FILE: &str = "/proc/mounts";
pub const DEFAULT_ROOT_MOUNTS_DIR: &str = "/var/lib/btrfs-volume-manager/roots";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Explicit `blkid` binary; looked up on `PATH` when unset
    pub blkid_binary: Option<PathBuf>,
    pub blkid_cache_file: PathBuf,
    /// Explicit `btrfs` binary; looked up on `PATH` when unset
    pub btrfs_binary: Option<PathBuf>,
    pub mounts_file: PathBuf,
    /// Directory under which volume roots are mounted, one per UUID
    pub root_mounts_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blkid_binary: None,
            blkid_cache_file: PathBuf::from(DEFAULT_BLKID_CACHE_FILE),
            btrfs_binary: None,
            mounts_file: PathBuf::from(DEFAULT_MOUNTS_FILE),
            root_mounts_dir: PathBuf::from(DEFAULT_ROOT_MOUNTS_DIR),
        }
    }
}

impl Config {
    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| SysError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| SysError::Config(e.to_string()))
    }

    /// Load from `$VOLUME_MANAGER_CONFIG`, else from the default path.
    ///
    /// A missing default file means defaults; a missing file named by the
    /// environment variable is an error.
    pub fn from_env() -> Result<Self> {
        if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
            return Self::load(Path::new(&path));
        }

        match Self::load(Path::new(DEFAULT_CONFIG_PATH)) {
            Err(SysError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {DEFAULT_CONFIG_PATH}, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn blkid_path(&self) -> Option<PathBuf> {
        resolve_binary(self.blkid_binary.as_deref(), "blkid")
    }

    pub fn btrfs_path(&self) -> Option<PathBuf> {
        resolve_binary(self.btrfs_binary.as_deref(), "btrfs")
    }
}

fn resolve_binary(configured: Option<&Path>, name: &str) -> Option<PathBuf> {
    match configured {
        Some(path) if path.exists() => Some(path.to_path_buf()),
        Some(path) => {
            debug!("configured {name} binary {} does not exist", path.display());
            None
        }
        None => which::which(name).ok(),
    }
}
