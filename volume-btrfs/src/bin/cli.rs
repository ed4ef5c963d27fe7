// SPDX-License-Identifier: GPL-3.0-only

//! CLI wrapper around the volume-btrfs and volume-sys libraries for testing
//! and manual operations

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use volume_btrfs::{SnapshotOptions, create_snapshot_with, create_subvolume, delete_subvolume};
use volume_sys::{
    BlkidSource, BlockDeviceIndex, Config, DeviceEnumerator, MountPointIndex, btrfs_root_mount,
    discover_btrfs_volumes, probe_mount_points,
};

/// Diagnostic tool for block devices and BTRFS subvolumes
#[derive(Parser)]
#[command(name = "volume-btrfs-cli")]
#[command(about = "CLI tool for btrfs volume manager operations", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $VOLUME_MANAGER_CONFIG or /etc/btrfs-volume-manager.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List block devices from the blkid cache
    Devices {
        /// Only list devices with a recognized content type
        #[arg(long)]
        recognized: bool,
    },
    /// List mounted filesystems
    Mounts,
    /// List btrfs volumes and their member devices
    Volumes,
    /// Print the root mount of a btrfs volume, mounting it if needed
    RootMount {
        /// Filesystem UUID of the volume
        uuid: String,
    },
    /// Create a new subvolume
    Create {
        /// Path of the subvolume to create
        path: PathBuf,
    },
    /// Delete a subvolume
    Delete {
        /// Path to the subvolume to delete
        path: PathBuf,
    },
    /// Create a snapshot of a subvolume
    Snapshot {
        /// Source subvolume path
        source: PathBuf,
        /// Destination snapshot path
        dest: PathBuf,
        /// Make the snapshot read-only
        #[arg(long)]
        readonly: bool,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Config::from_env().context("loading configuration"),
    }
}

fn scan_devices(config: &Config) -> Result<BlockDeviceIndex> {
    let index = BlockDeviceIndex::new();
    index
        .rescan(&DeviceEnumerator::new(BlkidSource::new(config)))
        .context("enumerating block devices")?;
    Ok(index)
}

fn main() -> Result<()> {
    // Initialize tracing to stderr (so it doesn't interfere with JSON stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Devices { recognized } => {
            let devices = scan_devices(&config)?;
            let devices = if recognized {
                devices.recognized()
            } else {
                devices.all()
            };
            println!("{}", serde_json::to_string(&devices)?);
        }
        Commands::Mounts => {
            let mounts = probe_mount_points(&config.mounts_file)?;
            println!("{}", serde_json::to_string(&mounts)?);
        }
        Commands::Volumes => {
            let devices = scan_devices(&config)?;
            let volumes = discover_btrfs_volumes(&config, &devices)?;
            println!("{}", serde_json::to_string(&volumes)?);
        }
        Commands::RootMount { uuid } => {
            let devices = scan_devices(&config)?;
            let mounts = MountPointIndex::new();
            mounts.rescan(&config.mounts_file, &devices, &config.root_mounts_dir)?;
            let path = btrfs_root_mount(&uuid, &devices, &mounts, &config)?;
            println!("{}", serde_json::json!({ "path": path }));
        }
        Commands::Create { path } => {
            create_subvolume(&path)?;
            println!("{{\"success\": true}}");
        }
        Commands::Delete { path } => {
            delete_subvolume(&path)?;
            println!("{{\"success\": true}}");
        }
        Commands::Snapshot {
            source,
            dest,
            readonly,
        } => {
            create_snapshot_with(&source, &dest, SnapshotOptions { readonly })?;
            println!("{{\"success\": true}}");
        }
    }

    Ok(())
}
