// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use volume_types::MountPoint;

use crate::{Result, SysError};

/// Read and parse a mount table in `/proc/mounts` format.
pub fn probe_mount_points(mounts_file: &Path) -> Result<Vec<MountPoint>> {
    let contents = fs::read_to_string(mounts_file)?;
    parse_mounts(&contents)
}

/// Parse `fsname dir type opts freq passno` lines.
///
/// The two numeric fields are optional and default to 0, as with
/// `getmntent(3)`.
pub fn parse_mounts(input: &str) -> Result<Vec<MountPoint>> {
    let mut mount_points = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        if line.trim_start().starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(SysError::Parse(format!("invalid mount table line: {line}")));
        }

        mount_points.push(MountPoint {
            identifier: unescape_mount_field(fields[0]),
            mount_path: unescape_mount_field(fields[1]),
            mount_type: unescape_mount_field(fields[2]),
            mount_options: unescape_mount_field(fields[3]),
            dump_frequency: parse_numeric_field(fields.get(4), line)?,
            fsck_pass_no: parse_numeric_field(fields.get(5), line)?,
        });
    }

    Ok(mount_points)
}

fn parse_numeric_field(field: Option<&&str>, line: &str) -> Result<i32> {
    match field {
        Some(value) => value
            .parse()
            .map_err(|_| SysError::Parse(format!("invalid numeric field in mount line: {line}"))),
        None => Ok(0),
    }
}

/// Decode the kernel's octal escapes (`\040` for space, `\011` for tab, ...).
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(num) = u8::from_str_radix(octal, 8) {
                output.push(num);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "/dev/nvme0n1p2 / ext4 rw,relatime 0 1\nproc /proc proc rw,nosuid,nodev,noexec,relatime 0 0\n/dev/sdb /var/lib/btrfs-volume-manager/roots/bbbb btrfs rw,relatime,space_cache=v2,subvolid=5,subvol=/ 0 0\n/dev/sdc /media/usb\\040stick vfat rw 0 0\n";

    #[test]
    fn parses_all_fields() {
        let mounts = parse_mounts(SAMPLE).expect("parse should succeed");

        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].identifier, "/dev/nvme0n1p2");
        assert_eq!(mounts[0].mount_path, "/");
        assert_eq!(mounts[0].fsck_pass_no, 1);
        assert_eq!(mounts[2].mount_type, "btrfs");
        assert!(mounts[2].has_option("subvolid=5"));
    }

    #[test]
    fn decodes_octal_escapes() {
        let mounts = parse_mounts(SAMPLE).expect("parse should succeed");
        assert_eq!(mounts[3].mount_path, "/media/usb stick");
    }

    #[test]
    fn numeric_fields_are_optional() {
        let mounts = parse_mounts("tmpfs /tmp tmpfs rw\n").expect("parse should succeed");
        assert_eq!(mounts[0].dump_frequency, 0);
        assert_eq!(mounts[0].fsck_pass_no, 0);
    }

    #[test]
    fn rejects_truncated_lines() {
        assert!(matches!(
            parse_mounts("/dev/sda1 /boot\n"),
            Err(SysError::Parse(_))
        ));
        assert!(matches!(
            parse_mounts("/dev/sda1 /boot vfat rw x 0\n"),
            Err(SysError::Parse(_))
        ));
    }

    #[test]
    fn unreadable_table_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            probe_mount_points(&dir.path().join("mounts")),
            Err(SysError::Io(_))
        ));
    }
}
