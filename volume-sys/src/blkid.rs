// SPDX-License-Identifier: GPL-3.0-only

//! Device-tag cache backed by util-linux `blkid`.
//!
//! Opening reads the blkid cache file (`<device ...>/dev/x</device>` lines).
//! A full probe runs `blkid -c <cache> -o export`; once it succeeds its
//! output is authoritative and cache-file entries it did not report are
//! dropped as stale.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use crate::config::Config;
use crate::enumerate::{CacheEntry, CacheSource, DeviceTagCache};
use crate::error::{EnumerationError, Result, SysError};

/// Attributes of a cache-file line that describe the cache record, not the device.
const CACHE_BOOKKEEPING: &[&str] = &["DEVNO", "TIME", "PRI"];

/// `blkid` exits with 2 when no device could be identified.
const BLKID_NOTHING_FOUND: i32 = 2;

#[derive(Debug, Clone)]
pub struct BlkidSource {
    binary: Option<PathBuf>,
    cache_file: PathBuf,
}

impl BlkidSource {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.blkid_path(),
            cache_file: config.blkid_cache_file.clone(),
        }
    }
}

impl CacheSource for BlkidSource {
    type Cache = BlkidCache;

    fn open(&self) -> std::result::Result<BlkidCache, EnumerationError> {
        let binary = self.binary.clone().ok_or_else(|| {
            EnumerationError::CacheUnavailable("blkid binary not found".to_string())
        })?;

        let entries = match fs::read_to_string(&self.cache_file) {
            Ok(contents) => parse_cache_file(&contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("blkid cache {} does not exist yet", self.cache_file.display());
                Vec::new()
            }
            Err(e) => {
                return Err(EnumerationError::CacheUnavailable(format!(
                    "{}: {}",
                    self.cache_file.display(),
                    e
                )));
            }
        };

        debug!(
            entries = entries.len(),
            "opened blkid cache {}",
            self.cache_file.display()
        );

        Ok(BlkidCache {
            binary,
            cache_file: self.cache_file.clone(),
            entries,
        })
    }
}

#[derive(Debug)]
pub struct BlkidCache {
    binary: PathBuf,
    cache_file: PathBuf,
    entries: Vec<CacheEntry>,
}

impl BlkidCache {
    /// Replace the entry list with the probed devices, keeping cache order
    /// for devices already known and appending new ones.
    fn reconcile(&mut self, mut probed: Vec<CacheEntry>) {
        let known = self.entries.len();
        self.entries.retain_mut(|existing| {
            match probed
                .iter()
                .position(|entry| entry.devname == existing.devname)
            {
                Some(index) => {
                    *existing = probed.remove(index);
                    true
                }
                None => false,
            }
        });

        let stale = known - self.entries.len();
        if stale > 0 {
            debug!(stale, "dropped cache entries without a current signature");
        }
        self.entries.append(&mut probed);
    }
}

impl DeviceTagCache for BlkidCache {
    fn probe_all(&mut self) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("-c")
            .arg(&self.cache_file)
            .args(["-o", "export"])
            .output()?;

        match output.status.code() {
            Some(0) => {}
            Some(BLKID_NOTHING_FOUND) => {
                debug!("blkid identified no devices");
                self.reconcile(Vec::new());
                return Ok(());
            }
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(SysError::CommandFailed(format!(
                    "{} failed ({}): {}",
                    self.binary.display(),
                    output.status,
                    stderr.trim()
                )));
            }
        }

        let probed = parse_export(&String::from_utf8_lossy(&output.stdout));
        debug!(devices = probed.len(), "blkid probe finished");
        self.reconcile(probed);
        Ok(())
    }

    fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    fn verify(&self, entry: &CacheEntry) -> Option<CacheEntry> {
        is_block_device(Path::new(&entry.devname)).then(|| entry.clone())
    }
}

impl Drop for BlkidCache {
    fn drop(&mut self) {
        trace!(entries = self.entries.len(), "releasing blkid cache");
    }
}

fn is_block_device(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.file_type().is_block_device())
        .unwrap_or(false)
}

/// Parse the contents of a blkid cache file.
///
/// Lines that are not well-formed `<device>` records are ignored.
pub fn parse_cache_file(contents: &str) -> Vec<CacheEntry> {
    contents.lines().filter_map(parse_cache_line).collect()
}

fn parse_cache_line(line: &str) -> Option<CacheEntry> {
    let rest = line.trim().strip_prefix("<device")?;
    let (attributes, rest) = split_attributes(rest)?;
    let devname = rest.strip_suffix("</device>")?.trim();

    let mut entry = CacheEntry::new(devname);
    for (name, value) in attributes {
        if !CACHE_BOOKKEEPING.contains(&name.as_str()) {
            entry.set_tag(name, value);
        }
    }
    Some(entry)
}

/// Split `KEY="value" ...>` into its attributes and the text after `>`.
fn split_attributes(input: &str) -> Option<(Vec<(String, String)>, &str)> {
    let mut attributes = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let (index, c) = *chars.peek()?;
        if c == '>' {
            return Some((attributes, &input[index + 1..]));
        }

        let mut name = String::new();
        for (_, c) in chars.by_ref() {
            if c == '=' {
                break;
            }
            name.push(c);
        }

        if chars.next()?.1 != '"' {
            return None;
        }

        let mut value = String::new();
        loop {
            match chars.next()?.1 {
                '\\' => value.push(chars.next()?.1),
                '"' => break,
                c => value.push(c),
            }
        }

        attributes.push((name.trim().to_string(), value));
    }
}

/// Parse `blkid -o export` output: blank-line separated blocks of `KEY=value`
/// lines, each starting with `DEVNAME=`.
pub fn parse_export(output: &str) -> Vec<CacheEntry> {
    let mut entries = Vec::new();
    let mut current: Option<CacheEntry> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            entries.extend(current.take());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unescape_export_value(value);

        if key == "DEVNAME" {
            entries.extend(current.replace(CacheEntry::new(value)));
        } else if let Some(entry) = current.as_mut() {
            entry.set_tag(key, value);
        }
    }

    entries.extend(current);
    entries
}

fn unescape_export_value(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => output.extend(chars.next()),
            c => output.push(c),
        }
    }

    output
}
