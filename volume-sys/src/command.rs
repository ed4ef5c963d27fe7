// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::process::Command;

use crate::{Result, SysError};

pub(crate) fn run_capture(command: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(command).args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SysError::CommandFailed(format!(
            "{} failed: {}",
            command.display(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
