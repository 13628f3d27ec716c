// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, warn};

use super::DeviceMapper;
use crate::{blockdev::loopback::BackingDevice, error::io_error, Error, Result};

/// [`DeviceMapper`] driving the `dmsetup` tool
///
/// Image files are attached to auto-clearing loop devices; the loop handles
/// are held until this value is dropped, by which time any table created on
/// top of them keeps them alive.
#[derive(Debug)]
pub struct Dmsetup {
    binary: PathBuf,
    backing: Vec<BackingDevice>,
}

impl Default for Dmsetup {
    fn default() -> Self {
        Self::new("dmsetup")
    }
}

impl Dmsetup {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
            backing: Vec::new(),
        }
    }

    fn run(&self, args: &[&str], input: Option<&[u8]>) -> Result<()> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdout(Stdio::null());
        command.stderr(Stdio::piped());
        if input.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command
            .spawn()
            .map_err(|e| io_error(Error::Failed, "spawn dmsetup", e))?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(payload)
                    .map_err(|e| io_error(Error::Failed, "write dmsetup table", e))?;
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| io_error(Error::Failed, "wait for dmsetup", e))?;
        if !output.status.success() {
            warn!(
                "dmsetup {} failed ({}): {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            raise!(Error::Failed);
        }
        Ok(())
    }
}

impl DeviceMapper for Dmsetup {
    fn attach(&mut self, path: &Path, read_only: bool) -> Result<PathBuf> {
        let device = BackingDevice::resolve(path, read_only)?;
        let resolved = device.path().to_owned();
        self.backing.push(device);
        Ok(resolved)
    }

    fn create(&mut self, name: &str, table: &str, read_only: bool) -> Result<()> {
        debug!("creating device-mapper device {name}");
        let mut args = vec!["create", name];
        if read_only {
            args.push("--readonly");
        }
        self.run(&args, Some(table.as_bytes()))
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        debug!("removing device-mapper device {name}");
        self.run(&["remove", name], None)
    }

    fn exists(&self, name: &str) -> bool {
        Path::new("/dev/mapper").join(name).exists()
    }
}
