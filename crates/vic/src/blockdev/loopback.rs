// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Loop devices for exposing image files to device-mapper

use std::{
    fs::{File, OpenOptions},
    os::fd::{AsRawFd, OwnedFd},
    path::{Path, PathBuf},
};

use linux_raw_sys::loop_device::{
    loop_info64, LOOP_CLR_FD, LOOP_CTL_GET_FREE, LOOP_SET_FD, LOOP_SET_STATUS64, LO_FLAGS_AUTOCLEAR,
    LO_FLAGS_READ_ONLY,
};
use log::debug;
use nix::libc;

use super::is_regular_file;
use crate::{error::io_error, Error, Result};

/// Represents a loop device that can be used to expose files as block devices
#[derive(Debug)]
pub struct LoopDevice {
    /// File descriptor for the loop device
    fd: OwnedFd,
    /// Path to the loop device (e.g. /dev/loop0)
    path: PathBuf,
}

impl LoopDevice {
    /// Creates a new loop device by obtaining the next available device number
    /// from /dev/loop-control and opening the corresponding device file.
    pub fn create() -> Result<Self> {
        let ctrl = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/loop-control")
            .map_err(|e| io_error(Error::FailedToGetLoopDevice, "open /dev/loop-control", e))?;

        let devno = unsafe { libc::ioctl(ctrl.as_raw_fd(), LOOP_CTL_GET_FREE as _) };
        if devno < 0 {
            let err = std::io::Error::last_os_error();
            return Err(io_error(Error::FailedToGetLoopDevice, "LOOP_CTL_GET_FREE", err));
        }

        let path = PathBuf::from(format!("/dev/loop{devno}"));
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error(Error::FailedToGetLoopDevice, "open loop device", e))?
            .into();

        Ok(LoopDevice { fd, path })
    }

    /// Attaches a backing file to this loop device.
    ///
    /// The device is marked auto-clear: the kernel detaches it once the last
    /// reference (ours or a device-mapper table's) goes away.
    pub fn attach(&self, backing_file: &Path, read_only: bool) -> Result<()> {
        let f = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(backing_file)
            .map_err(|e| io_error(Error::FailedToGetLoopDevice, "open backing file", e))?;

        let our_fd = self.fd.as_raw_fd();
        let res = unsafe { libc::ioctl(our_fd, LOOP_SET_FD as _, f.as_raw_fd()) };
        if res < 0 {
            let err = std::io::Error::last_os_error();
            return Err(io_error(Error::FailedToGetLoopDevice, "LOOP_SET_FD", err));
        }

        let mut info: loop_info64 = unsafe { std::mem::zeroed() };
        info.lo_flags = LO_FLAGS_AUTOCLEAR as u32;
        if read_only {
            info.lo_flags |= LO_FLAGS_READ_ONLY as u32;
        }
        let res = unsafe { libc::ioctl(our_fd, LOOP_SET_STATUS64 as _, &info) };
        if res < 0 {
            let err = std::io::Error::last_os_error();
            let _ = self.detach();
            return Err(io_error(Error::FailedToGetLoopDevice, "LOOP_SET_STATUS64", err));
        }

        debug!("attached {} to {}", backing_file.display(), self.path.display());
        Ok(())
    }

    /// Detaches the current backing file from this loop device.
    pub fn detach(&self) -> Result<()> {
        let res = unsafe { libc::ioctl(self.fd.as_raw_fd(), LOOP_CLR_FD as _, 0) };
        if res < 0 {
            let err = std::io::Error::last_os_error();
            return Err(io_error(Error::IoctlFailed, "LOOP_CLR_FD", err));
        }
        Ok(())
    }

    /// Path to the loop device node
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A path usable as a device-mapper backing device
///
/// Regular files are routed through a fresh loop device, which stays open
/// for as long as this value lives.
#[derive(Debug)]
pub struct BackingDevice {
    path: PathBuf,
    _loop: Option<LoopDevice>,
}

impl BackingDevice {
    /// Resolve `path`, attaching a loop device when it names a regular file
    pub fn resolve(path: &Path, read_only: bool) -> Result<Self> {
        // a missing path is OPEN_FAILED, never a loop failure
        File::open(path).map_err(|e| io_error(Error::OpenFailed, "open backing path", e))?;

        if !is_regular_file(path)? {
            return Ok(Self {
                path: path.to_owned(),
                _loop: None,
            });
        }

        let device = LoopDevice::create()?;
        device.attach(path, read_only)?;
        Ok(Self {
            path: device.path().to_owned(),
            _loop: Some(device),
        })
    }

    /// Block device path to place in a table line
    pub fn path(&self) -> &Path {
        &self.path
    }
}
