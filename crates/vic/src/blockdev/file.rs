// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Block devices backed by a regular file or a block special file

use std::{
    fs::{self, File, OpenOptions},
    os::{
        fd::AsRawFd,
        unix::fs::{FileExt, FileTypeExt, OpenOptionsExt},
    },
    path::{Path, PathBuf},
};

use linux_raw_sys::ioctl::BLKGETSIZE64;
use log::debug;
use nix::libc;

use super::{check_block_size, check_transfer, BlockDevice, DEFAULT_BLOCK_SIZE};
use crate::{error::io_error, Error, Result};

/// How a [`FileDevice`] is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads only
    ReadOnly,
    /// Reads and writes of an existing file or device
    ReadWrite,
    /// Create (or truncate) a regular file, then read and write it
    Create,
}

/// A device node or image file addressed in fixed-size blocks
#[derive(Debug)]
pub struct FileDevice {
    /// Path the device was opened from
    path: PathBuf,
    /// Open handle
    file: File,
    /// Mode the handle was opened with
    mode: OpenMode,
    /// Current block size in bytes
    block_size: usize,
}

impl FileDevice {
    /// Open `path` with the given mode and block size (`0` selects 512 bytes)
    ///
    /// Fails with [`Error::NotBlockMultiple`] when the device size is not a multiple
    /// of the block size.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let block_size = if block_size == 0 { DEFAULT_BLOCK_SIZE } else { block_size };
        check_block_size(block_size)?;

        let mut options = OpenOptions::new();
        match mode {
            OpenMode::ReadOnly => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Create => options.read(true).write(true).create(true).truncate(true).mode(0o600),
        };

        let file = options
            .open(path)
            .map_err(|e| io_error(Error::OpenFailed, &format!("open {}", path.display()), e))?;

        let device = Self {
            path: path.to_owned(),
            file,
            mode,
            block_size,
        };

        if device.byte_size()? % block_size as u64 != 0 {
            raise!(Error::NotBlockMultiple);
        }

        debug!("opened {} ({:?}, block size {})", path.display(), mode, block_size);
        Ok(device)
    }

    /// Mode this device was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Whether the handle allows writes
    pub fn is_writable(&self) -> bool {
        self.mode != OpenMode::ReadOnly
    }
}

/// Size in bytes of the file or block device at `path`
pub fn device_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    let file = File::open(path.as_ref()).map_err(|e| io_error(Error::OpenFailed, "open", e))?;
    file_size(&file)
}

fn file_size(file: &File) -> Result<u64> {
    let meta = file.metadata().map_err(|e| io_error(Error::StatFailed, "stat", e))?;

    if meta.file_type().is_block_device() {
        let mut size: u64 = 0;
        let res = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if res < 0 {
            let err = std::io::Error::last_os_error();
            return Err(io_error(Error::IoctlFailed, "BLKGETSIZE64", err));
        }
        Ok(size)
    } else {
        Ok(meta.len())
    }
}

impl BlockDevice for FileDevice {
    fn get(&mut self, blkno: u64, buf: &mut [u8]) -> Result<()> {
        check_transfer(buf.len(), self.block_size)?;
        let offset = blkno.checked_mul(self.block_size as u64).ok_or(Error::OutOfBounds)?;
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| io_error(Error::ReadFailed, &format!("read {}", self.path.display()), e))
    }

    fn put(&mut self, blkno: u64, buf: &[u8]) -> Result<()> {
        check_transfer(buf.len(), self.block_size)?;
        if !self.is_writable() {
            raise!(Error::WriteFailed);
        }
        let offset = blkno.checked_mul(self.block_size as u64).ok_or(Error::OutOfBounds)?;
        self.file
            .write_all_at(buf, offset)
            .map_err(|e| io_error(Error::WriteFailed, &format!("write {}", self.path.display()), e))
    }

    fn byte_size(&self) -> Result<u64> {
        file_size(&self.file)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        check_block_size(block_size)?;
        if self.byte_size()? % block_size as u64 != 0 {
            raise!(Error::NotBlockMultiple);
        }
        self.block_size = block_size;
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Whether `path` names a regular file (as opposed to a block device node)
pub(crate) fn is_regular_file(path: &Path) -> Result<bool> {
    let meta = fs::metadata(path).map_err(|e| io_error(Error::StatFailed, "stat", e))?;
    Ok(meta.file_type().is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockdev::sparsefile;

    #[test]
    fn test_open_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        sparsefile::create(&image, 64 * 1024).unwrap();

        let mut dev = FileDevice::open(&image, OpenMode::ReadWrite, 0).unwrap();
        assert_eq!(dev.block_size(), 512);
        assert_eq!(dev.byte_size().unwrap(), 64 * 1024);
        assert_eq!(dev.num_blocks().unwrap(), 128);

        let block = [0x5au8; 1024];
        dev.put(3, &block).unwrap();
        let mut back = [0u8; 1024];
        dev.get(3, &mut back).unwrap();
        assert_eq!(back, block);

        dev.set_block_size(4096).unwrap();
        assert_eq!(dev.num_blocks().unwrap(), 16);
    }

    #[test]
    fn test_not_block_multiple() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("odd.img");
        sparsefile::create(&image, 4096 + 512).unwrap();

        assert!(FileDevice::open(&image, OpenMode::ReadOnly, 512).is_ok());
        assert_eq!(
            FileDevice::open(&image, OpenMode::ReadOnly, 4096).unwrap_err(),
            Error::NotBlockMultiple
        );
        assert_eq!(
            FileDevice::open(&image, OpenMode::ReadOnly, 1000).unwrap_err(),
            Error::BadParameter
        );
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("ro.img");
        sparsefile::create(&image, 4096).unwrap();

        let mut dev = FileDevice::open(&image, OpenMode::ReadOnly, 512).unwrap();
        assert!(!dev.is_writable());
        assert_eq!(dev.put(0, &[0u8; 512]), Err(Error::WriteFailed));
    }

    #[test]
    fn test_create_grows_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("hash.img");

        let mut dev = FileDevice::open(&image, OpenMode::Create, 4096).unwrap();
        assert_eq!(dev.byte_size().unwrap(), 0);
        dev.put(2, &[1u8; 4096]).unwrap();
        assert_eq!(dev.byte_size().unwrap(), 3 * 4096);
        assert_eq!(device_size(&image).unwrap(), 3 * 4096);
    }

    #[test]
    fn test_missing_file() {
        assert_eq!(
            FileDevice::open("/nonexistent/vic/device", OpenMode::ReadOnly, 0).unwrap_err(),
            Error::OpenFailed
        );
    }
}
