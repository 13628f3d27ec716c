// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Fixed block-size random access devices
//!
//! The engines never talk to files directly: they read and write whole blocks through
//! the [`BlockDevice`] trait. [`FileDevice`] backs it with a regular file or a block
//! special file, [`MemDevice`] with memory for hermetic tests.

use std::path::Path;

use crate::{Error, Result};

mod file;
pub mod loopback;
mod mem;
pub mod sparsefile;

pub use file::{device_size, FileDevice, OpenMode};
pub(crate) use file::is_regular_file;
pub use mem::MemDevice;

/// Block size used when the caller does not ask for one
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Random access to a device in units of whole blocks
pub trait BlockDevice {
    /// Read `buf.len() / block_size()` blocks starting at block `blkno`
    fn get(&mut self, blkno: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf.len() / block_size()` blocks starting at block `blkno`
    fn put(&mut self, blkno: u64, buf: &[u8]) -> Result<()>;

    /// Size of the device in bytes
    fn byte_size(&self) -> Result<u64>;

    /// Size of one block in bytes (always a power of two)
    fn block_size(&self) -> usize;

    /// Change the block size used to address the device
    fn set_block_size(&mut self, block_size: usize) -> Result<()>;

    /// Number of whole blocks on the device
    fn num_blocks(&self) -> Result<u64> {
        Ok(self.byte_size()? / self.block_size() as u64)
    }

    /// Filesystem path of the device, if it has one
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Validate a block size: non-zero and a power of two
pub(crate) fn check_block_size(block_size: usize) -> Result<()> {
    if !block_size.is_power_of_two() {
        raise!(Error::BadParameter);
    }
    Ok(())
}

/// Validate that a transfer buffer holds whole blocks, returning the block count
pub(crate) fn check_transfer(buf_len: usize, block_size: usize) -> Result<u64> {
    if buf_len == 0 || buf_len % block_size != 0 {
        raise!(Error::BadParameter);
    }
    Ok((buf_len / block_size) as u64)
}

/// Read `buf.len()` bytes at byte `offset`; both must be multiples of the device block size
pub(crate) fn read_bytes<D: BlockDevice + ?Sized>(dev: &mut D, offset: u64, buf: &mut [u8]) -> Result<()> {
    let block_size = dev.block_size() as u64;
    if offset % block_size != 0 {
        raise!(Error::BadParameter);
    }
    dev.get(offset / block_size, buf)
}

/// Write `buf` at byte `offset`; both must be multiples of the device block size
pub(crate) fn write_bytes<D: BlockDevice + ?Sized>(dev: &mut D, offset: u64, buf: &[u8]) -> Result<()> {
    let block_size = dev.block_size() as u64;
    if offset % block_size != 0 {
        raise!(Error::BadParameter);
    }
    dev.put(offset / block_size, buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_validation() {
        assert!(check_block_size(512).is_ok());
        assert!(check_block_size(4096).is_ok());
        assert_eq!(check_block_size(0), Err(Error::BadParameter));
        assert_eq!(check_block_size(1000), Err(Error::BadParameter));
    }

    #[test]
    fn test_transfer_validation() {
        assert_eq!(check_transfer(1024, 512), Ok(2));
        assert_eq!(check_transfer(0, 512), Err(Error::BadParameter));
        assert_eq!(check_transfer(700, 512), Err(Error::BadParameter));
    }

    #[test]
    fn test_byte_helpers() {
        let mut dev = MemDevice::new(4096, 512).unwrap();
        write_bytes(&mut dev, 1024, &[7u8; 512]).unwrap();
        let mut buf = [0u8; 512];
        read_bytes(&mut dev, 1024, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 512]);
        assert_eq!(read_bytes(&mut dev, 100, &mut buf), Err(Error::BadParameter));
    }
}
