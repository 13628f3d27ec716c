// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory block device for testing.
//!
//! This module provides a memory backed device that can be used to exercise the
//! engines without touching real disks or image files.

use zeroize::Zeroize;

use super::{check_block_size, check_transfer, BlockDevice};
use crate::{Error, Result};

/// Represents a device held entirely in memory.
///
/// A fixed device rejects accesses past its end like a disk would. A growable
/// device extends on writes past the end like a regular file does.
#[derive(Debug, Clone)]
pub struct MemDevice {
    data: Vec<u8>,
    block_size: usize,
    growable: bool,
}

impl MemDevice {
    /// Creates a zero-filled device of `size` bytes
    pub fn new(size: usize, block_size: usize) -> Result<Self> {
        check_block_size(block_size)?;
        if size % block_size != 0 {
            raise!(Error::NotBlockMultiple);
        }
        Ok(Self {
            data: vec![0u8; size],
            block_size,
            growable: false,
        })
    }

    /// Creates an empty device that grows as blocks are written past its end
    pub fn growable(block_size: usize) -> Result<Self> {
        check_block_size(block_size)?;
        Ok(Self {
            data: Vec::new(),
            block_size,
            growable: true,
        })
    }

    /// Wraps existing contents
    pub fn from_bytes(data: Vec<u8>, block_size: usize) -> Result<Self> {
        check_block_size(block_size)?;
        if data.len() % block_size != 0 {
            raise!(Error::NotBlockMultiple);
        }
        Ok(Self {
            data,
            block_size,
            growable: false,
        })
    }

    /// Raw contents of the device
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw contents, for corrupting devices in tests
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, blkno: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let start = blkno
            .checked_mul(self.block_size as u64)
            .and_then(|s| usize::try_from(s).ok())
            .ok_or(Error::OutOfBounds)?;
        let end = start.checked_add(len).ok_or(Error::OutOfBounds)?;
        Ok(start..end)
    }
}

impl Drop for MemDevice {
    fn drop(&mut self) {
        // contents may include key material
        self.data.zeroize();
    }
}

impl BlockDevice for MemDevice {
    fn get(&mut self, blkno: u64, buf: &mut [u8]) -> Result<()> {
        check_transfer(buf.len(), self.block_size)?;
        let range = self.range(blkno, buf.len())?;
        if range.end > self.data.len() {
            raise!(Error::ReadFailed);
        }
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn put(&mut self, blkno: u64, buf: &[u8]) -> Result<()> {
        check_transfer(buf.len(), self.block_size)?;
        let range = self.range(blkno, buf.len())?;
        if range.end > self.data.len() {
            if !self.growable {
                raise!(Error::WriteFailed);
            }
            self.data.resize(range.end, 0);
        }
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn byte_size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        check_block_size(block_size)?;
        if self.data.len() % block_size != 0 {
            raise!(Error::NotBlockMultiple);
        }
        self.block_size = block_size;
        Ok(())
    }
}
