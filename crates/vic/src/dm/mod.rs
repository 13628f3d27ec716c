// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Device-mapper activation
//!
//! The engines describe mappings as kernel table lines ([`CryptTarget`],
//! [`VerityTarget`]) and hand them to a [`DeviceMapper`]. [`Dmsetup`] submits
//! them through the `dmsetup` tool, [`mock::MockMapper`] records them.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use zeroize::Zeroizing;

use crate::{Key, Result, SECTOR_SIZE};

mod dmsetup;
pub mod mock;

pub use dmsetup::Dmsetup;

/// Creates and removes device-mapper devices
pub trait DeviceMapper {
    /// Make `path` usable as a backing device, returning the block device to reference
    fn attach(&mut self, path: &Path, read_only: bool) -> Result<PathBuf>;

    /// Create device `name` from a single-line table
    fn create(&mut self, name: &str, table: &str, read_only: bool) -> Result<()>;

    /// Remove device `name`
    fn remove(&mut self, name: &str) -> Result<()>;

    /// Whether device `name` currently exists
    fn exists(&self, name: &str) -> bool;
}

/// A `crypt` target covering a whole payload
pub struct CryptTarget {
    /// Length of the mapping in 512-byte sectors
    pub sectors: u64,
    /// dm-crypt cipher specification, e.g. `aes-xts-plain64`
    pub cipher: String,
    pub key: Key,
    /// Sector number the IV counts from
    pub iv_offset: u64,
    pub device: PathBuf,
    /// Start of the payload on `device`, in 512-byte sectors
    pub offset: u64,
    /// Encryption sector size when other than 512
    pub sector_size: Option<u32>,
}

impl CryptTarget {
    /// Kernel table line; holds the key in hex
    pub fn table(&self) -> Zeroizing<String> {
        let key_hex = Zeroizing::new(hex::encode(self.key.as_bytes()));
        let mut line = format!(
            "0 {} crypt {} {} {} {} {}",
            self.sectors,
            self.cipher,
            key_hex.as_str(),
            self.iv_offset,
            self.device.display(),
            self.offset
        );
        if let Some(size) = self.sector_size.filter(|s| *s as usize != SECTOR_SIZE) {
            line.push_str(&format!(" 1 sector_size:{size}"));
        }
        Zeroizing::new(line)
    }
}

impl fmt::Debug for CryptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptTarget")
            .field("sectors", &self.sectors)
            .field("cipher", &self.cipher)
            .field("device", &self.device)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// A `verity` target over a data device and its hash tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerityTarget {
    pub data_device: PathBuf,
    pub hash_device: PathBuf,
    pub data_block_size: u32,
    pub hash_block_size: u32,
    pub data_blocks: u64,
    /// First block of the tree on the hash device
    pub hash_start: u64,
    pub algorithm: String,
    pub root_hash: Vec<u8>,
    pub salt: Vec<u8>,
}

impl fmt::Display for VerityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sectors = self.data_blocks * (self.data_block_size as u64 / SECTOR_SIZE as u64);
        let salt = if self.salt.is_empty() {
            "-".to_owned()
        } else {
            hex::encode(&self.salt)
        };
        write!(
            f,
            "0 {} verity 1 {} {} {} {} {} {} {} {} {}",
            sectors,
            self.data_device.display(),
            self.hash_device.display(),
            self.data_block_size,
            self.hash_block_size,
            self.data_blocks,
            self.hash_start,
            self.algorithm,
            hex::encode(&self.root_hash),
            salt
        )
    }
}
