// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use zerocopy::*;

use crate::{crypto::HashType, cstr, set_cstr, Error, Result};

/// `verity\0\0`
pub const SIGNATURE: [u8; 8] = *b"verity\0\0";
/// Largest salt the superblock can hold
pub const MAX_SALT_SIZE: usize = 256;

/// dm-verity superblock, stored in the first block of the hash device (little endian)
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Superblock {
    pub signature: [u8; 8],
    /// Format version, 1
    pub version: U32<LittleEndian>,
    /// 1 for the salt-first hashing of format version 1
    pub hash_type: U32<LittleEndian>,
    pub uuid: [u8; 16],
    /// Hash algorithm name, nul padded
    pub algorithm: [u8; 32],
    pub data_block_size: U32<LittleEndian>,
    pub hash_block_size: U32<LittleEndian>,
    /// Number of data blocks covered by the tree
    pub data_blocks: U64<LittleEndian>,
    pub salt_size: U16<LittleEndian>,
    pub pad1: [u8; 6],
    pub salt: [u8; MAX_SALT_SIZE],
    pub pad2: [u8; 168],
}

const _: () = assert!(core::mem::offset_of!(Superblock, version) == 8);
const _: () = assert!(core::mem::offset_of!(Superblock, hash_type) == 12);
const _: () = assert!(core::mem::offset_of!(Superblock, uuid) == 16);
const _: () = assert!(core::mem::offset_of!(Superblock, algorithm) == 32);
const _: () = assert!(core::mem::offset_of!(Superblock, data_block_size) == 64);
const _: () = assert!(core::mem::offset_of!(Superblock, hash_block_size) == 68);
const _: () = assert!(core::mem::offset_of!(Superblock, data_blocks) == 72);
const _: () = assert!(core::mem::offset_of!(Superblock, salt_size) == 80);
const _: () = assert!(core::mem::offset_of!(Superblock, pad1) == 82);
const _: () = assert!(core::mem::offset_of!(Superblock, salt) == 88);
const _: () = assert!(core::mem::offset_of!(Superblock, pad2) == 344);
const _: () = assert!(core::mem::size_of::<Superblock>() == 512);

impl Superblock {
    pub(super) fn new(
        uuid: &uuid::Uuid,
        hash: HashType,
        block_size: u32,
        data_blocks: u64,
        salt: &[u8],
    ) -> Result<Self> {
        if salt.len() > MAX_SALT_SIZE {
            raise!(Error::BadParameter);
        }
        let mut sb = Self::new_zeroed();
        sb.signature = SIGNATURE;
        sb.version.set(1);
        sb.hash_type.set(1);
        sb.uuid = *uuid.as_bytes();
        set_cstr(&mut sb.algorithm, hash.name())?;
        sb.data_block_size.set(block_size);
        sb.hash_block_size.set(block_size);
        sb.data_blocks.set(data_blocks);
        sb.salt_size.set(salt.len() as u16);
        sb.salt[..salt.len()].copy_from_slice(salt);
        Ok(sb)
    }

    /// Parse a superblock, [`Error::BadSignature`] unless it starts with `verity\0\0`
    pub fn from_block(block: &[u8]) -> Result<Self> {
        let (sb, _) = Self::read_from_prefix(block).map_err(|_| Error::BufferTooSmall)?;
        if sb.signature != SIGNATURE {
            raise!(Error::BadSignature);
        }
        Ok(sb)
    }

    pub fn uuid(&self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.uuid)
    }

    pub fn algorithm(&self) -> Result<&str> {
        cstr(&self.algorithm)
    }

    pub fn hash(&self) -> Result<HashType> {
        self.algorithm()?.parse()
    }

    pub fn salt(&self) -> Result<&[u8]> {
        let len = self.salt_size.get() as usize;
        if len > MAX_SALT_SIZE {
            raise!(Error::BadParameter);
        }
        Ok(&self.salt[..len])
    }
}
