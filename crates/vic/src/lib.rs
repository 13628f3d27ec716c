// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! LUKS and dm-verity engine operating directly on block devices
//!
//! This crate reads and writes LUKS1 and LUKS2 headers, manages their key slots
//! (password based key derivation, anti-forensic splitting, master key recovery and
//! rotation) and builds dm-verity hash trees. Device-mapper activation is delegated
//! to a [`dm::DeviceMapper`] implementation.

#[doc(hidden)]
pub use log as __log;

#[macro_use]
mod error;

pub mod af;
pub mod blockdev;
pub mod crypto;
pub mod dm;
pub mod key;
pub mod luks;
pub mod verity;

pub use blockdev::{BlockDevice, FileDevice, MemDevice, OpenMode};
pub use error::{Error, Result};
pub use key::Key;

/// Size of the sectors LUKS headers and key material are addressed in
pub const SECTOR_SIZE: usize = 512;

/// Round `value` up to the next multiple of `align`
pub(crate) fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Interpret a nul-padded on-disk byte field as a string
pub(crate) fn cstr(bytes: &[u8]) -> Result<&str> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).map_err(|_| Error::BadParameter)
}

/// Copy `value` into a nul-padded on-disk byte field, leaving room for the terminator
pub(crate) fn set_cstr(field: &mut [u8], value: &str) -> Result<()> {
    if value.len() >= field.len() {
        raise!(Error::BadParameter);
    }
    field.fill(0);
    field[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(2056, 2048), 4096);
    }

    #[test]
    fn test_cstr_fields() {
        let mut field = [0xffu8; 8];
        set_cstr(&mut field, "aes").unwrap();
        assert_eq!(&field, b"aes\0\0\0\0\0");
        assert_eq!(cstr(&field).unwrap(), "aes");
        assert_eq!(set_cstr(&mut field, "12345678"), Err(Error::BadParameter));
    }
}
