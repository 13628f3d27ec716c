// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Fixed-capacity master key buffer

use std::{fmt, fs, path::Path};

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{crypto::random, error::io_error, Error, Result};

/// A volume master key of at most [`Key::MAX_SIZE`] bytes, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    buf: [u8; Key::MAX_SIZE],
    len: usize,
}

impl Key {
    /// Capacity of a key in bytes
    pub const MAX_SIZE: usize = 64;

    /// Copy `bytes` into a new key
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > Self::MAX_SIZE {
            raise!(Error::KeyTooBig);
        }
        if bytes.is_empty() {
            raise!(Error::BadParameter);
        }
        let mut buf = [0u8; Self::MAX_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { buf, len: bytes.len() })
    }

    /// Generate a random key of `len` bytes
    pub fn random(len: usize) -> Result<Self> {
        if len > Self::MAX_SIZE {
            raise!(Error::KeyTooBig);
        }
        if len == 0 {
            raise!(Error::BadParameter);
        }
        let mut buf = [0u8; Self::MAX_SIZE];
        random::fill(&mut buf[..len]);
        Ok(Self { buf, len })
    }

    /// Read a raw key file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let size = fs::metadata(path)
            .map_err(|e| io_error(Error::StatFailed, "stat key file", e))?
            .len();
        if size > Self::MAX_SIZE as u64 {
            raise!(Error::KeyTooBig);
        }
        let data = zeroize::Zeroizing::new(
            fs::read(path).map_err(|e| io_error(Error::ReadFailed, "read key file", e))?,
        );
        Self::from_slice(&data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key").field("len", &self.len).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_limits() {
        let key = Key::from_slice(&[3u8; 32]).unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(key.as_bytes(), &[3u8; 32]);
        assert_eq!(Key::from_slice(&[0u8; 65]).unwrap_err(), Error::KeyTooBig);
        assert_eq!(Key::from_slice(&[]).unwrap_err(), Error::BadParameter);
    }

    #[test]
    fn test_random_keys_differ() {
        let a = Key::random(64).unwrap();
        let b = Key::random(64).unwrap();
        assert_ne!(a, b);
        assert_eq!(Key::random(80).unwrap_err(), Error::KeyTooBig);
    }

    #[test]
    fn test_debug_hides_material() {
        let key = Key::from_slice(&[0xaau8; 16]).unwrap();
        let text = format!("{key:?}");
        assert!(!text.contains("170"));
        assert!(text.contains("16"));
    }

    #[test]
    fn test_load_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.key");
        let big = dir.path().join("big.key");
        fs::write(&good, [9u8; 64]).unwrap();
        fs::write(&big, [9u8; 65]).unwrap();

        assert_eq!(Key::load(&good).unwrap().as_bytes(), &[9u8; 64]);
        assert_eq!(Key::load(&big).unwrap_err(), Error::KeyTooBig);
        assert_eq!(Key::load(dir.path().join("missing")).unwrap_err(), Error::StatFailed);
    }
}
