// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{fmt, str::FromStr};

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::{Error, Result};

/// Hash algorithms accepted in `hash-spec` fields and verity superblocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashType {
    /// Largest digest produced by any supported algorithm
    pub const MAX_SIZE: usize = 64;

    /// Canonical lower-case name as stored on disk
    pub fn name(&self) -> &'static str {
        match self {
            HashType::Sha1 => "sha1",
            HashType::Sha256 => "sha256",
            HashType::Sha384 => "sha384",
            HashType::Sha512 => "sha512",
        }
    }

    /// Digest size in bytes
    pub fn size(&self) -> usize {
        match self {
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
            HashType::Sha384 => 48,
            HashType::Sha512 => 64,
        }
    }

    /// Hash the concatenation of `parts`
    pub fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            HashType::Sha1 => digest_parts::<Sha1>(parts),
            HashType::Sha256 => digest_parts::<Sha256>(parts),
            HashType::Sha384 => digest_parts::<Sha384>(parts),
            HashType::Sha512 => digest_parts::<Sha512>(parts),
        }
    }
}

fn digest_parts<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

impl FromStr for HashType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashType::Sha1),
            "sha256" => Ok(HashType::Sha256),
            "sha384" => Ok(HashType::Sha384),
            "sha512" => Ok(HashType::Sha512),
            _ => raise!(Error::UnsupportedDigestType),
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_sizes() {
        assert_eq!("sha256".parse::<HashType>().unwrap(), HashType::Sha256);
        assert_eq!("SHA1".parse::<HashType>().unwrap(), HashType::Sha1);
        assert_eq!("md5".parse::<HashType>().unwrap_err(), Error::UnsupportedDigestType);
        assert_eq!(HashType::Sha384.size(), 48);
        assert_eq!(HashType::Sha512.to_string(), "sha512");
    }

    #[test]
    fn test_digest_of_parts() {
        let whole = HashType::Sha256.digest(&[b"abc"]);
        let split = HashType::Sha256.digest(&[b"a", b"", b"bc"]);
        assert_eq!(whole, split);
        assert_eq!(
            hex::encode(whole),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(HashType::Sha1.digest(&[b"abc"]).len(), 20);
    }
}
