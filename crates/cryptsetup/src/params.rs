// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Format parameters in the shape of libcryptsetup's `crypt_params_*` structures

use std::path::PathBuf;

use nix::errno::Errno;
use vic::{crypto::Argon2Params, luks::luks2::Pbkdf};

/// Key derivation settings (`struct crypt_pbkdf_type`); PBKDF2 uses the volume hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbkdfType {
    /// `pbkdf2`, `argon2i` or `argon2id`
    pub kind: String,
    /// PBKDF2 iterations or Argon2 passes (0 selects the default)
    pub iterations: u32,
    /// Argon2 memory cost in KiB (0 selects the default)
    pub max_memory_kb: u32,
    /// Argon2 lanes (0 selects the default)
    pub parallel_threads: u32,
}

impl PbkdfType {
    /// LUKS2 key slot settings
    pub(crate) fn to_pbkdf(&self) -> Result<Pbkdf, Errno> {
        let argon2 = Argon2Params {
            time: self.iterations,
            memory: self.max_memory_kb,
            cpus: self.parallel_threads,
        };
        match self.kind.as_str() {
            "pbkdf2" => Ok(Pbkdf::Pbkdf2 {
                iterations: self.iterations,
            }),
            "argon2i" => Ok(Pbkdf::Argon2i(argon2)),
            "argon2id" => Ok(Pbkdf::Argon2id(argon2)),
            _ => Err(Errno::EINVAL),
        }
    }
}

/// `struct crypt_params_luks1`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Luks1Params {
    pub hash: Option<String>,
    /// Detached payload device; not supported
    pub data_device: Option<PathBuf>,
}

/// `struct crypt_params_luks2`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Luks2Params {
    pub pbkdf: Option<PbkdfType>,
    /// dm-integrity algorithm; not supported
    pub integrity: Option<String>,
    /// Encryption sector size; only 0 or 512
    pub sector_size: u32,
    /// Detached payload device; not supported
    pub data_device: Option<PathBuf>,
    pub label: Option<String>,
    pub subsystem: Option<String>,
}

/// `struct crypt_params_verity`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerityParams {
    /// Hash algorithm, `sha256` when absent
    pub hash_name: Option<String>,
    /// Device the tree covers; the handle's device holds the tree
    pub data_device: PathBuf,
    /// Random salt when absent
    pub salt: Option<Vec<u8>>,
    /// Leave block 0 of the hash device free of a superblock
    pub no_superblock: bool,
}

/// Parameters passed to [`crate::CryptDevice::format`] and [`crate::CryptDevice::load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Params {
    Luks1(Luks1Params),
    Luks2(Luks2Params),
    Verity(VerityParams),
    Integrity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf_type() {
        let t = PbkdfType {
            kind: "argon2i".into(),
            iterations: 3,
            max_memory_kb: 1024,
            parallel_threads: 2,
        };
        assert_eq!(
            t.to_pbkdf().unwrap(),
            Pbkdf::Argon2i(Argon2Params {
                time: 3,
                memory: 1024,
                cpus: 2
            })
        );
        let t = PbkdfType {
            kind: "scrypt".into(),
            ..t
        };
        assert_eq!(t.to_pbkdf().unwrap_err(), Errno::EINVAL);
    }
}
