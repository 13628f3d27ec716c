// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use super::HashType;
use crate::{Error, Result};

/// Cost parameters of an Argon2 derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Number of passes
    pub time: u32,
    /// Memory cost in KiB
    pub memory: u32,
    /// Degree of parallelism (lanes)
    pub cpus: u32,
}

/// A password based key derivation function with its cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kdf {
    Pbkdf2 { hash: HashType, iterations: u32 },
    Argon2i(Argon2Params),
    Argon2id(Argon2Params),
}

impl Kdf {
    /// Name used for this function in LUKS2 metadata
    pub fn name(&self) -> &'static str {
        match self {
            Kdf::Pbkdf2 { .. } => "pbkdf2",
            Kdf::Argon2i(_) => "argon2i",
            Kdf::Argon2id(_) => "argon2id",
        }
    }

    /// Fill `out` with key material derived from `password` and `salt`
    pub fn derive(&self, password: &[u8], salt: &[u8], out: &mut [u8]) -> Result<()> {
        match *self {
            Kdf::Pbkdf2 { hash, iterations } => pbkdf2(hash, password, salt, iterations, out),
            Kdf::Argon2i(params) => argon2(Algorithm::Argon2i, params, password, salt, out),
            Kdf::Argon2id(params) => argon2(Algorithm::Argon2id, params, password, salt, out),
        }
    }
}

fn pbkdf2(hash: HashType, password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) -> Result<()> {
    if iterations == 0 || out.is_empty() {
        raise!(Error::Pbkdf2Failed);
    }
    match hash {
        HashType::Sha1 => pbkdf2_hmac::<Sha1>(password, salt, iterations, out),
        HashType::Sha256 => pbkdf2_hmac::<Sha256>(password, salt, iterations, out),
        HashType::Sha384 => pbkdf2_hmac::<Sha384>(password, salt, iterations, out),
        HashType::Sha512 => pbkdf2_hmac::<Sha512>(password, salt, iterations, out),
    }
    Ok(())
}

fn argon2(algorithm: Algorithm, params: Argon2Params, password: &[u8], salt: &[u8], out: &mut [u8]) -> Result<()> {
    let failed = match algorithm {
        Algorithm::Argon2i => Error::Argon2iFailed,
        _ => Error::Argon2idFailed,
    };

    let params = Params::new(params.memory, params.time, params.cpus, Some(out.len())).map_err(|e| {
        log::debug!("argon2 parameters: {e}");
        failed
    })?;

    Argon2::new(algorithm, Version::V0x13, params)
        .hash_password_into(password, salt, out)
        .map_err(|e| {
            log::debug!("argon2: {e}");
            failed
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: Argon2Params = Argon2Params {
        time: 1,
        memory: 32,
        cpus: 1,
    };

    #[test]
    fn test_pbkdf2_sha1_vector() {
        let kdf = Kdf::Pbkdf2 {
            hash: HashType::Sha1,
            iterations: 1,
        };
        let mut out = [0u8; 20];
        kdf.derive(b"password", b"salt", &mut out).unwrap();
        assert_eq!(hex::encode(out), "0c60c80f961f0e71f3a9b524af6012062fe037a6");
    }

    #[test]
    fn test_pbkdf2_rejects_zero_iterations() {
        let kdf = Kdf::Pbkdf2 {
            hash: HashType::Sha256,
            iterations: 0,
        };
        let mut out = [0u8; 32];
        assert_eq!(kdf.derive(b"pw", b"salt", &mut out), Err(Error::Pbkdf2Failed));
    }

    #[test]
    fn test_argon2_variants() {
        let salt = [7u8; 32];
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        let mut c = [0u8; 64];
        Kdf::Argon2i(SMALL).derive(b"pw", &salt, &mut a).unwrap();
        Kdf::Argon2id(SMALL).derive(b"pw", &salt, &mut b).unwrap();
        Kdf::Argon2id(SMALL).derive(b"pw", &salt, &mut c).unwrap();
        assert_ne!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_argon2_bad_parameters() {
        let bad = Argon2Params {
            time: 0,
            memory: 32,
            cpus: 1,
        };
        let mut out = [0u8; 32];
        assert_eq!(Kdf::Argon2i(bad).derive(b"pw", &[1u8; 16], &mut out), Err(Error::Argon2iFailed));
        assert_eq!(Kdf::Argon2id(bad).derive(b"pw", &[1u8; 16], &mut out), Err(Error::Argon2idFailed));
    }
}
