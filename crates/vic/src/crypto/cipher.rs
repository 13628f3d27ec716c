// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use aes::{
    cipher::{BlockCipher, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128, Aes192, Aes256,
};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use xts_mode::{get_tweak_default, Xts128};
use zeroize::Zeroizing;

use crate::{Error, Result, SECTOR_SIZE};

/// Block chaining and IV generation of a dm-crypt style cipher specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// `xts-plain64`: two AES keys, little-endian 64-bit sector number as tweak
    XtsPlain64,
    /// `cbc-plain64`: little-endian 64-bit sector number as IV
    CbcPlain64,
}

impl CipherMode {
    /// Parse a cipher name and mode pair such as `aes` / `xts-plain64`
    pub fn parse(cipher: &str, mode: &str) -> Result<Self> {
        if cipher != "aes" {
            raise!(Error::UnsupportedCipher);
        }
        match mode {
            "xts-plain64" => Ok(CipherMode::XtsPlain64),
            "cbc-plain64" => Ok(CipherMode::CbcPlain64),
            _ => raise!(Error::UnsupportedCipher),
        }
    }

    /// Parse a combined specification such as `aes-xts-plain64`
    pub fn from_spec(spec: &str) -> Result<Self> {
        match spec.split_once('-') {
            Some((cipher, mode)) => Self::parse(cipher, mode),
            None => raise!(Error::UnsupportedCipher),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherMode::XtsPlain64 => "xts-plain64",
            CipherMode::CbcPlain64 => "cbc-plain64",
        }
    }

    /// Whether a key of `len` bytes is valid for this mode
    pub fn accepts_key_len(&self, len: usize) -> bool {
        match self {
            CipherMode::XtsPlain64 => matches!(len, 32 | 48 | 64),
            CipherMode::CbcPlain64 => matches!(len, 16 | 24 | 32),
        }
    }
}

/// A keyed cipher transforming whole 512-byte sectors in place
pub struct SectorCipher {
    mode: CipherMode,
    key: Zeroizing<Vec<u8>>,
}

impl SectorCipher {
    pub fn new(mode: CipherMode, key: &[u8]) -> Result<Self> {
        if !mode.accepts_key_len(key.len()) {
            raise!(Error::UnsupportedCipher);
        }
        Ok(Self {
            mode,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Encrypt `buf`, whose first sector has number `first_sector`
    pub fn encrypt(&self, buf: &mut [u8], first_sector: u64) -> Result<()> {
        self.apply(buf, first_sector, Direction::Encrypt)
            .map_err(|_| Error::EncryptFailed)
    }

    /// Decrypt `buf`, whose first sector has number `first_sector`
    pub fn decrypt(&self, buf: &mut [u8], first_sector: u64) -> Result<()> {
        self.apply(buf, first_sector, Direction::Decrypt)
            .map_err(|_| Error::DecryptFailed)
    }

    fn apply(&self, buf: &mut [u8], first_sector: u64, direction: Direction) -> Result<()> {
        if buf.is_empty() || buf.len() % SECTOR_SIZE != 0 {
            raise!(Error::BadParameter);
        }
        let key = self.key.as_slice();
        match (self.mode, key.len()) {
            (CipherMode::XtsPlain64, 32) => xts_area::<Aes128>(key, buf, first_sector, direction),
            (CipherMode::XtsPlain64, 48) => xts_area::<Aes192>(key, buf, first_sector, direction),
            (CipherMode::XtsPlain64, 64) => xts_area::<Aes256>(key, buf, first_sector, direction),
            (CipherMode::CbcPlain64, 16) => cbc_sectors::<Aes128>(key, buf, first_sector, direction),
            (CipherMode::CbcPlain64, 24) => cbc_sectors::<Aes192>(key, buf, first_sector, direction),
            (CipherMode::CbcPlain64, 32) => cbc_sectors::<Aes256>(key, buf, first_sector, direction),
            _ => raise!(Error::UnsupportedCipher),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn xts_area<C>(key: &[u8], buf: &mut [u8], first_sector: u64, direction: Direction) -> Result<()>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + KeyInit,
{
    let (k1, k2) = key.split_at(key.len() / 2);
    let c1 = C::new_from_slice(k1).map_err(|_| Error::BadParameter)?;
    let c2 = C::new_from_slice(k2).map_err(|_| Error::BadParameter)?;
    let xts = Xts128::new(c1, c2);
    match direction {
        Direction::Encrypt => xts.encrypt_area(buf, SECTOR_SIZE, first_sector as u128, get_tweak_default),
        Direction::Decrypt => xts.decrypt_area(buf, SECTOR_SIZE, first_sector as u128, get_tweak_default),
    }
    Ok(())
}

fn cbc_sectors<C>(key: &[u8], buf: &mut [u8], first_sector: u64, direction: Direction) -> Result<()>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + KeyInit,
{
    for (i, sector) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&(first_sector + i as u64).to_le_bytes());
        match direction {
            Direction::Encrypt => {
                cbc::Encryptor::<C>::new_from_slices(key, &iv)
                    .map_err(|_| Error::BadParameter)?
                    .encrypt_padded_mut::<NoPadding>(sector, SECTOR_SIZE)
                    .map_err(|_| Error::EncryptFailed)?;
            }
            Direction::Decrypt => {
                cbc::Decryptor::<C>::new_from_slices(key, &iv)
                    .map_err(|_| Error::BadParameter)?
                    .decrypt_padded_mut::<NoPadding>(sector)
                    .map_err(|_| Error::DecryptFailed)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!(CipherMode::parse("aes", "xts-plain64").unwrap(), CipherMode::XtsPlain64);
        assert_eq!(CipherMode::parse("aes", "cbc-plain64").unwrap(), CipherMode::CbcPlain64);
        assert_eq!(CipherMode::parse("twofish", "xts-plain64"), Err(Error::UnsupportedCipher));
        assert_eq!(CipherMode::parse("aes", "ecb"), Err(Error::UnsupportedCipher));
        assert_eq!(CipherMode::from_spec("aes-xts-plain64").unwrap(), CipherMode::XtsPlain64);
        assert_eq!(CipherMode::from_spec("aes"), Err(Error::UnsupportedCipher));
    }

    #[test]
    fn test_key_lengths() {
        assert!(SectorCipher::new(CipherMode::XtsPlain64, &[0u8; 64]).is_ok());
        assert_eq!(
            SectorCipher::new(CipherMode::XtsPlain64, &[0u8; 16]).err(),
            Some(Error::UnsupportedCipher)
        );
        assert!(SectorCipher::new(CipherMode::CbcPlain64, &[0u8; 32]).is_ok());
    }

    #[test]
    fn test_sector_roundtrip() {
        for (mode, key_len) in [
            (CipherMode::XtsPlain64, 32),
            (CipherMode::XtsPlain64, 64),
            (CipherMode::CbcPlain64, 16),
            (CipherMode::CbcPlain64, 32),
        ] {
            let key: Vec<u8> = (0..key_len as u8).collect();
            let cipher = SectorCipher::new(mode, &key).unwrap();
            let plain: Vec<u8> = (0..4 * SECTOR_SIZE).map(|i| (i % 251) as u8).collect();

            let mut buf = plain.clone();
            cipher.encrypt(&mut buf, 7).unwrap();
            assert_ne!(buf, plain);

            // sectors are independent: re-encrypting one sector alone gives the same result
            let mut second = plain[SECTOR_SIZE..2 * SECTOR_SIZE].to_vec();
            cipher.encrypt(&mut second, 8).unwrap();
            assert_eq!(second, buf[SECTOR_SIZE..2 * SECTOR_SIZE]);

            cipher.decrypt(&mut buf, 7).unwrap();
            assert_eq!(buf, plain);
        }
    }

    #[test]
    fn test_partial_sector_rejected() {
        let cipher = SectorCipher::new(CipherMode::XtsPlain64, &[1u8; 64]).unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(cipher.encrypt(&mut buf, 0), Err(Error::EncryptFailed));
    }
}
