// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! libcryptsetup-style device handles
//!
//! [`CryptDevice`] follows the `crypt_init` / `crypt_format` / `crypt_load` /
//! `crypt_keyslot_add_by_key` / `crypt_free` lifecycle on top of [`vic`]. The
//! device is opened read-only and reopened read-write on the first call that
//! modifies it. Failures are reported as [`Errno`] values.

use std::path::{Path, PathBuf};

use log::{debug, info};
use nix::errno::Errno;
use vic::{
    crypto::HashType,
    luks::{self, luks1, luks2, Header, KeyslotOptions},
    verity, FileDevice, Key, OpenMode,
};

pub mod errno;
mod params;

pub use params::{Luks1Params, Luks2Params, Params, PbkdfType, VerityParams};

pub const CRYPT_LUKS1: &str = "LUKS1";
pub const CRYPT_LUKS2: &str = "LUKS2";
pub const CRYPT_VERITY: &str = "VERITY";
pub const CRYPT_INTEGRITY: &str = "INTEGRITY";

/// Volume type bound to a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Luks1,
    Luks2,
    Verity,
}

impl Kind {
    fn parse(kind: &str) -> Result<Self, Errno> {
        match kind {
            CRYPT_LUKS1 => Ok(Kind::Luks1),
            CRYPT_LUKS2 => Ok(Kind::Luks2),
            CRYPT_VERITY => Ok(Kind::Verity),
            CRYPT_INTEGRITY => Err(Errno::ENOTSUP),
            _ => Err(Errno::EINVAL),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Kind::Luks1 => CRYPT_LUKS1,
            Kind::Luks2 => CRYPT_LUKS2,
            Kind::Verity => CRYPT_VERITY,
        }
    }
}

/// An open device and what is known about the volume on it
#[derive(Debug)]
pub struct CryptDevice {
    path: PathBuf,
    device: FileDevice,
    kind: Option<Kind>,
    uuid: Option<String>,
    /// Set by `format`, used by later key slot additions
    volume_key: Option<Key>,
    volume_key_size: Option<usize>,
    verity_root_hash: Option<Vec<u8>>,
    pbkdf: Option<PbkdfType>,
}

impl CryptDevice {
    /// Open `path` read-only (`crypt_init`)
    pub fn init<P: AsRef<Path>>(path: P) -> Result<Self, Errno> {
        let path = path.as_ref();
        let device = FileDevice::open(path, OpenMode::ReadOnly, 0).map_err(errno::from_error)?;
        Ok(Self {
            path: path.to_owned(),
            device,
            kind: None,
            uuid: None,
            volume_key: None,
            volume_key_size: None,
            verity_root_hash: None,
            pbkdf: None,
        })
    }

    /// Key derivation used for key slots added through this handle (`crypt_set_pbkdf_type`)
    pub fn set_pbkdf_type(&mut self, pbkdf: &PbkdfType) -> Result<(), Errno> {
        pbkdf.to_pbkdf()?;
        self.pbkdf = Some(pbkdf.clone());
        Ok(())
    }

    /// Reopen the device read-write unless it already is
    fn writable(&mut self) -> Result<&mut FileDevice, Errno> {
        if !self.device.is_writable() {
            debug!("reopening {} read-write", self.path.display());
            self.device = FileDevice::open(&self.path, OpenMode::ReadWrite, 0).map_err(errno::from_error)?;
        }
        Ok(&mut self.device)
    }

    /// Write a new volume of type `kind` (`crypt_format`)
    ///
    /// For LUKS a random volume key of `volume_key_size` bytes is generated
    /// unless `volume_key` is given; no key slot is created. For VERITY the
    /// device receives the hash tree over `Params::Verity::data_device`.
    #[allow(clippy::too_many_arguments)]
    pub fn format(
        &mut self,
        kind: &str,
        cipher: &str,
        cipher_mode: &str,
        uuid: Option<&str>,
        volume_key: Option<&[u8]>,
        volume_key_size: usize,
        params: Option<&Params>,
    ) -> Result<(), Errno> {
        let kind = Kind::parse(kind)?;
        let volume_key = volume_key.map(Key::from_slice).transpose().map_err(errno::from_error)?;
        let key_bytes = volume_key.as_ref().map(Key::len).unwrap_or(volume_key_size);

        match kind {
            Kind::Luks1 => {
                let params = match params {
                    None => Luks1Params::default(),
                    Some(Params::Luks1(p)) => p.clone(),
                    Some(_) => return Err(Errno::EINVAL),
                };
                if params.data_device.is_some() {
                    return Err(Errno::ENOTSUP);
                }
                let format = luks1::FormatParams {
                    cipher_name: cipher.into(),
                    cipher_mode: cipher_mode.into(),
                    uuid: uuid.map(Into::into),
                    hash: parse_hash(params.hash.as_deref())?,
                    key_bytes,
                    ..Default::default()
                };
                self.format_luks(kind, &luks::FormatParams::Luks1(format), volume_key)
            }
            Kind::Luks2 => {
                let params = match params {
                    None => Luks2Params::default(),
                    Some(Params::Luks2(p)) => p.clone(),
                    Some(_) => return Err(Errno::EINVAL),
                };
                if params.data_device.is_some() || params.integrity.is_some() {
                    return Err(Errno::ENOTSUP);
                }
                if params.sector_size != 0 && params.sector_size != 512 {
                    return Err(Errno::ENOTSUP);
                }
                if let Some(pbkdf) = &params.pbkdf {
                    self.set_pbkdf_type(pbkdf)?;
                }
                let format = luks2::FormatParams {
                    cipher_name: cipher.into(),
                    cipher_mode: cipher_mode.into(),
                    uuid: uuid.map(Into::into),
                    label: params.label.clone(),
                    subsystem: params.subsystem.clone(),
                    key_bytes,
                    ..Default::default()
                };
                self.format_luks(kind, &luks::FormatParams::Luks2(format), volume_key)
            }
            Kind::Verity => {
                let Some(Params::Verity(params)) = params else {
                    return Err(Errno::EINVAL);
                };
                self.format_verity(uuid, params)
            }
        }
    }

    fn format_luks(&mut self, kind: Kind, params: &luks::FormatParams, volume_key: Option<Key>) -> Result<(), Errno> {
        let device = self.writable()?;
        let key = luks::format(device, params, volume_key.as_ref(), None).map_err(errno::from_error)?;
        let header = Header::read(device).map_err(errno::from_error)?;

        self.uuid = header.uuid().ok().map(Into::into);
        self.volume_key_size = Some(key.len());
        self.volume_key = Some(key);
        self.kind = Some(kind);
        info!("formatted {} as {}", self.path.display(), kind.as_str());
        Ok(())
    }

    fn format_verity(&mut self, uuid: Option<&str>, params: &VerityParams) -> Result<(), Errno> {
        let options = verity::FormatOptions {
            hash: parse_hash(params.hash_name.as_deref())?,
            uuid: uuid.map(Into::into),
            salt: params.salt.clone(),
            need_superblock: !params.no_superblock,
        };
        let mut data = FileDevice::open(&params.data_device, OpenMode::ReadOnly, verity::BLOCK_SIZE)
            .map_err(errno::from_error)?;
        let device = self.writable()?;
        let root = verity::format(&mut data, device, &options).map_err(errno::from_error)?;

        if options.need_superblock {
            let sb = verity::read_superblock(device).map_err(errno::from_error)?;
            self.uuid = Some(sb.uuid().hyphenated().to_string());
        }
        self.verity_root_hash = Some(root);
        self.kind = Some(Kind::Verity);
        info!("formatted {} as VERITY", self.path.display());
        Ok(())
    }

    /// Read the volume header (`crypt_load`); `kind` restricts the accepted type
    pub fn load(&mut self, kind: Option<&str>, params: Option<&Params>) -> Result<(), Errno> {
        let wanted = kind.map(Kind::parse).transpose()?;
        if matches!(params, Some(Params::Integrity)) {
            return Err(Errno::ENOTSUP);
        }

        if wanted == Some(Kind::Verity) {
            let sb = verity::read_superblock(&mut self.device).map_err(errno::from_error)?;
            self.uuid = Some(sb.uuid().hyphenated().to_string());
            self.kind = Some(Kind::Verity);
            return Ok(());
        }

        let header = Header::read(&mut self.device).map_err(errno::from_error)?;
        let found = match header.version() {
            luks::Version::V1 => Kind::Luks1,
            luks::Version::V2 => Kind::Luks2,
        };
        if wanted.is_some_and(|k| k != found) {
            debug!("{} holds {}, not the requested type", self.path.display(), found.as_str());
            return Err(Errno::EINVAL);
        }
        self.uuid = header.uuid().ok().map(Into::into);
        self.volume_key_size = header.key_size();
        self.kind = Some(found);
        Ok(())
    }

    /// Add a key slot for `passphrase` (`crypt_keyslot_add_by_key`)
    ///
    /// `keyslot` must be `None` (any slot). Without `volume_key` the key from a
    /// preceding [`CryptDevice::format`] is used. Returns the slot index.
    pub fn keyslot_add_by_key(
        &mut self,
        keyslot: Option<u32>,
        volume_key: Option<&[u8]>,
        passphrase: &[u8],
    ) -> Result<u32, Errno> {
        if keyslot.is_some() {
            return Err(Errno::ENOTSUP);
        }
        if !matches!(self.kind, Some(Kind::Luks1 | Kind::Luks2)) {
            return Err(Errno::EINVAL);
        }
        let key = match volume_key {
            Some(bytes) => Key::from_slice(bytes).map_err(errno::from_error)?,
            None => self.volume_key.clone().ok_or(Errno::EINVAL)?,
        };
        let options = match &self.pbkdf {
            Some(pbkdf) if self.kind == Some(Kind::Luks1) => {
                if pbkdf.kind != "pbkdf2" {
                    return Err(Errno::EINVAL);
                }
                KeyslotOptions {
                    slot_iterations: pbkdf.iterations,
                    pbkdf: None,
                }
            }
            Some(pbkdf) => KeyslotOptions {
                slot_iterations: 0,
                pbkdf: Some(pbkdf.to_pbkdf()?),
            },
            None => KeyslotOptions::default(),
        };

        let device = self.writable()?;
        let slot = luks::add_key_by_master_key(device, &options, &key, passphrase).map_err(errno::from_error)?;
        Ok(slot as u32)
    }

    /// Type of the loaded or formatted volume
    pub fn kind(&self) -> Option<&'static str> {
        self.kind.map(|k| k.as_str())
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn volume_key_size(&self) -> Option<usize> {
        self.volume_key_size
    }

    /// Root hash computed by a VERITY format
    pub fn verity_root_hash(&self) -> Option<&[u8]> {
        self.verity_root_hash.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_hash(name: Option<&str>) -> Result<HashType, Errno> {
    match name {
        Some(name) => name.parse().map_err(errno::from_error),
        None => Ok(HashType::Sha256),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(Kind::parse("LUKS2").unwrap(), Kind::Luks2);
        assert_eq!(Kind::parse("INTEGRITY").unwrap_err(), Errno::ENOTSUP);
        assert_eq!(Kind::parse("PLAIN").unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn test_missing_device() {
        assert_eq!(CryptDevice::init("/nonexistent/vic-device").unwrap_err(), Errno::ENOENT);
    }
}
