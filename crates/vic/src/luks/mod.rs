// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! LUKS volumes
//!
//! Both header versions share a common prefix (magic, version, UUID at fixed
//! offsets). The functions here read that prefix and route to the [`luks1`] or
//! [`luks2`] engine.

use std::{io::Write, path::Path};

use log::{debug, info};
use zerocopy::*;

use crate::{
    blockdev::write_bytes,
    crypto::random,
    dm::{CryptTarget, DeviceMapper},
    error::io_error,
    BlockDevice, Error, FileDevice, Key, OpenMode, Result, SECTOR_SIZE,
};

pub mod integrity;
pub mod luks1;
pub mod luks2;

/// Length of the magic field in bytes
pub const MAGIC_LEN: usize = 6;
/// Length of the UUID field in bytes
pub const UUID_LEN: usize = 40;
/// Magic of a primary header (`LUKS\xba\xbe`)
pub const MAGIC_1ST: [u8; MAGIC_LEN] = *b"LUKS\xba\xbe";
/// Magic of a LUKS2 secondary header (`SKUL\xba\xbe`)
pub const MAGIC_2ND: [u8; MAGIC_LEN] = *b"SKUL\xba\xbe";

/// The prefix shared by every LUKS header version
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct CommonHeader {
    pub magic: [u8; MAGIC_LEN],
    pub version: U16<BigEndian>,
    pub padding1: [u8; 160],
    pub uuid: [u8; UUID_LEN],
    pub padding2: [u8; 304],
}

const _: () = assert!(core::mem::offset_of!(CommonHeader, version) == 6);
const _: () = assert!(core::mem::offset_of!(CommonHeader, uuid) == 168);
const _: () = assert!(core::mem::size_of::<CommonHeader>() == SECTOR_SIZE);

/// Version of a LUKS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2,
}

impl Version {
    pub fn number(&self) -> u16 {
        match self {
            Version::V1 => 1,
            Version::V2 => 2,
        }
    }
}

impl CommonHeader {
    /// The header version, [`Error::BadVersion`] for anything but 1 or 2
    pub fn luks_version(&self) -> Result<Version> {
        match self.version.get() {
            1 => Ok(Version::V1),
            2 => Ok(Version::V2),
            v => {
                debug!("unknown luks version {v}");
                raise!(Error::BadVersion)
            }
        }
    }
}

/// Read and check the common prefix from block 0
pub fn read_common_header(dev: &mut dyn BlockDevice) -> Result<CommonHeader> {
    prepare(dev)?;
    let mut buf = [0u8; SECTOR_SIZE];
    dev.get(0, &mut buf).map_err(|_| Error::HeaderReadFailed)?;
    let header = CommonHeader::read_from_bytes(&buf).map_err(|_| Error::HeaderReadFailed)?;
    if header.magic != MAGIC_1ST && header.magic != MAGIC_2ND {
        raise!(Error::BadMagic);
    }
    Ok(header)
}

/// Version of the volume on `dev`
pub fn version(dev: &mut dyn BlockDevice) -> Result<Version> {
    read_common_header(dev)?.luks_version()
}

/// A parsed header of either version
#[derive(Debug, Clone)]
pub enum Header {
    V1(Box<luks1::Header>),
    V2(Box<luks2::Header>),
}

impl Header {
    /// Read the header of whichever version `dev` holds
    pub fn read(dev: &mut dyn BlockDevice) -> Result<Self> {
        match version(dev)? {
            Version::V1 => Ok(Header::V1(Box::new(luks1::read_header(dev)?))),
            Version::V2 => Ok(Header::V2(Box::new(luks2::read_raw_header(dev)?))),
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Header::V1(_) => Version::V1,
            Header::V2(_) => Version::V2,
        }
    }

    pub fn uuid(&self) -> Result<&str> {
        match self {
            Header::V1(h) => h.uuid(),
            Header::V2(h) => h.binary.uuid(),
        }
    }

    /// Size of the master key in bytes, if the header records one
    pub fn key_size(&self) -> Option<usize> {
        match self {
            Header::V1(h) => Some(h.key_size()),
            Header::V2(h) => h.key_size(),
        }
    }

    /// Whether `key` is the master key of this volume
    pub fn verify_master_key(&self, key: &Key) -> Result<bool> {
        match self {
            Header::V1(h) => h.verify_master_key(key),
            Header::V2(h) => luks2::verify_master_key(h, key),
        }
    }
}

/// Parameters of a new volume; the variant selects the version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatParams {
    Luks1(luks1::FormatParams),
    Luks2(luks2::FormatParams),
}

/// Settings of a key slot added to an existing volume
///
/// LUKS1 slots use `slot_iterations`, LUKS2 slots use `pbkdf` (the default
/// Argon2id settings when absent).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyslotOptions {
    pub slot_iterations: u32,
    pub pbkdf: Option<luks2::Pbkdf>,
}

/// Location of the encrypted payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub version: Version,
    /// Start of the payload in bytes
    pub payload_offset: u64,
    /// Length of the payload in bytes
    pub payload_size: u64,
}

/// Write a new volume header, returning the master key
pub fn format(dev: &mut dyn BlockDevice, params: &FormatParams, master_key: Option<&Key>, pwd: Option<&[u8]>) -> Result<Key> {
    match params {
        FormatParams::Luks1(params) => luks1::format(dev, params, master_key, pwd),
        FormatParams::Luks2(params) => luks2::format(dev, params, master_key, pwd),
    }
}

/// Recover the master key with `pwd`
pub fn recover_master_key(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<Key> {
    match version(dev)? {
        Version::V1 => luks1::recover_master_key(dev, pwd),
        Version::V2 => luks2::recover_master_key(dev, pwd),
    }
}

/// Add a key slot for `new_pwd`, returning its index
pub fn add_key(dev: &mut dyn BlockDevice, options: &KeyslotOptions, pwd: &[u8], new_pwd: &[u8]) -> Result<usize> {
    match version(dev)? {
        Version::V1 => luks1::add_key(dev, options.slot_iterations, pwd, new_pwd),
        Version::V2 => {
            luks2::add_key(dev, &options.pbkdf.unwrap_or_default(), pwd, new_pwd).map(|id| id as usize)
        }
    }
}

/// Add a key slot for `pwd` from the master key, returning its index
pub fn add_key_by_master_key(
    dev: &mut dyn BlockDevice,
    options: &KeyslotOptions,
    master_key: &Key,
    pwd: &[u8],
) -> Result<usize> {
    match version(dev)? {
        Version::V1 => luks1::add_key_by_master_key(dev, options.slot_iterations, master_key, pwd),
        Version::V2 => luks2::add_key_by_master_key(dev, &options.pbkdf.unwrap_or_default(), master_key, pwd)
            .map(|id| id as usize),
    }
}

/// Remove the key slot `pwd` opens, refusing the last one
pub fn remove_key(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<usize> {
    match version(dev)? {
        Version::V1 => luks1::remove_key(dev, pwd),
        Version::V2 => luks2::remove_key(dev, pwd).map(|id| id as usize),
    }
}

/// Remove the key slot `pwd` opens, even the last one
pub fn remove_key_force(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<usize> {
    match version(dev)? {
        Version::V1 => luks1::remove_key_force(dev, pwd),
        Version::V2 => luks2::remove_key_force(dev, pwd).map(|id| id as usize),
    }
}

/// Replace `old_pwd` by `new_pwd`, returning the index of the slot now holding it
pub fn change_key(dev: &mut dyn BlockDevice, old_pwd: &[u8], new_pwd: &[u8]) -> Result<usize> {
    match version(dev)? {
        Version::V1 => luks1::change_key(dev, old_pwd, new_pwd),
        Version::V2 => luks2::change_key(dev, old_pwd, new_pwd).map(|id| id as usize),
    }
}

/// Where the payload lives
pub fn stat(dev: &mut dyn BlockDevice) -> Result<Stat> {
    let header = Header::read(dev)?;
    let (offset, size) = payload(dev, &header)?;
    Ok(Stat {
        version: header.version(),
        payload_offset: offset,
        payload_size: size,
    })
}

/// Payload offset and length in bytes
fn payload(dev: &mut dyn BlockDevice, header: &Header) -> Result<(u64, u64)> {
    let device_size = dev.byte_size()?;
    let (offset, fixed) = match header {
        Header::V1(h) => (h.payload_offset_bytes(), None),
        Header::V2(h) => {
            let segment = h.segment()?;
            (segment.offset, segment.fixed_size())
        }
    };
    if offset >= device_size {
        raise!(Error::DeviceTooSmall);
    }
    let size = fixed.unwrap_or(device_size - offset);
    if offset + size > device_size {
        raise!(Error::DeviceTooSmall);
    }
    Ok((offset, size))
}

/// Print the header of either version
///
/// For LUKS2 the dm-integrity superblock at the start of the data segment is
/// printed too, when there is one.
pub fn dump(dev: &mut dyn BlockDevice, out: &mut dyn Write) -> Result<()> {
    let header = Header::read(dev)?;
    let device_size = dev.byte_size()?;
    let written = |e| io_error(Error::WriteFailed, "dump", e);
    match &header {
        Header::V1(h) => luks1::dump(h, out).map_err(written),
        Header::V2(h) => {
            let sb = match h.segment() {
                Ok(segment) if segment.offset < device_size => integrity::read_superblock(dev, segment.offset)?,
                _ => None,
            };
            luks2::dump(h, out).map_err(written)?;
            if let Some(sb) = sb {
                writeln!(out).map_err(written)?;
                integrity::dump(&sb, out)?;
            }
            Ok(())
        }
    }
}

/// Map the volume at `path` as device-mapper device `name` using `master_key`
pub fn open(dm: &mut dyn DeviceMapper, path: &Path, name: &str, master_key: &Key) -> Result<()> {
    let mut dev = FileDevice::open(path, OpenMode::ReadOnly, SECTOR_SIZE)?;
    let header = Header::read(&mut dev)?;
    if !header.verify_master_key(master_key)? {
        raise!(Error::KeyLookupFailed);
    }
    let (offset, size) = payload(&mut dev, &header)?;

    let (cipher, iv_offset, sector_size) = match &header {
        Header::V1(h) => (format!("{}-{}", h.cipher_name()?, h.cipher_mode()?), 0, None),
        Header::V2(h) => {
            let segment = h.segment()?;
            if segment.integrity.is_some() {
                raise!(Error::Unsupported);
            }
            (segment.encryption.clone(), segment.iv_tweak, Some(segment.sector_size))
        }
    };
    drop(dev);

    let device = dm.attach(path, false)?;
    let target = CryptTarget {
        sectors: size / SECTOR_SIZE as u64,
        cipher,
        key: master_key.clone(),
        iv_offset,
        device,
        offset: offset / SECTOR_SIZE as u64,
        sector_size,
    };
    dm.create(name, &target.table(), false)?;
    info!("opened {} as {name}", path.display());
    Ok(())
}

/// Remove device-mapper device `name` and its integrity companion `<name>_dif`
pub fn close(dm: &mut dyn DeviceMapper, name: &str) -> Result<()> {
    dm.remove(name)?;
    let dif = format!("{name}_dif");
    if dm.exists(&dif) {
        dm.remove(&dif)?;
    }
    info!("closed {name}");
    Ok(())
}

/// Read a raw master key file
pub fn load_key<P: AsRef<Path>>(path: P) -> Result<Key> {
    Key::load(path)
}

/// Address `dev` in 512-byte sectors
pub(crate) fn prepare(dev: &mut dyn BlockDevice) -> Result<()> {
    if dev.block_size() != SECTOR_SIZE {
        dev.set_block_size(SECTOR_SIZE)?;
    }
    Ok(())
}

/// The given UUID in canonical form, or a new random one
pub(crate) fn parse_uuid(uuid: Option<&str>) -> Result<String> {
    match uuid {
        Some(s) => {
            let parsed = uuid::Uuid::parse_str(s).map_err(|_| Error::BadUuid)?;
            Ok(parsed.hyphenated().to_string())
        }
        None => Ok(uuid::Uuid::new_v4().hyphenated().to_string()),
    }
}

/// `value`, or `default` when zero
pub(crate) fn or_default(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

pub(crate) fn dump_hex(out: &mut dyn Write, bytes: &[u8]) -> std::io::Result<()> {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    writeln!(out, "{}", hex.join(" "))
}

/// Overwrite `len` bytes at `offset` with random data
pub(crate) fn wipe(dev: &mut dyn BlockDevice, offset: u64, len: u64) -> Result<()> {
    const CHUNK: u64 = 64 * 1024;
    let mut done = 0;
    while done < len {
        let n = CHUNK.min(len - done);
        let buf = random::bytes(n as usize);
        write_bytes(dev, offset + done, &buf)?;
        done += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dm::mock::MockMapper, MemDevice};

    fn luks1_params() -> FormatParams {
        FormatParams::Luks1(luks1::FormatParams {
            mk_iterations: 1000,
            slot_iterations: 1000,
            ..Default::default()
        })
    }

    fn luks2_params() -> FormatParams {
        FormatParams::Luks2(luks2::FormatParams {
            mk_iterations: 1000,
            pbkdf: luks2::Pbkdf::Pbkdf2 { iterations: 1000 },
            ..Default::default()
        })
    }

    #[test]
    fn test_bad_magic() {
        let mut dev = MemDevice::new(4096, 512).unwrap();
        assert_eq!(version(&mut dev).unwrap_err(), Error::BadMagic);
        assert_eq!(recover_master_key(&mut dev, b"x").unwrap_err(), Error::BadMagic);
    }

    #[test]
    fn test_bad_version() {
        let mut dev = MemDevice::new(4096, 512).unwrap();
        let bytes = dev.as_bytes_mut();
        bytes[..6].copy_from_slice(&MAGIC_1ST);
        bytes[6..8].copy_from_slice(&3u16.to_be_bytes());
        assert_eq!(stat(&mut dev).unwrap_err(), Error::BadVersion);
        assert_eq!(recover_master_key(&mut dev, b"x").unwrap_err(), Error::BadVersion);
    }

    #[test_log::test]
    fn test_secondary_magic_routes_to_luks2() {
        let mut dev = MemDevice::new((luks2::DATA_OFFSET + 65536) as usize, 512).unwrap();
        let key = format(&mut dev, &luks2_params(), None, Some(b"pw")).unwrap();

        // replace the primary by a copy of the secondary
        let hdr_size = luks2::HDR_SIZE as usize;
        let bytes = dev.as_bytes_mut();
        let secondary = bytes[hdr_size..2 * hdr_size].to_vec();
        bytes[..hdr_size].copy_from_slice(&secondary);
        assert_eq!(&bytes[..6], &MAGIC_2ND);

        assert_eq!(version(&mut dev).unwrap(), Version::V2);
        assert_eq!(recover_master_key(&mut dev, b"pw").unwrap(), key);
    }

    #[test]
    fn test_stat() {
        let mut dev = MemDevice::new(4 * 1024 * 1024, 512).unwrap();
        format(&mut dev, &luks1_params(), None, None).unwrap();
        let st = stat(&mut dev).unwrap();
        assert_eq!(st.version, Version::V1);
        assert_eq!(st.payload_offset, 4096 * 512);
        assert_eq!(st.payload_size, 2 * 1024 * 1024);

        let mut dev = MemDevice::new((luks2::DATA_OFFSET + 65536) as usize, 512).unwrap();
        format(&mut dev, &luks2_params(), None, None).unwrap();
        let st = stat(&mut dev).unwrap();
        assert_eq!(st.version, Version::V2);
        assert_eq!(st.payload_offset, luks2::DATA_OFFSET);
        assert_eq!(st.payload_size, 65536);
    }

    #[test]
    fn test_dump_both_versions() {
        let mut dev = MemDevice::new(4 * 1024 * 1024, 512).unwrap();
        format(&mut dev, &luks1_params(), None, Some(b"pw")).unwrap();
        let mut out = Vec::new();
        dump(&mut dev, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Key Slot 0: ENABLED"));

        let mut dev = MemDevice::new((luks2::DATA_OFFSET + 65536) as usize, 512).unwrap();
        format(&mut dev, &luks2_params(), None, Some(b"pw")).unwrap();
        let mut out = Vec::new();
        dump(&mut dev, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Version:       \t2"));
        assert!(!text.contains("Info for integrity device"));
    }

    #[test]
    fn test_close_removes_integrity_companion() {
        let mut dm = MockMapper::new();
        dm.create("vol", "0 8 zero", false).unwrap();
        dm.create("vol_dif", "0 8 zero", false).unwrap();
        close(&mut dm, "vol").unwrap();
        assert_eq!(dm.names().count(), 0);
        assert_eq!(close(&mut dm, "vol").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!(
            parse_uuid(Some("0B3F4A39-5F4E-4D8C-9D54-3E1B8F0C2A11")).unwrap(),
            "0b3f4a39-5f4e-4d8c-9d54-3e1b8f0c2a11"
        );
        assert_eq!(parse_uuid(Some("not-a-uuid")).unwrap_err(), Error::BadUuid);
        assert_eq!(parse_uuid(None).unwrap().len(), 36);
    }
}
