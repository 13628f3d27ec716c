// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! # LUKS2 binary header
//!
//! The binary header is followed by the JSON area; together they form one
//! header copy of `hdr_size` bytes. Two copies are kept: the primary at offset
//! 0 with the `LUKS` magic and the secondary right behind it with the `SKUL`
//! magic. Each copy carries a SHA-256 checksum over itself (with the checksum
//! field zeroed) and its JSON area.

use log::{debug, trace, warn};
use zerocopy::*;

use super::Luks2Config;
use crate::{
    blockdev::{read_bytes, write_bytes},
    crypto::{random, HashType},
    cstr,
    luks::{MAGIC_1ST, MAGIC_2ND, MAGIC_LEN, UUID_LEN},
    set_cstr, BlockDevice, Error, Result,
};

/// Length of the label field in bytes
pub const LABEL_LEN: usize = 48;
/// Length of the checksum algorithm field in bytes
pub const CHECKSUM_ALG_LEN: usize = 32;
/// Length of the salt field in bytes
pub const SALT_LEN: usize = 64;
/// Length of the checksum field in bytes
pub const CHECKSUM_LEN: usize = 64;
/// Size of the binary part of a header copy
pub const BINARY_SIZE: usize = 4096;

/// Offsets a secondary header may live at, one per supported JSON area size
pub const SECONDARY_OFFSETS: [u64; 9] = [
    0x4000, 0x8000, 0x10000, 0x20000, 0x40000, 0x80000, 0x100000, 0x200000, 0x400000,
];

/// LUKS2 on-disk header format
///
/// The header contains metadata about the encrypted volume including magic number,
/// version, checksums and JSON configuration.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Luks2 {
    /// Magic number identifying LUKS2 format
    pub magic: [u8; MAGIC_LEN],
    /// LUKS format version
    pub version: U16<BigEndian>,
    /// Size of the header copy (binary header and JSON area) in bytes
    pub hdr_size: U64<BigEndian>,
    /// Header sequence ID, incremented on every update
    pub seqid: U64<BigEndian>,
    /// Volume label
    pub label: [u8; LABEL_LEN],
    /// Checksum algorithm identifier
    pub checksum_alg: [u8; CHECKSUM_ALG_LEN],
    /// Random salt
    pub salt: [u8; SALT_LEN],
    /// Volume UUID
    pub uuid: [u8; UUID_LEN],
    /// Subsystem label
    pub subsystem: [u8; LABEL_LEN],
    /// Offset of this copy from the device start
    pub hdr_offset: U64<BigEndian>,
    /// Padding bytes
    pub padding: [u8; 184],
    /// Header checksum
    pub csum: [u8; CHECKSUM_LEN],
    /// Additional padding to 4096 bytes
    pub padding4096: [u8; 7 * 512],
}

const _: () = assert!(core::mem::size_of::<Luks2>() == BINARY_SIZE);
const _: () = assert!(core::mem::offset_of!(Luks2, version) == 6);
const _: () = assert!(core::mem::offset_of!(Luks2, uuid) == 168);
const _: () = assert!(core::mem::offset_of!(Luks2, hdr_offset) == 256);
const _: () = assert!(core::mem::offset_of!(Luks2, csum) == 448);

impl Luks2 {
    /// Get the UUID of the LUKS2 volume
    ///
    /// Note: LUKS2 stores string UUID rather than 128-bit sequence
    pub fn uuid(&self) -> Result<&str> {
        cstr(&self.uuid)
    }

    /// Get the label of the LUKS2 volume
    pub fn label(&self) -> Result<&str> {
        cstr(&self.label)
    }

    pub fn subsystem(&self) -> Result<&str> {
        cstr(&self.subsystem)
    }

    pub fn checksum_alg(&self) -> Result<&str> {
        cstr(&self.checksum_alg)
    }

    pub fn set_label(&mut self, label: &str) -> Result<()> {
        set_cstr(&mut self.label, label)
    }

    /// Size of the JSON area that follows the binary header
    pub fn json_size(&self) -> u64 {
        self.hdr_size.get().saturating_sub(BINARY_SIZE as u64)
    }
}

/// One complete header: binary part and parsed metadata
#[derive(Debug, Clone)]
pub struct Header {
    pub binary: Luks2,
    pub config: Luks2Config,
}

/// Checksum of a header copy given its binary part (checksum zeroed) and JSON area
fn checksum(hash: HashType, binary: &Luks2, json: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut zeroed = *binary;
    zeroed.csum = [0u8; CHECKSUM_LEN];
    let digest = hash.digest(&[zeroed.as_bytes(), json]);
    let mut out = [0u8; CHECKSUM_LEN];
    out[..digest.len()].copy_from_slice(&digest);
    out
}

/// Read and verify the header copy at `offset`, expecting `magic`
fn read_copy(dev: &mut dyn BlockDevice, offset: u64, magic: &[u8; MAGIC_LEN]) -> Result<Header> {
    let mut buf = vec![0u8; BINARY_SIZE];
    read_bytes(dev, offset, &mut buf).map_err(|_| Error::HeaderReadFailed)?;
    let binary = Luks2::read_from_bytes(&buf).map_err(|_| Error::HeaderReadFailed)?;

    if &binary.magic != magic {
        raise!(Error::BadMagic);
    }
    if binary.version.get() != 2 {
        raise!(Error::BadVersion);
    }
    if binary.hdr_offset.get() != offset {
        raise!(Error::BadParameter);
    }
    let json_size = binary.json_size();
    if json_size == 0 || !SECONDARY_OFFSETS.contains(&binary.hdr_size.get()) {
        raise!(Error::BadParameter);
    }

    let mut json = vec![0u8; json_size as usize];
    read_bytes(dev, offset + BINARY_SIZE as u64, &mut json).map_err(|_| Error::HeaderReadFailed)?;

    let hash: HashType = binary.checksum_alg()?.parse()?;
    if checksum(hash, &binary, &json) != binary.csum {
        raise!(Error::BadChecksum);
    }

    // clip the json at the first nul byte
    let end = json.iter().position(|b| *b == 0).unwrap_or(json.len());
    let config: Luks2Config = serde_json::from_slice(&json[..end]).map_err(|e| {
        debug!("luks2 metadata: {e}");
        Error::BadJson
    })?;
    if config.config.json_size != json_size {
        raise!(Error::BadJson);
    }

    trace!(
        "luks2 header copy at {offset}: seqid {}, {} keyslots",
        binary.seqid.get(),
        config.keyslots.len()
    );
    Ok(Header { binary, config })
}

/// Read the most recent valid header copy
///
/// The primary copy is used when valid; otherwise the secondary copy is searched
/// for at the standard offsets.
pub fn read_header(dev: &mut dyn BlockDevice) -> Result<Header> {
    let primary = read_copy(dev, 0, &MAGIC_1ST);
    let primary_err = match primary {
        Ok(primary) => {
            // an interrupted update can leave the secondary newer
            let offset = primary.binary.hdr_size.get();
            if let Ok(secondary) = read_copy(dev, offset, &MAGIC_2ND) {
                if secondary.binary.seqid.get() > primary.binary.seqid.get() {
                    warn!("luks2 secondary header is newer than the primary, using it");
                    return Ok(secondary);
                }
            }
            return Ok(primary);
        }
        Err(e) => e,
    };

    warn!("luks2 primary header invalid ({}), trying secondary copies", primary_err.name());
    for offset in SECONDARY_OFFSETS {
        if let Ok(secondary) = read_copy(dev, offset, &MAGIC_2ND) {
            debug!("using luks2 secondary header at {offset}");
            return Ok(secondary);
        }
    }
    Err(primary_err)
}

/// Serialize `header` and write both copies with an incremented sequence id
pub fn write_header(dev: &mut dyn BlockDevice, header: &mut Header) -> Result<()> {
    let json_size = header.binary.json_size();
    if json_size != header.config.config.json_size {
        raise!(Error::BadParameter);
    }

    let text = serde_json::to_vec(&header.config).map_err(|e| {
        debug!("luks2 metadata: {e}");
        Error::BadJson
    })?;
    if text.len() >= json_size as usize {
        raise!(Error::BufferTooSmall);
    }
    let mut json = vec![0u8; json_size as usize];
    json[..text.len()].copy_from_slice(&text);

    let hash: HashType = header.binary.checksum_alg()?.parse()?;
    header.binary.seqid.set(header.binary.seqid.get() + 1);

    let hdr_size = header.binary.hdr_size.get();
    for (offset, magic) in [(0, MAGIC_1ST), (hdr_size, MAGIC_2ND)] {
        let mut copy = header.binary;
        copy.magic = magic;
        copy.hdr_offset.set(offset);
        copy.csum = checksum(hash, &copy, &json);

        write_bytes(dev, offset, copy.as_bytes()).map_err(|_| Error::HeaderWriteFailed)?;
        write_bytes(dev, offset + BINARY_SIZE as u64, &json).map_err(|_| Error::HeaderWriteFailed)?;
    }

    header.binary.magic = MAGIC_1ST;
    header.binary.hdr_offset.set(0);
    trace!("wrote luks2 header seqid {}", header.binary.seqid.get());
    Ok(())
}

/// A fresh binary header for a volume with the given identity
pub fn new_binary(hdr_size: u64, uuid: &str, label: Option<&str>, subsystem: Option<&str>) -> Result<Luks2> {
    let mut binary = Luks2::new_zeroed();
    binary.magic = MAGIC_1ST;
    binary.version.set(2);
    binary.hdr_size.set(hdr_size);
    set_cstr(&mut binary.checksum_alg, HashType::Sha256.name())?;
    random::fill(&mut binary.salt);
    set_cstr(&mut binary.uuid, uuid)?;
    if let Some(label) = label {
        set_cstr(&mut binary.label, label)?;
    }
    if let Some(subsystem) = subsystem {
        set_cstr(&mut binary.subsystem, subsystem)?;
    }
    Ok(binary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{luks::luks2::Luks2ConfigData, MemDevice};

    fn header() -> Header {
        let config = Luks2Config {
            keyslots: Default::default(),
            tokens: Default::default(),
            segments: Default::default(),
            digests: Default::default(),
            config: Luks2ConfigData {
                json_size: 12288,
                keyslots_size: 0,
                flags: vec![],
                requirements: None,
            },
        };
        let binary = new_binary(16384, "4a4a9e36-0d6a-4bb0-a2c2-2d0b6f7a8b10", Some("data"), None).unwrap();
        Header { binary, config }
    }

    #[test]
    fn test_write_both_copies() {
        let mut dev = MemDevice::new(64 * 1024, 512).unwrap();
        let mut hdr = header();
        write_header(&mut dev, &mut hdr).unwrap();
        assert_eq!(hdr.binary.seqid.get(), 1);

        let bytes = dev.as_bytes();
        assert_eq!(&bytes[..6], &MAGIC_1ST);
        assert_eq!(&bytes[16384..16384 + 6], &MAGIC_2ND);
        assert_eq!(bytes[4096], b'{');

        let back = read_header(&mut dev).unwrap();
        assert_eq!(back.binary.label().unwrap(), "data");
        assert_eq!(back.binary.uuid().unwrap(), "4a4a9e36-0d6a-4bb0-a2c2-2d0b6f7a8b10");
        assert_eq!(back.config, hdr.config);
    }

    #[test]
    fn test_secondary_recovery() {
        let mut dev = MemDevice::new(64 * 1024, 512).unwrap();
        let mut hdr = header();
        write_header(&mut dev, &mut hdr).unwrap();

        // corrupt the primary json area: checksum fails, secondary is used
        dev.as_bytes_mut()[4100] ^= 0xff;
        assert_eq!(read_copy(&mut dev, 0, &MAGIC_1ST).unwrap_err(), Error::BadChecksum);
        let back = read_header(&mut dev).unwrap();
        assert_eq!(back.binary.hdr_offset.get(), 16384);

        // both copies broken
        dev.as_bytes_mut()[16384 + 4100] ^= 0xff;
        assert_eq!(read_header(&mut dev).unwrap_err(), Error::BadChecksum);
    }

    #[test]
    fn test_newer_secondary_wins() {
        let mut dev = MemDevice::new(64 * 1024, 512).unwrap();
        let mut hdr = header();
        write_header(&mut dev, &mut hdr).unwrap();
        let stale_primary = dev.as_bytes()[..16384].to_vec();

        hdr.binary.set_label("newer").unwrap();
        write_header(&mut dev, &mut hdr).unwrap();
        dev.as_bytes_mut()[..16384].copy_from_slice(&stale_primary);

        let back = read_header(&mut dev).unwrap();
        assert_eq!(back.binary.seqid.get(), 2);
        assert_eq!(back.binary.label().unwrap(), "newer");
    }
}
