// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! # LUKS1 engine
//!
//! A LUKS1 volume starts with a 592-byte big-endian `phdr` holding the cipher
//! specification, a PBKDF2 digest of the master key and eight fixed key slots.
//! Each active slot points at AF-split key material encrypted with a key
//! derived from its password; the payload follows the last slot.
//!
//! ## Layout
//!
//! - sector 0: `phdr`
//! - sector 8: key material of slot 0, each further slot aligned to 8 sectors
//! - payload: aligned to 2048 sectors (1 MiB)

use std::io::Write;

use log::{debug, info, trace};
use zerocopy::*;
use zeroize::Zeroizing;

use super::{dump_hex, or_default, parse_uuid, prepare, wipe, MAGIC_1ST, MAGIC_LEN, UUID_LEN};
use crate::{
    af,
    blockdev::{read_bytes, write_bytes},
    crypto::{random, CipherMode, HashType, Kdf, SectorCipher},
    cstr, round_up, set_cstr, BlockDevice, Error, Key, Result, SECTOR_SIZE,
};

/// Number of key slots in a LUKS1 header
pub const NUM_KEYSLOTS: usize = 8;
/// AF stripes per key slot
pub const STRIPES: u32 = 4000;
/// Size of the master key digest in bytes
pub const DIGEST_SIZE: usize = 20;
/// Size of the digest and key slot salts in bytes
pub const SALT_SIZE: usize = 32;
/// Marker of an active key slot
pub const KEY_ENABLED: u32 = 0x00AC_71F3;
/// Marker of an inactive key slot
pub const KEY_DISABLED: u32 = 0x0000_DEAD;
/// Default PBKDF2 iterations of the master key digest
pub const DEFAULT_MK_ITERATIONS: u32 = 1000;
/// Default PBKDF2 iterations of a key slot
pub const DEFAULT_SLOT_ITERATIONS: u32 = 100_000;

/// Sector of the first key material area
const KEY_MATERIAL_START: u64 = 8;
/// Alignment of key material areas, in sectors
const KEY_MATERIAL_ALIGN: u64 = 8;
/// Alignment of the payload, in sectors
const PAYLOAD_ALIGN: u64 = 2048;
/// Bytes read and written for the header (the `phdr` rounded to sectors)
const HEADER_BYTES: usize = 2 * SECTOR_SIZE;

/// Length of the cipher name, cipher mode and hash spec fields
const NAME_LEN: usize = 32;

/// One key slot as stored in the header
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Keyslot {
    /// [`KEY_ENABLED`] or [`KEY_DISABLED`]
    pub active: U32<BigEndian>,
    /// PBKDF2 iterations for the password
    pub iterations: U32<BigEndian>,
    /// PBKDF2 salt for the password
    pub salt: [u8; SALT_SIZE],
    /// Start of the key material, in sectors
    pub key_material_offset: U32<BigEndian>,
    /// AF stripes of the key material
    pub stripes: U32<BigEndian>,
}

impl Keyslot {
    pub fn is_active(&self) -> bool {
        self.active.get() == KEY_ENABLED
    }
}

/// LUKS1 on-disk header (`phdr`)
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Header {
    pub magic: [u8; MAGIC_LEN],
    pub version: U16<BigEndian>,
    pub cipher_name: [u8; NAME_LEN],
    pub cipher_mode: [u8; NAME_LEN],
    pub hash_spec: [u8; NAME_LEN],
    /// Start of the payload, in sectors
    pub payload_offset: U32<BigEndian>,
    /// Size of the master key in bytes
    pub key_bytes: U32<BigEndian>,
    pub mk_digest: [u8; DIGEST_SIZE],
    pub mk_digest_salt: [u8; SALT_SIZE],
    pub mk_digest_iter: U32<BigEndian>,
    pub uuid: [u8; UUID_LEN],
    pub keyslots: [Keyslot; NUM_KEYSLOTS],
}

const _: () = assert!(core::mem::size_of::<Keyslot>() == 48);
const _: () = assert!(core::mem::size_of::<Header>() == 592);
const _: () = assert!(core::mem::offset_of!(Header, cipher_name) == 8);
const _: () = assert!(core::mem::offset_of!(Header, cipher_mode) == 40);
const _: () = assert!(core::mem::offset_of!(Header, hash_spec) == 72);
const _: () = assert!(core::mem::offset_of!(Header, payload_offset) == 104);
const _: () = assert!(core::mem::offset_of!(Header, key_bytes) == 108);
const _: () = assert!(core::mem::offset_of!(Header, mk_digest) == 112);
const _: () = assert!(core::mem::offset_of!(Header, mk_digest_salt) == 132);
const _: () = assert!(core::mem::offset_of!(Header, mk_digest_iter) == 164);
const _: () = assert!(core::mem::offset_of!(Header, uuid) == 168);
const _: () = assert!(core::mem::offset_of!(Header, keyslots) == 208);

impl Header {
    pub fn cipher_name(&self) -> Result<&str> {
        cstr(&self.cipher_name)
    }

    pub fn cipher_mode(&self) -> Result<&str> {
        cstr(&self.cipher_mode)
    }

    pub fn hash_spec(&self) -> Result<&str> {
        cstr(&self.hash_spec)
    }

    pub fn uuid(&self) -> Result<&str> {
        cstr(&self.uuid)
    }

    pub fn hash(&self) -> Result<HashType> {
        self.hash_spec()?.parse()
    }

    /// Cipher used for the key material areas
    pub fn mode(&self) -> Result<CipherMode> {
        CipherMode::parse(self.cipher_name()?, self.cipher_mode()?)
    }

    pub fn key_size(&self) -> usize {
        self.key_bytes.get() as usize
    }

    /// Start of the payload in bytes
    pub fn payload_offset_bytes(&self) -> u64 {
        self.payload_offset.get() as u64 * SECTOR_SIZE as u64
    }

    pub fn active_slots(&self) -> usize {
        self.keyslots.iter().filter(|k| k.is_active()).count()
    }

    fn first_inactive_slot(&self) -> Option<usize> {
        self.keyslots.iter().position(|k| !k.is_active())
    }

    /// Bytes of AF material for one slot, before sector padding
    fn material_len(&self, slot: &Keyslot) -> Result<usize> {
        self.key_size()
            .checked_mul(slot.stripes.get() as usize)
            .filter(|n| *n > 0)
            .ok_or(Error::BadParameter)
    }

    fn digest(&self, key: &[u8]) -> Result<[u8; DIGEST_SIZE]> {
        let kdf = Kdf::Pbkdf2 {
            hash: self.hash()?,
            iterations: self.mk_digest_iter.get(),
        };
        let mut out = [0u8; DIGEST_SIZE];
        kdf.derive(key, &self.mk_digest_salt, &mut out)?;
        Ok(out)
    }

    /// Whether `key` matches the stored master key digest
    pub fn verify_master_key(&self, key: &Key) -> Result<bool> {
        if key.len() != self.key_size() {
            return Ok(false);
        }
        Ok(self.digest(key.as_bytes())? == self.mk_digest)
    }
}

/// Parameters of a new LUKS1 volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatParams {
    pub cipher_name: String,
    pub cipher_mode: String,
    /// UUID to store, generated when absent
    pub uuid: Option<String>,
    pub hash: HashType,
    /// Iterations of the master key digest (0 selects the default)
    pub mk_iterations: u32,
    /// Iterations of the initial key slot (0 selects the default)
    pub slot_iterations: u32,
    /// Size of a generated master key in bytes
    pub key_bytes: usize,
}

impl Default for FormatParams {
    fn default() -> Self {
        Self {
            cipher_name: "aes".into(),
            cipher_mode: "xts-plain64".into(),
            uuid: None,
            hash: HashType::Sha256,
            mk_iterations: DEFAULT_MK_ITERATIONS,
            slot_iterations: DEFAULT_SLOT_ITERATIONS,
            key_bytes: 64,
        }
    }
}

/// Sectors reserved for the key material of one slot
fn slot_sectors(key_bytes: usize) -> u64 {
    let material = (key_bytes as u64 * STRIPES as u64).div_ceil(SECTOR_SIZE as u64);
    round_up(material, KEY_MATERIAL_ALIGN)
}

/// Read and validate the LUKS1 header of `dev`
pub fn read_header(dev: &mut dyn BlockDevice) -> Result<Header> {
    prepare(dev)?;
    let mut buf = [0u8; HEADER_BYTES];
    read_bytes(dev, 0, &mut buf).map_err(|_| Error::HeaderReadFailed)?;

    let header = Header::read_from_prefix(&buf)
        .map_err(|_| Error::HeaderReadFailed)?
        .0;
    if header.magic != MAGIC_1ST {
        raise!(Error::BadMagic);
    }
    if header.version.get() != 1 {
        raise!(Error::BadVersion);
    }
    if header.key_size() == 0 {
        raise!(Error::BadParameter);
    }
    if header.key_size() > Key::MAX_SIZE {
        raise!(Error::KeyTooBig);
    }
    if let Some(index) = header.keyslots.iter().position(|k| k.stripes.get() != STRIPES) {
        debug!("luks1 key slot {index} has {} stripes", header.keyslots[index].stripes.get());
        raise!(Error::BadParameter);
    }
    trace!(
        "luks1 header: cipher {}-{}, hash {}, {} active slots",
        header.cipher_name().unwrap_or("?"),
        header.cipher_mode().unwrap_or("?"),
        header.hash_spec().unwrap_or("?"),
        header.active_slots()
    );
    Ok(header)
}

fn write_header(dev: &mut dyn BlockDevice, header: &Header) -> Result<()> {
    let mut buf = [0u8; HEADER_BYTES];
    buf[..core::mem::size_of::<Header>()].copy_from_slice(header.as_bytes());
    write_bytes(dev, 0, &buf).map_err(|_| Error::HeaderWriteFailed)
}

/// Wrap `master_key` with `pwd` into slot `index` and write its key material
fn wrap_slot(
    dev: &mut dyn BlockDevice,
    header: &mut Header,
    index: usize,
    master_key: &Key,
    pwd: &[u8],
    iterations: u32,
) -> Result<()> {
    let hash = header.hash()?;
    let mode = header.mode()?;
    let slot = header.keyslots[index];
    let len = header.material_len(&slot)?;

    let mut salt = [0u8; SALT_SIZE];
    random::fill(&mut salt);
    let iterations = or_default(iterations, DEFAULT_SLOT_ITERATIONS);

    let mut kek = Zeroizing::new(vec![0u8; header.key_size()]);
    Kdf::Pbkdf2 { hash, iterations }.derive(pwd, &salt, &mut kek)?;

    let split = af::split(hash, master_key.as_bytes(), slot.stripes.get() as usize)
        .map_err(|_| Error::AfSplitFailed)?;
    let mut material = Zeroizing::new(vec![0u8; round_up(len as u64, SECTOR_SIZE as u64) as usize]);
    material[..len].copy_from_slice(&split);

    SectorCipher::new(mode, &kek)?.encrypt(&mut material, 0)?;

    let offset = slot.key_material_offset.get() as u64 * SECTOR_SIZE as u64;
    write_bytes(dev, offset, &material).map_err(|_| Error::KeyMaterialWriteFailed)?;

    let slot = &mut header.keyslots[index];
    slot.active.set(KEY_ENABLED);
    slot.iterations.set(iterations);
    slot.salt = salt;
    debug!("wrapped master key into luks1 key slot {index}");
    Ok(())
}

/// Try to unwrap the master key from slot `index` with `pwd`
fn unwrap_slot(dev: &mut dyn BlockDevice, header: &Header, index: usize, pwd: &[u8]) -> Result<Option<Key>> {
    let hash = header.hash()?;
    let mode = header.mode()?;
    let slot = header.keyslots[index];
    let len = header.material_len(&slot)?;

    let mut kek = Zeroizing::new(vec![0u8; header.key_size()]);
    Kdf::Pbkdf2 {
        hash,
        iterations: slot.iterations.get(),
    }
    .derive(pwd, &slot.salt, &mut kek)?;

    let mut material = Zeroizing::new(vec![0u8; round_up(len as u64, SECTOR_SIZE as u64) as usize]);
    let offset = slot.key_material_offset.get() as u64 * SECTOR_SIZE as u64;
    read_bytes(dev, offset, &mut material).map_err(|_| Error::KeyMaterialReadFailed)?;

    SectorCipher::new(mode, &kek)?.decrypt(&mut material, 0)?;

    let merged = af::merge(hash, &material[..len], header.key_size(), slot.stripes.get() as usize)
        .map_err(|_| Error::AfMergeFailed)?;
    let key = Key::from_slice(&merged)?;

    if header.verify_master_key(&key)? {
        Ok(Some(key))
    } else {
        Ok(None)
    }
}

/// Find the active slot `pwd` opens, returning its index and the master key
fn find_slot(dev: &mut dyn BlockDevice, header: &Header, pwd: &[u8]) -> Result<(usize, Key)> {
    for index in 0..NUM_KEYSLOTS {
        if !header.keyslots[index].is_active() {
            continue;
        }
        if let Some(key) = unwrap_slot(dev, header, index, pwd)? {
            trace!("password matches luks1 key slot {index}");
            return Ok((index, key));
        }
    }
    raise!(Error::KeyLookupFailed)
}

/// Mark slot `index` inactive and forget its salt
fn kill_slot(header: &mut Header, index: usize) {
    let slot = &mut header.keyslots[index];
    slot.active.set(KEY_DISABLED);
    slot.iterations.set(0);
    slot.salt = [0u8; SALT_SIZE];
}

fn wipe_slot_material(dev: &mut dyn BlockDevice, header: &Header, index: usize) -> Result<()> {
    let slot = header.keyslots[index];
    let len = header.material_len(&slot)?;
    let offset = slot.key_material_offset.get() as u64 * SECTOR_SIZE as u64;
    wipe(dev, offset, round_up(len as u64, SECTOR_SIZE as u64)).map_err(|_| Error::KeyMaterialWriteFailed)
}

/// Write a new LUKS1 header, returning the master key it protects
///
/// A random master key of `params.key_bytes` is generated unless one is given.
/// Slot 0 is filled when `pwd` is given.
pub fn format(
    dev: &mut dyn BlockDevice,
    params: &FormatParams,
    master_key: Option<&Key>,
    pwd: Option<&[u8]>,
) -> Result<Key> {
    let mode = CipherMode::parse(&params.cipher_name, &params.cipher_mode)?;
    let key_bytes = master_key.map(Key::len).unwrap_or(params.key_bytes);
    if key_bytes == 0 {
        raise!(Error::BadParameter);
    }
    if key_bytes > Key::MAX_SIZE {
        raise!(Error::KeyTooBig);
    }
    if !mode.accepts_key_len(key_bytes) {
        raise!(Error::UnsupportedCipher);
    }
    let uuid = parse_uuid(params.uuid.as_deref())?;

    let per_slot = slot_sectors(key_bytes);
    let payload_offset = round_up(KEY_MATERIAL_START + per_slot * NUM_KEYSLOTS as u64, PAYLOAD_ALIGN);

    prepare(dev)?;
    if dev.byte_size()? < payload_offset * SECTOR_SIZE as u64 {
        raise!(Error::DeviceTooSmall);
    }

    let master_key = match master_key {
        Some(key) => key.clone(),
        None => Key::random(key_bytes)?,
    };

    let mut header = Header::new_zeroed();
    header.magic = MAGIC_1ST;
    header.version.set(1);
    set_cstr(&mut header.cipher_name, &params.cipher_name)?;
    set_cstr(&mut header.cipher_mode, &params.cipher_mode)?;
    set_cstr(&mut header.hash_spec, params.hash.name())?;
    set_cstr(&mut header.uuid, &uuid)?;
    header.payload_offset.set(payload_offset as u32);
    header.key_bytes.set(key_bytes as u32);
    header.mk_digest_iter.set(or_default(params.mk_iterations, DEFAULT_MK_ITERATIONS));
    random::fill(&mut header.mk_digest_salt);
    header.mk_digest = header.digest(master_key.as_bytes())?;

    for (i, slot) in header.keyslots.iter_mut().enumerate() {
        slot.active.set(KEY_DISABLED);
        slot.key_material_offset
            .set((KEY_MATERIAL_START + per_slot * i as u64) as u32);
        slot.stripes.set(STRIPES);
    }

    if let Some(pwd) = pwd {
        wrap_slot(dev, &mut header, 0, &master_key, pwd, params.slot_iterations)?;
    }
    write_header(dev, &header)?;

    info!("formatted luks1 volume {uuid} ({} {}-bit)", mode.as_str(), key_bytes * 8);
    Ok(master_key)
}

/// Recover the master key with `pwd`
pub fn recover_master_key(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<Key> {
    let header = read_header(dev)?;
    find_slot(dev, &header, pwd).map(|(_, key)| key)
}

/// Add a key slot for `new_pwd`, unlocking the volume with `pwd`
pub fn add_key(dev: &mut dyn BlockDevice, slot_iterations: u32, pwd: &[u8], new_pwd: &[u8]) -> Result<usize> {
    let mut header = read_header(dev)?;
    let Some(index) = header.first_inactive_slot() else {
        raise!(Error::OutOfKeyslots);
    };
    let (_, master_key) = find_slot(dev, &header, pwd)?;

    wrap_slot(dev, &mut header, index, &master_key, new_pwd, slot_iterations)?;
    write_header(dev, &header)?;
    info!("added luks1 key slot {index}");
    Ok(index)
}

/// Add a key slot for `pwd` directly from the master key
pub fn add_key_by_master_key(
    dev: &mut dyn BlockDevice,
    slot_iterations: u32,
    master_key: &Key,
    pwd: &[u8],
) -> Result<usize> {
    let mut header = read_header(dev)?;
    if !header.verify_master_key(master_key)? {
        raise!(Error::KeyLookupFailed);
    }
    let Some(index) = header.first_inactive_slot() else {
        raise!(Error::OutOfKeyslots);
    };

    wrap_slot(dev, &mut header, index, master_key, pwd, slot_iterations)?;
    write_header(dev, &header)?;
    info!("added luks1 key slot {index} from the master key");
    Ok(index)
}

fn remove(dev: &mut dyn BlockDevice, pwd: &[u8], force: bool) -> Result<usize> {
    let mut header = read_header(dev)?;
    let (index, _) = find_slot(dev, &header, pwd)?;
    if !force && header.active_slots() == 1 {
        raise!(Error::LastKeyslot);
    }

    kill_slot(&mut header, index);
    write_header(dev, &header)?;
    wipe_slot_material(dev, &header, index)?;
    info!("removed luks1 key slot {index}");
    Ok(index)
}

/// Remove the key slot `pwd` opens; the last active slot is refused
pub fn remove_key(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<usize> {
    remove(dev, pwd, false)
}

/// Remove the key slot `pwd` opens, even when it is the last one
pub fn remove_key_force(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<usize> {
    remove(dev, pwd, true)
}

/// Replace the password of the slot `old_pwd` opens by `new_pwd`
///
/// The new password goes into a spare slot before the old one is removed.
/// With all slots in use the slot is re-wrapped in place.
pub fn change_key(dev: &mut dyn BlockDevice, old_pwd: &[u8], new_pwd: &[u8]) -> Result<usize> {
    let mut header = read_header(dev)?;
    let (old, master_key) = find_slot(dev, &header, old_pwd)?;
    let iterations = header.keyslots[old].iterations.get();

    let Some(new) = header.first_inactive_slot() else {
        wrap_slot(dev, &mut header, old, &master_key, new_pwd, iterations)?;
        write_header(dev, &header)?;
        info!("changed luks1 key slot {old} in place");
        return Ok(old);
    };

    wrap_slot(dev, &mut header, new, &master_key, new_pwd, iterations)?;
    write_header(dev, &header)?;

    kill_slot(&mut header, old);
    write_header(dev, &header)?;
    wipe_slot_material(dev, &header, old)?;
    info!("moved luks1 key slot {old} to {new}");
    Ok(new)
}

/// Print the header in `cryptsetup luksDump` style
pub fn dump(header: &Header, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "LUKS header information")?;
    writeln!(out)?;
    writeln!(out, "Version:        \t{}", header.version.get())?;
    writeln!(out, "Cipher name:    \t{}", header.cipher_name().unwrap_or("?"))?;
    writeln!(out, "Cipher mode:    \t{}", header.cipher_mode().unwrap_or("?"))?;
    writeln!(out, "Hash spec:      \t{}", header.hash_spec().unwrap_or("?"))?;
    writeln!(out, "Payload offset: \t{}", header.payload_offset.get())?;
    writeln!(out, "MK bits:        \t{}", header.key_size() * 8)?;
    write!(out, "MK digest:      \t")?;
    dump_hex(out, &header.mk_digest)?;
    write!(out, "MK salt:        \t")?;
    dump_hex(out, &header.mk_digest_salt)?;
    writeln!(out, "MK iterations:  \t{}", header.mk_digest_iter.get())?;
    writeln!(out, "UUID:           \t{}", header.uuid().unwrap_or("?"))?;
    writeln!(out)?;

    for (i, slot) in header.keyslots.iter().enumerate() {
        if !slot.is_active() {
            writeln!(out, "Key Slot {i}: DISABLED")?;
            continue;
        }
        writeln!(out, "Key Slot {i}: ENABLED")?;
        writeln!(out, "\tIterations:         \t{}", slot.iterations.get())?;
        write!(out, "\tSalt:               \t")?;
        dump_hex(out, &slot.salt)?;
        writeln!(out, "\tKey material offset:\t{}", slot.key_material_offset.get())?;
        writeln!(out, "\tAF stripes:         \t{}", slot.stripes.get())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDevice;

    const PWD: &[u8] = b"hunter2";

    fn fast_params() -> FormatParams {
        FormatParams {
            mk_iterations: 1000,
            slot_iterations: 1000,
            ..Default::default()
        }
    }

    fn device() -> MemDevice {
        MemDevice::new(4 * 1024 * 1024, 512).unwrap()
    }

    #[test]
    fn test_layout() {
        assert_eq!(slot_sectors(32), 256);
        assert_eq!(slot_sectors(64), 504);

        let mut dev = device();
        let params = FormatParams {
            key_bytes: 32,
            ..fast_params()
        };
        format(&mut dev, &params, None, None).unwrap();
        let header = read_header(&mut dev).unwrap();
        assert_eq!(header.payload_offset.get(), 4096);
        assert_eq!(header.keyslots[0].key_material_offset.get(), 8);
        assert_eq!(header.keyslots[1].key_material_offset.get(), 264);
        assert_eq!(header.keyslots[7].stripes.get(), STRIPES);
        assert_eq!(header.active_slots(), 0);
        assert_eq!(&dev.as_bytes()[..6], b"LUKS\xba\xbe");
        assert_eq!(&dev.as_bytes()[6..8], &[0, 1]);
    }

    #[test_log::test]
    fn test_format_and_recover() {
        let mut dev = device();
        let key = format(&mut dev, &fast_params(), None, Some(PWD)).unwrap();
        assert_eq!(key.len(), 64);

        let recovered = recover_master_key(&mut dev, PWD).unwrap();
        assert_eq!(recovered, key);
        assert_eq!(recover_master_key(&mut dev, b"wrong").unwrap_err(), Error::KeyLookupFailed);
    }

    #[test]
    fn test_supplied_master_key() {
        let mut dev = device();
        let key = Key::from_slice(&[0x11; 32]).unwrap();
        let params = FormatParams {
            cipher_mode: "cbc-plain64".into(),
            hash: HashType::Sha1,
            ..fast_params()
        };
        let used = format(&mut dev, &params, Some(&key), Some(PWD)).unwrap();
        assert_eq!(used, key);
        assert_eq!(recover_master_key(&mut dev, PWD).unwrap(), key);
    }

    #[test]
    fn test_format_validation() {
        let mut dev = device();
        let params = FormatParams {
            uuid: Some("not-a-uuid".into()),
            ..fast_params()
        };
        assert_eq!(format(&mut dev, &params, None, None).unwrap_err(), Error::BadUuid);

        let params = FormatParams {
            cipher_name: "serpent".into(),
            ..fast_params()
        };
        assert_eq!(format(&mut dev, &params, None, None).unwrap_err(), Error::UnsupportedCipher);

        let mut small = MemDevice::new(1024 * 1024, 512).unwrap();
        assert_eq!(
            format(&mut small, &fast_params(), None, None).unwrap_err(),
            Error::DeviceTooSmall
        );
        assert!(small.as_bytes().iter().all(|b| *b == 0));
    }

    #[test_log::test]
    fn test_keyslot_lifecycle() {
        let mut dev = device();
        let key = format(&mut dev, &fast_params(), None, Some(PWD)).unwrap();

        assert_eq!(add_key(&mut dev, 1000, PWD, b"second").unwrap(), 1);
        assert_eq!(recover_master_key(&mut dev, b"second").unwrap(), key);

        assert_eq!(remove_key(&mut dev, PWD).unwrap(), 0);
        assert_eq!(recover_master_key(&mut dev, PWD).unwrap_err(), Error::KeyLookupFailed);
        assert_eq!(remove_key(&mut dev, b"second").unwrap_err(), Error::LastKeyslot);

        assert_eq!(add_key_by_master_key(&mut dev, 1000, &key, b"third").unwrap(), 0);
        let wrong = Key::from_slice(&[0u8; 64]).unwrap();
        assert_eq!(
            add_key_by_master_key(&mut dev, 1000, &wrong, b"x").unwrap_err(),
            Error::KeyLookupFailed
        );

        assert_eq!(remove_key_force(&mut dev, b"second").unwrap(), 1);
        assert_eq!(remove_key_force(&mut dev, b"third").unwrap(), 0);
        assert_eq!(read_header(&mut dev).unwrap().active_slots(), 0);
    }

    #[test]
    fn test_out_of_keyslots() {
        let mut dev = device();
        format(&mut dev, &fast_params(), None, Some(PWD)).unwrap();
        for i in 1..NUM_KEYSLOTS {
            assert_eq!(add_key(&mut dev, 1000, PWD, format!("pw{i}").as_bytes()).unwrap(), i);
        }
        let before = dev.as_bytes().to_vec();
        assert_eq!(add_key(&mut dev, 1000, PWD, b"one more").unwrap_err(), Error::OutOfKeyslots);
        assert_eq!(dev.as_bytes(), &before[..]);
    }

    #[test]
    fn test_change_key() {
        let mut dev = device();
        let key = format(&mut dev, &fast_params(), None, Some(PWD)).unwrap();

        assert_eq!(change_key(&mut dev, PWD, b"new").unwrap(), 1);
        assert_eq!(recover_master_key(&mut dev, b"new").unwrap(), key);
        assert_eq!(recover_master_key(&mut dev, PWD).unwrap_err(), Error::KeyLookupFailed);
        assert_eq!(read_header(&mut dev).unwrap().active_slots(), 1);
    }

    #[test]
    fn test_change_key_in_place() {
        let mut dev = device();
        let key = format(&mut dev, &fast_params(), None, Some(PWD)).unwrap();
        for i in 1..NUM_KEYSLOTS {
            add_key(&mut dev, 1000, PWD, format!("pw{i}").as_bytes()).unwrap();
        }
        assert_eq!(change_key(&mut dev, b"pw3", b"replaced").unwrap(), 3);
        assert_eq!(recover_master_key(&mut dev, b"replaced").unwrap(), key);
        assert_eq!(recover_master_key(&mut dev, b"pw3").unwrap_err(), Error::KeyLookupFailed);
    }

    #[test]
    fn test_corrupt_material() {
        let mut dev = device();
        format(&mut dev, &fast_params(), None, Some(PWD)).unwrap();
        dev.as_bytes_mut()[8 * 512 + 1000] ^= 0x80;
        assert_eq!(recover_master_key(&mut dev, PWD).unwrap_err(), Error::KeyLookupFailed);
    }

    #[test]
    fn test_bad_stripes_refused() {
        let mut dev = device();
        format(&mut dev, &fast_params(), None, Some(PWD)).unwrap();

        // slot 0 stripes field
        dev.as_bytes_mut()[252..256].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(recover_master_key(&mut dev, PWD).unwrap_err(), Error::BadParameter);

        // an inactive slot is checked as well
        dev.as_bytes_mut()[252..256].copy_from_slice(&STRIPES.to_be_bytes());
        assert!(recover_master_key(&mut dev, PWD).is_ok());
        dev.as_bytes_mut()[208 + 5 * 48 + 44..208 + 6 * 48].copy_from_slice(&0u32.to_be_bytes());
        assert_eq!(read_header(&mut dev).unwrap_err(), Error::BadParameter);
    }

    #[test]
    fn test_dump() {
        let mut dev = device();
        let params = FormatParams {
            uuid: Some("0b3f4a39-5f4e-4d8c-9d54-3e1b8f0c2a11".into()),
            ..fast_params()
        };
        format(&mut dev, &params, None, Some(PWD)).unwrap();
        let header = read_header(&mut dev).unwrap();

        let mut out = Vec::new();
        dump(&header, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("0b3f4a39-5f4e-4d8c-9d54-3e1b8f0c2a11"));
        assert!(text.contains("Key Slot 0: ENABLED"));
        assert!(text.contains("Key Slot 7: DISABLED"));
        assert!(text.contains("MK bits:        \t512"));
    }
}
