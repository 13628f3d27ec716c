// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! # LUKS2 engine
//!
//! LUKS2 keeps its metadata (key slots, segments, digests) as JSON behind a
//! binary header, in two copies. Key slots use PBKDF2, Argon2i or Argon2id and
//! store AF-split key material in the keyslots area; the master key is checked
//! against PBKDF2 digest records that name the key slots they cover.
//!
//! ## Layout
//!
//! - 0: primary header copy ([`HDR_SIZE`] bytes)
//! - [`HDR_SIZE`]: secondary header copy
//! - [`KEYSLOTS_OFFSET`]: keyslots area ([`KEYSLOTS_SIZE`] bytes)
//! - [`DATA_OFFSET`]: data segment

use std::io::Write;

use log::{debug, info, trace};
use zeroize::Zeroizing;

mod config;
mod superblock;

pub use config::*;
pub use superblock::{read_header as read_raw_header, Header, Luks2, SECONDARY_OFFSETS};

use super::{dump_hex, or_default, parse_uuid, prepare, wipe};
use crate::{
    af,
    blockdev::{read_bytes, write_bytes},
    crypto::{random, Argon2Params, CipherMode, HashType, Kdf, SectorCipher},
    round_up, BlockDevice, Error, Key, Result, SECTOR_SIZE,
};

/// Size of one header copy (binary header and JSON area)
pub const HDR_SIZE: u64 = 16384;
/// Size of the JSON area of a header copy
pub const JSON_SIZE: u64 = HDR_SIZE - superblock::BINARY_SIZE as u64;
/// Start of the keyslots area
pub const KEYSLOTS_OFFSET: u64 = 2 * HDR_SIZE;
/// Size of the keyslots area
pub const KEYSLOTS_SIZE: u64 = 16_744_448;
/// Start of the data segment of a new volume (16 MiB)
pub const DATA_OFFSET: u64 = KEYSLOTS_OFFSET + KEYSLOTS_SIZE;
/// Maximum number of key slots
pub const MAX_KEYSLOTS: u64 = 32;
/// Largest keyslots area accepted in a header (128 MiB)
pub const MAX_KEYSLOTS_SIZE: u64 = 0x800_0000;
/// AF stripes per key slot
pub const STRIPES: u32 = 4000;
/// Alignment of key slot areas
pub const AREA_ALIGN: u64 = 4096;
/// Size of digest and KDF salts in bytes
pub const SALT_SIZE: usize = 32;
/// Default PBKDF2 iterations of the master key digest
pub const DEFAULT_MK_ITERATIONS: u32 = 1000;
/// Default PBKDF2 iterations of a PBKDF2 key slot
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
/// Default Argon2 cost of a key slot
pub const DEFAULT_ARGON2: Argon2Params = Argon2Params {
    time: 4,
    memory: 65536,
    cpus: 1,
};

/// Integrity protection requested for the data segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrity {
    #[default]
    None,
    HmacAead,
    HmacSha256,
    HmacSha512,
    CmacAes,
    Poly1305,
}

impl Integrity {
    /// dm-integrity algorithm name
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Integrity::None => None,
            Integrity::HmacAead => Some("aead"),
            Integrity::HmacSha256 => Some("hmac(sha256)"),
            Integrity::HmacSha512 => Some("hmac(sha512)"),
            Integrity::CmacAes => Some("cmac(aes)"),
            Integrity::Poly1305 => Some("poly1305"),
        }
    }
}

/// Key derivation of a new key slot; zero costs select the defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pbkdf {
    Pbkdf2 { iterations: u32 },
    Argon2i(Argon2Params),
    Argon2id(Argon2Params),
}

impl Default for Pbkdf {
    fn default() -> Self {
        Pbkdf::Argon2id(DEFAULT_ARGON2)
    }
}

impl Pbkdf {
    fn resolved(self) -> Self {
        let argon2 = |p: Argon2Params| Argon2Params {
            time: or_default(p.time, DEFAULT_ARGON2.time),
            memory: or_default(p.memory, DEFAULT_ARGON2.memory),
            cpus: or_default(p.cpus, DEFAULT_ARGON2.cpus),
        };
        match self {
            Pbkdf::Pbkdf2 { iterations } => Pbkdf::Pbkdf2 {
                iterations: or_default(iterations, DEFAULT_PBKDF2_ITERATIONS),
            },
            Pbkdf::Argon2i(p) => Pbkdf::Argon2i(argon2(p)),
            Pbkdf::Argon2id(p) => Pbkdf::Argon2id(argon2(p)),
        }
    }

    fn to_config(self, hash: HashType, salt: Vec<u8>) -> Luks2Kdf {
        match self.resolved() {
            Pbkdf::Pbkdf2 { iterations } => Luks2Kdf::Pbkdf2 {
                hash: hash.name().into(),
                iterations,
                salt,
            },
            Pbkdf::Argon2i(p) => Luks2Kdf::Argon2i {
                time: p.time,
                memory: p.memory,
                cpus: p.cpus,
                salt,
            },
            Pbkdf::Argon2id(p) => Luks2Kdf::Argon2id {
                time: p.time,
                memory: p.memory,
                cpus: p.cpus,
                salt,
            },
        }
    }

    /// The settings an existing key slot was created with
    pub fn from_config(kdf: &Luks2Kdf) -> Result<Self> {
        match kdf {
            Luks2Kdf::Pbkdf2 { iterations, .. } => Ok(Pbkdf::Pbkdf2 {
                iterations: *iterations,
            }),
            Luks2Kdf::Argon2i { time, memory, cpus, .. } => Ok(Pbkdf::Argon2i(Argon2Params {
                time: *time,
                memory: *memory,
                cpus: *cpus,
            })),
            Luks2Kdf::Argon2id { time, memory, cpus, .. } => Ok(Pbkdf::Argon2id(Argon2Params {
                time: *time,
                memory: *memory,
                cpus: *cpus,
            })),
            Luks2Kdf::Unknown => raise!(Error::UnknownKdfType),
        }
    }
}

/// The derivation function and salt stored for a key slot
fn kdf_of(kdf: &Luks2Kdf) -> Result<(Kdf, &[u8])> {
    match kdf {
        Luks2Kdf::Pbkdf2 { hash, iterations, salt } => Ok((
            Kdf::Pbkdf2 {
                hash: hash.parse()?,
                iterations: *iterations,
            },
            salt,
        )),
        Luks2Kdf::Argon2i { time, memory, cpus, salt } => Ok((
            Kdf::Argon2i(Argon2Params {
                time: *time,
                memory: *memory,
                cpus: *cpus,
            }),
            salt,
        )),
        Luks2Kdf::Argon2id { time, memory, cpus, salt } => Ok((
            Kdf::Argon2id(Argon2Params {
                time: *time,
                memory: *memory,
                cpus: *cpus,
            }),
            salt,
        )),
        Luks2Kdf::Unknown => raise!(Error::UnknownKdfType),
    }
}

/// Parameters of a new LUKS2 volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatParams {
    pub cipher_name: String,
    pub cipher_mode: String,
    /// UUID to store, generated when absent
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub subsystem: Option<String>,
    /// Hash of the AF splitter and the master key digest
    pub hash: HashType,
    /// Iterations of the master key digest (0 selects the default)
    pub mk_iterations: u32,
    /// Key derivation of the initial key slot
    pub pbkdf: Pbkdf,
    /// Size of a generated master key in bytes
    pub key_bytes: usize,
    /// Only [`Integrity::None`] is implemented
    pub integrity: Integrity,
}

impl Default for FormatParams {
    fn default() -> Self {
        Self {
            cipher_name: "aes".into(),
            cipher_mode: "xts-plain64".into(),
            uuid: None,
            label: None,
            subsystem: None,
            hash: HashType::Sha256,
            mk_iterations: DEFAULT_MK_ITERATIONS,
            pbkdf: Pbkdf::default(),
            key_bytes: 64,
            integrity: Integrity::None,
        }
    }
}

impl Header {
    /// The data segment (lowest id)
    pub fn segment(&self) -> Result<&Luks2Segment> {
        self.config.segments.values().next().ok_or(Error::NotFound)
    }

    /// Size of the master key in bytes, as recorded by the key slots
    pub fn key_size(&self) -> Option<usize> {
        self.config.keyslots.values().next().map(|k| k.key_size as usize)
    }

    /// Id and record of the digest covering the data segment
    fn segment_digest(&self) -> Result<(u64, &Luks2Digest)> {
        let segment = *self.config.segments.keys().next().ok_or(Error::NotFound)?;
        self.config
            .digests
            .iter()
            .find(|(_, d)| d.segments.contains(&segment))
            .map(|(id, d)| (*id, d))
            .ok_or(Error::DigestNotFound)
    }

    fn first_free_id(&self) -> Option<u64> {
        (0..MAX_KEYSLOTS).find(|id| !self.config.keyslots.contains_key(id))
    }

    /// First offset in the keyslots area where `size` bytes do not overlap another slot
    fn find_area(&self, size: u64) -> Option<u64> {
        let end = KEYSLOTS_OFFSET + self.config.config.keyslots_size;
        let mut offset = KEYSLOTS_OFFSET;
        while offset + size <= end {
            let clash = self
                .config
                .keyslots
                .values()
                .find(|k| k.area.offset < offset + size && offset < k.area.offset + k.area.size);
            match clash {
                Some(k) => offset = round_up(k.area.offset + k.area.size, AREA_ALIGN),
                None => return Some(offset),
            }
        }
        None
    }
}

fn check_digest(digest: &Luks2Digest, key: &Key) -> Result<bool> {
    if digest.digest_type != "pbkdf2" {
        raise!(Error::UnsupportedDigestType);
    }
    let kdf = Kdf::Pbkdf2 {
        hash: digest.hash.parse()?,
        iterations: digest.iterations,
    };
    let mut out = Zeroizing::new(vec![0u8; digest.digest.len()]);
    kdf.derive(key.as_bytes(), &digest.salt, &mut out)?;
    Ok(*out == digest.digest)
}

/// Whether `key` matches any digest covering key slot `id`
fn verify_slot_key(header: &Header, id: u64, key: &Key) -> Result<bool> {
    let mut covered = false;
    for digest in header.config.digests.values().filter(|d| d.keyslots.contains(&id)) {
        covered = true;
        if check_digest(digest, key)? {
            return Ok(true);
        }
    }
    if !covered {
        raise!(Error::DigestNotFound);
    }
    Ok(false)
}

/// Whether `key` is the master key of the data segment
pub fn verify_master_key(header: &Header, key: &Key) -> Result<bool> {
    let (_, digest) = header.segment_digest()?;
    check_digest(digest, key)
}

/// Read the header and refuse volumes with requirements this engine does not meet
pub fn read_header(dev: &mut dyn BlockDevice) -> Result<Header> {
    prepare(dev)?;
    let header = superblock::read_header(dev)?;
    if let Some(requirements) = &header.config.config.requirements {
        if !requirements.mandatory.is_empty() {
            debug!("luks2 requirements not met: {:?}", requirements.mandatory);
            raise!(Error::Unsupported);
        }
    }
    check_areas(&header)?;
    Ok(header)
}

/// Every key slot area must lie inside the keyslots area behind both header copies
fn check_areas(header: &Header) -> Result<()> {
    let keyslots_size = header.config.config.keyslots_size;
    if keyslots_size > MAX_KEYSLOTS_SIZE {
        debug!("luks2 keyslots area of {keyslots_size} bytes");
        raise!(Error::BadParameter);
    }
    let start = 2 * header.binary.hdr_size.get();
    let end = start + keyslots_size;
    for (id, slot) in &header.config.keyslots {
        let area_end = slot.area.offset.checked_add(slot.area.size);
        if slot.area.offset < start || !area_end.is_some_and(|e| e <= end) {
            debug!("luks2 key slot {id} area outside the keyslots area");
            raise!(Error::BadParameter);
        }
    }
    Ok(())
}

fn material_len(slot: &Luks2Keyslot) -> Result<(usize, usize)> {
    let len = (slot.key_size as usize)
        .checked_mul(slot.af.stripes as usize)
        .filter(|n| *n > 0)
        .ok_or(Error::BadParameter)?;
    let padded = round_up(len as u64, SECTOR_SIZE as u64);
    if padded > slot.area.size {
        raise!(Error::OutOfBounds);
    }
    Ok((len, padded as usize))
}

/// Encrypt `master_key` under `pwd` into the area of `slot` and write it
fn write_slot_material(dev: &mut dyn BlockDevice, slot: &Luks2Keyslot, master_key: &Key, pwd: &[u8]) -> Result<()> {
    let (kdf, salt) = kdf_of(&slot.kdf)?;
    let hash: HashType = slot.af.hash.parse()?;
    let mode = CipherMode::from_spec(&slot.area.encryption)?;
    let (len, padded) = material_len(slot)?;

    let mut kek = Zeroizing::new(vec![0u8; slot.area.key_size as usize]);
    kdf.derive(pwd, salt, &mut kek)?;

    let split = af::split(hash, master_key.as_bytes(), slot.af.stripes as usize).map_err(|_| Error::AfSplitFailed)?;
    let mut material = Zeroizing::new(vec![0u8; padded]);
    material[..len].copy_from_slice(&split);

    SectorCipher::new(mode, &kek)?.encrypt(&mut material, 0)?;
    write_bytes(dev, slot.area.offset, &material).map_err(|_| Error::KeyMaterialWriteFailed)
}

/// A key slot record for `master_key`, with a fresh salt
fn new_slot(header: &Header, master_key: &Key, pbkdf: &Pbkdf, offset: u64, size: u64) -> Result<Luks2Keyslot> {
    let segment = header.segment()?;
    let hash = header
        .segment_digest()
        .and_then(|(_, d)| d.hash.parse())
        .unwrap_or(HashType::Sha256);

    Ok(Luks2Keyslot {
        slot_type: "luks2".into(),
        key_size: master_key.len() as u64,
        af: Luks2Af {
            af_type: "luks1".into(),
            stripes: STRIPES,
            hash: hash.name().into(),
        },
        area: Luks2KeyslotArea {
            area_type: "raw".into(),
            offset,
            size,
            encryption: segment.encryption.clone(),
            key_size: master_key.len() as u64,
        },
        kdf: pbkdf.to_config(hash, random::bytes(SALT_SIZE)),
        priority: None,
    })
}

/// Add a key slot for `pwd` to the in-memory header and write its material
fn add_slot(dev: &mut dyn BlockDevice, header: &mut Header, master_key: &Key, pwd: &[u8], pbkdf: &Pbkdf) -> Result<u64> {
    let Some(id) = header.first_free_id() else {
        raise!(Error::OutOfKeyslots);
    };
    let size = round_up(master_key.len() as u64 * STRIPES as u64, AREA_ALIGN);
    let Some(offset) = header.find_area(size) else {
        raise!(Error::OutOfKeyslots);
    };
    let (digest_id, _) = header.segment_digest()?;

    let slot = new_slot(header, master_key, pbkdf, offset, size)?;
    write_slot_material(dev, &slot, master_key, pwd)?;

    header.config.keyslots.insert(id, slot);
    if let Some(digest) = header.config.digests.get_mut(&digest_id) {
        digest.keyslots.push(id);
        digest.keyslots.sort_unstable();
    }
    debug!("wrapped master key into luks2 key slot {id} at {offset}");
    Ok(id)
}

/// Try to unwrap the master key from slot `id` with `pwd`
fn unwrap_slot(dev: &mut dyn BlockDevice, header: &Header, id: u64, pwd: &[u8]) -> Result<Option<Key>> {
    let slot = header.config.keyslots.get(&id).ok_or(Error::NotFound)?;
    if slot.slot_type != "luks2" {
        raise!(Error::UnknownKeyslotType);
    }
    if slot.af.af_type != "luks1" || slot.area.area_type != "raw" {
        raise!(Error::Unsupported);
    }
    if slot.key_size as usize > Key::MAX_SIZE {
        raise!(Error::KeyTooBig);
    }

    let (kdf, salt) = kdf_of(&slot.kdf)?;
    let hash: HashType = slot.af.hash.parse()?;
    let mode = CipherMode::from_spec(&slot.area.encryption)?;
    let (len, padded) = material_len(slot)?;

    let mut kek = Zeroizing::new(vec![0u8; slot.area.key_size as usize]);
    kdf.derive(pwd, salt, &mut kek)?;

    let mut material = Zeroizing::new(vec![0u8; padded]);
    read_bytes(dev, slot.area.offset, &mut material).map_err(|_| Error::KeyMaterialReadFailed)?;
    SectorCipher::new(mode, &kek)?.decrypt(&mut material, 0)?;

    let merged = af::merge(hash, &material[..len], slot.key_size as usize, slot.af.stripes as usize)
        .map_err(|_| Error::AfMergeFailed)?;
    let key = Key::from_slice(&merged)?;

    if verify_slot_key(header, id, &key)? {
        Ok(Some(key))
    } else {
        Ok(None)
    }
}

/// Find the key slot `pwd` opens, returning its id and the master key
///
/// Slots of a kind this engine cannot process are skipped.
fn find_slot(dev: &mut dyn BlockDevice, header: &Header, pwd: &[u8]) -> Result<(u64, Key)> {
    for &id in header.config.keyslots.keys() {
        match unwrap_slot(dev, header, id, pwd) {
            Ok(Some(key)) => {
                trace!("password matches luks2 key slot {id}");
                return Ok((id, key));
            }
            Ok(None) => {}
            Err(e @ (Error::UnknownKdfType | Error::UnknownKeyslotType | Error::Unsupported)) => {
                debug!("skipping luks2 key slot {id}: {e}");
            }
            Err(e) => return Err(e),
        }
    }
    raise!(Error::KeyLookupFailed)
}

/// Drop slot `id` from the in-memory header, returning its record
fn forget_slot(header: &mut Header, id: u64) -> Option<Luks2Keyslot> {
    for digest in header.config.digests.values_mut() {
        digest.keyslots.retain(|k| *k != id);
    }
    header.config.keyslots.remove(&id)
}

/// Write a new LUKS2 header, returning the master key it protects
///
/// A random master key of `params.key_bytes` is generated unless one is given.
/// A key slot is created when `pwd` is given.
pub fn format(
    dev: &mut dyn BlockDevice,
    params: &FormatParams,
    master_key: Option<&Key>,
    pwd: Option<&[u8]>,
) -> Result<Key> {
    if params.integrity != Integrity::None {
        raise!(Error::Unsupported);
    }
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
    let binary = superblock::new_binary(HDR_SIZE, &uuid, params.label.as_deref(), params.subsystem.as_deref())?;

    prepare(dev)?;
    if dev.byte_size()? < DATA_OFFSET {
        raise!(Error::DeviceTooSmall);
    }

    let master_key = match master_key {
        Some(key) => key.clone(),
        None => Key::random(key_bytes)?,
    };

    let mk_iterations = or_default(params.mk_iterations, DEFAULT_MK_ITERATIONS);
    let salt = random::bytes(SALT_SIZE);
    let mut digest = vec![0u8; params.hash.size()];
    Kdf::Pbkdf2 {
        hash: params.hash,
        iterations: mk_iterations,
    }
    .derive(master_key.as_bytes(), &salt, &mut digest)?;

    let segment = Luks2Segment {
        segment_type: "crypt".into(),
        offset: DATA_OFFSET,
        size: "dynamic".into(),
        iv_tweak: 0,
        encryption: format!("{}-{}", params.cipher_name, mode.as_str()),
        sector_size: SECTOR_SIZE as u32,
        integrity: None,
        flags: vec![],
    };
    let digest = Luks2Digest {
        digest_type: "pbkdf2".into(),
        keyslots: vec![],
        segments: vec![0],
        hash: params.hash.name().into(),
        iterations: mk_iterations,
        salt,
        digest,
    };
    let config = Luks2Config {
        keyslots: Default::default(),
        tokens: Default::default(),
        segments: [(0, segment)].into(),
        digests: [(0, digest)].into(),
        config: Luks2ConfigData {
            json_size: JSON_SIZE,
            keyslots_size: KEYSLOTS_SIZE,
            flags: vec![],
            requirements: None,
        },
    };

    let mut header = Header { binary, config };
    if let Some(pwd) = pwd {
        add_slot(dev, &mut header, &master_key, pwd, &params.pbkdf)?;
    }
    superblock::write_header(dev, &mut header)?;

    info!("formatted luks2 volume {uuid} ({} {}-bit)", mode.as_str(), key_bytes * 8);
    Ok(master_key)
}

/// Recover the master key with `pwd`
pub fn recover_master_key(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<Key> {
    let header = read_header(dev)?;
    find_slot(dev, &header, pwd).map(|(_, key)| key)
}

/// Add a key slot for `new_pwd`, unlocking the volume with `pwd`
pub fn add_key(dev: &mut dyn BlockDevice, pbkdf: &Pbkdf, pwd: &[u8], new_pwd: &[u8]) -> Result<u64> {
    let mut header = read_header(dev)?;
    if header.first_free_id().is_none() {
        raise!(Error::OutOfKeyslots);
    }
    let (_, master_key) = find_slot(dev, &header, pwd)?;

    let id = add_slot(dev, &mut header, &master_key, new_pwd, pbkdf)?;
    superblock::write_header(dev, &mut header)?;
    info!("added luks2 key slot {id}");
    Ok(id)
}

/// Add a key slot for `pwd` directly from the master key
pub fn add_key_by_master_key(dev: &mut dyn BlockDevice, pbkdf: &Pbkdf, master_key: &Key, pwd: &[u8]) -> Result<u64> {
    let mut header = read_header(dev)?;
    if !verify_master_key(&header, master_key)? {
        raise!(Error::KeyLookupFailed);
    }

    let id = add_slot(dev, &mut header, master_key, pwd, pbkdf)?;
    superblock::write_header(dev, &mut header)?;
    info!("added luks2 key slot {id} from the master key");
    Ok(id)
}

fn remove(dev: &mut dyn BlockDevice, pwd: &[u8], force: bool) -> Result<u64> {
    let mut header = read_header(dev)?;
    let (id, _) = find_slot(dev, &header, pwd)?;
    if !force && header.config.keyslots.len() == 1 {
        raise!(Error::LastKeyslot);
    }

    let slot = forget_slot(&mut header, id).ok_or(Error::Unexpected)?;
    superblock::write_header(dev, &mut header)?;
    wipe(dev, slot.area.offset, slot.area.size).map_err(|_| Error::KeyMaterialWriteFailed)?;
    info!("removed luks2 key slot {id}");
    Ok(id)
}

/// Remove the key slot `pwd` opens; the last key slot is refused
pub fn remove_key(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<u64> {
    remove(dev, pwd, false)
}

/// Remove the key slot `pwd` opens, even when it is the last one
pub fn remove_key_force(dev: &mut dyn BlockDevice, pwd: &[u8]) -> Result<u64> {
    remove(dev, pwd, true)
}

/// Replace the password of the slot `old_pwd` opens by `new_pwd`
///
/// The new slot keeps the key derivation settings of the old one. It is added
/// before the old slot is removed; with no room left the slot is re-wrapped in place.
pub fn change_key(dev: &mut dyn BlockDevice, old_pwd: &[u8], new_pwd: &[u8]) -> Result<u64> {
    let mut header = read_header(dev)?;
    let (old, master_key) = find_slot(dev, &header, old_pwd)?;
    let old_slot = header.config.keyslots.get(&old).cloned().ok_or(Error::Unexpected)?;
    let pbkdf = Pbkdf::from_config(&old_slot.kdf)?;

    let size = round_up(master_key.len() as u64 * STRIPES as u64, AREA_ALIGN);
    if header.first_free_id().is_none() || header.find_area(size).is_none() {
        let mut slot = old_slot;
        let hash: HashType = slot.af.hash.parse()?;
        slot.kdf = pbkdf.to_config(hash, random::bytes(SALT_SIZE));
        write_slot_material(dev, &slot, &master_key, new_pwd)?;
        header.config.keyslots.insert(old, slot);
        superblock::write_header(dev, &mut header)?;
        info!("changed luks2 key slot {old} in place");
        return Ok(old);
    }

    let new = add_slot(dev, &mut header, &master_key, new_pwd, &pbkdf)?;
    superblock::write_header(dev, &mut header)?;

    forget_slot(&mut header, old);
    superblock::write_header(dev, &mut header)?;
    wipe(dev, old_slot.area.offset, old_slot.area.size).map_err(|_| Error::KeyMaterialWriteFailed)?;
    info!("moved luks2 key slot {old} to {new}");
    Ok(new)
}

fn kdf_lines(out: &mut dyn Write, kdf: &Luks2Kdf) -> std::io::Result<()> {
    match kdf {
        Luks2Kdf::Pbkdf2 { hash, iterations, salt } => {
            writeln!(out, "\tPBKDF:      pbkdf2")?;
            writeln!(out, "\tHash:       {hash}")?;
            writeln!(out, "\tIterations: {iterations}")?;
            write!(out, "\tSalt:       ")?;
            dump_hex(out, salt)
        }
        Luks2Kdf::Argon2i { time, memory, cpus, salt } | Luks2Kdf::Argon2id { time, memory, cpus, salt } => {
            let name = if matches!(kdf, Luks2Kdf::Argon2i { .. }) { "argon2i" } else { "argon2id" };
            writeln!(out, "\tPBKDF:      {name}")?;
            writeln!(out, "\tTime cost:  {time}")?;
            writeln!(out, "\tMemory:     {memory}")?;
            writeln!(out, "\tThreads:    {cpus}")?;
            write!(out, "\tSalt:       ")?;
            dump_hex(out, salt)
        }
        Luks2Kdf::Unknown => writeln!(out, "\tPBKDF:      (unknown)"),
    }
}

/// Print the header in `cryptsetup luksDump` style
pub fn dump(header: &Header, out: &mut dyn Write) -> std::io::Result<()> {
    let binary = &header.binary;
    let config = &header.config;
    let or_none = |s: Result<&str>, none: &'static str| match s {
        Ok("") | Err(_) => none.to_owned(),
        Ok(s) => s.to_owned(),
    };

    writeln!(out, "LUKS header information")?;
    writeln!(out, "Version:       \t{}", binary.version.get())?;
    writeln!(out, "Epoch:         \t{}", binary.seqid.get())?;
    writeln!(out, "Metadata area: \t{} [bytes]", config.config.json_size)?;
    writeln!(out, "Keyslots area: \t{} [bytes]", config.config.keyslots_size)?;
    writeln!(out, "UUID:          \t{}", or_none(binary.uuid(), "(no uuid)"))?;
    writeln!(out, "Label:         \t{}", or_none(binary.label(), "(no label)"))?;
    writeln!(out, "Subsystem:     \t{}", or_none(binary.subsystem(), "(no subsystem)"))?;
    if config.config.flags.is_empty() {
        writeln!(out, "Flags:       \t(no flags)")?;
    } else {
        writeln!(out, "Flags:       \t{}", config.config.flags.join(" "))?;
    }

    writeln!(out)?;
    writeln!(out, "Data segments:")?;
    for (id, segment) in &config.segments {
        writeln!(out, "  {id}: {}", segment.segment_type)?;
        writeln!(out, "\toffset: {} [bytes]", segment.offset)?;
        match segment.fixed_size() {
            Some(size) => writeln!(out, "\tlength: {size} [bytes]")?,
            None => writeln!(out, "\tlength: (whole device)")?,
        }
        writeln!(out, "\tcipher: {}", segment.encryption)?;
        writeln!(out, "\tsector: {} [bytes]", segment.sector_size)?;
        if let Some(integrity) = &segment.integrity {
            writeln!(out, "\tintegrity: {}", integrity.integrity_type)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "Keyslots:")?;
    for (id, slot) in &config.keyslots {
        writeln!(out, "  {id}: {}", slot.slot_type)?;
        writeln!(out, "\tKey:        {} bits", slot.key_size * 8)?;
        writeln!(out, "\tCipher:     {}", slot.area.encryption)?;
        writeln!(out, "\tCipher key: {} bits", slot.area.key_size * 8)?;
        kdf_lines(out, &slot.kdf)?;
        writeln!(out, "\tAF stripes: {}", slot.af.stripes)?;
        writeln!(out, "\tAF hash:    {}", slot.af.hash)?;
        writeln!(out, "\tArea offset:{} [bytes]", slot.area.offset)?;
        writeln!(out, "\tArea length:{} [bytes]", slot.area.size)?;
        for (digest_id, _) in config.digests.iter().filter(|(_, d)| d.keyslots.contains(id)) {
            writeln!(out, "\tDigest ID:  {digest_id}")?;
        }
    }

    writeln!(out, "Tokens:")?;
    for (id, token) in &config.tokens {
        let kind = token.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
        writeln!(out, "  {id}: {kind}")?;
    }

    writeln!(out, "Digests:")?;
    for (id, digest) in &config.digests {
        writeln!(out, "  {id}: {}", digest.digest_type)?;
        writeln!(out, "\tHash:       {}", digest.hash)?;
        writeln!(out, "\tIterations: {}", digest.iterations)?;
        write!(out, "\tSalt:       ")?;
        dump_hex(out, &digest.salt)?;
        write!(out, "\tDigest:     ")?;
        dump_hex(out, &digest.digest)?;
    }
    Ok(())
}
