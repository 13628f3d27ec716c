// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! # dm-verity hash trees
//!
//! Every 4096-byte data block is hashed as `H(salt || block)`. The digests are
//! packed into 4096-byte nodes (zero padded), which are hashed the same way
//! level by level until a single node remains; the root hash is the salted hash
//! of that node.
//!
//! ## Hash device layout
//!
//! - block 0: [`Superblock`] (optional)
//! - then one run of nodes per level, from the top node down to the leaves

use std::{io::Write, path::Path};

use log::{debug, info};

mod superblock;

pub use superblock::{Superblock, MAX_SALT_SIZE, SIGNATURE};

use crate::{
    crypto::{random, HashType},
    dm::{DeviceMapper, VerityTarget},
    error::io_error,
    BlockDevice, Error, FileDevice, OpenMode, Result,
};

/// Data and hash block size
pub const BLOCK_SIZE: usize = 4096;
/// Smallest data device in blocks
pub const MIN_DATA_BLOCKS: u64 = 2;

/// Data blocks hashed per read
const READ_BATCH: usize = 32;

/// Parameters of a new hash tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub hash: HashType,
    /// Stored in the superblock, generated when absent
    pub uuid: Option<String>,
    /// Random salt of the hash size when absent
    pub salt: Option<Vec<u8>>,
    /// Write a superblock in block 0 of the hash device
    pub need_superblock: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            hash: HashType::Sha256,
            uuid: None,
            salt: None,
            need_superblock: true,
        }
    }
}

/// Shape of the tree over a given number of data blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub hash: HashType,
    pub data_blocks: u64,
    /// Node count per level, leaves first
    pub levels: Vec<u64>,
    /// Whether block 0 of the hash device holds a superblock
    pub superblock: bool,
}

impl Geometry {
    pub fn new(hash: HashType, data_blocks: u64, superblock: bool) -> Self {
        let per_node = (BLOCK_SIZE / hash.size()) as u64;
        let mut levels = vec![data_blocks.div_ceil(per_node)];
        let mut n = levels[0];
        while n > 1 {
            n = n.div_ceil(per_node);
            levels.push(n);
        }
        Self {
            hash,
            data_blocks,
            levels,
            superblock,
        }
    }

    /// Digests packed into one node
    pub fn digests_per_node(&self) -> usize {
        BLOCK_SIZE / self.hash.size()
    }

    /// Nodes over all levels
    pub fn total_nodes(&self) -> u64 {
        self.levels.iter().sum()
    }

    /// Size of the hash device in blocks
    pub fn hash_blocks(&self) -> u64 {
        self.total_nodes() + self.superblock as u64
    }

    /// First block of `level` (0 = leaves) on the hash device
    pub fn level_offset(&self, level: usize) -> u64 {
        self.superblock as u64 + self.levels[level + 1..].iter().sum::<u64>()
    }

    /// Block of the top node
    pub fn root_block(&self) -> u64 {
        self.level_offset(self.levels.len() - 1)
    }
}

/// Packs child digests into nodes and writes each node once full
struct NodeWriter {
    node: Vec<u8>,
    used: usize,
    next: u64,
}

impl NodeWriter {
    fn new(start: u64) -> Self {
        Self {
            node: vec![0u8; BLOCK_SIZE],
            used: 0,
            next: start,
        }
    }

    fn push(&mut self, dev: &mut dyn BlockDevice, digest: &[u8]) -> Result<()> {
        if self.used + digest.len() > BLOCK_SIZE {
            self.flush(dev)?;
        }
        self.node[self.used..self.used + digest.len()].copy_from_slice(digest);
        self.used += digest.len();
        Ok(())
    }

    fn flush(&mut self, dev: &mut dyn BlockDevice) -> Result<()> {
        if self.used == 0 {
            return Ok(());
        }
        dev.put(self.next, &self.node)?;
        self.node.fill(0);
        self.used = 0;
        self.next += 1;
        Ok(())
    }
}

fn salted(hash: HashType, salt: &[u8], block: &[u8]) -> Vec<u8> {
    hash.digest(&[salt, block])
}

/// Address both devices in 4096-byte blocks and check the data size
fn prepare(data: &mut dyn BlockDevice, hash: &mut dyn BlockDevice) -> Result<u64> {
    data.set_block_size(BLOCK_SIZE)?;
    hash.set_block_size(BLOCK_SIZE)?;
    let blocks = data.num_blocks()?;
    if blocks < MIN_DATA_BLOCKS {
        raise!(Error::FileTooSmall);
    }
    Ok(blocks)
}

/// Build the tree over `data` into `hash`, returning the root hash
pub fn format(data: &mut dyn BlockDevice, hash: &mut dyn BlockDevice, options: &FormatOptions) -> Result<Vec<u8>> {
    let salt = match &options.salt {
        Some(salt) if salt.is_empty() || salt.len() > MAX_SALT_SIZE => raise!(Error::BadParameter),
        Some(salt) => salt.clone(),
        None => random::bytes(options.hash.size()),
    };
    let uuid = match &options.uuid {
        Some(s) => uuid::Uuid::parse_str(s).map_err(|_| Error::BadUuid)?,
        None => uuid::Uuid::new_v4(),
    };

    let data_blocks = prepare(data, hash)?;
    let geometry = Geometry::new(options.hash, data_blocks, options.need_superblock);
    debug!(
        "verity tree over {data_blocks} blocks: levels {:?}, {} hash blocks",
        geometry.levels,
        geometry.hash_blocks()
    );

    let zeros = vec![0u8; BLOCK_SIZE * READ_BATCH];
    let mut done = 0;
    while done < geometry.hash_blocks() {
        let n = (READ_BATCH as u64).min(geometry.hash_blocks() - done);
        hash.put(done, &zeros[..n as usize * BLOCK_SIZE])?;
        done += n;
    }

    // leaves
    let mut writer = NodeWriter::new(geometry.level_offset(0));
    let mut batch = vec![0u8; BLOCK_SIZE * READ_BATCH];
    let mut blkno = 0;
    while blkno < data_blocks {
        let n = (READ_BATCH as u64).min(data_blocks - blkno) as usize;
        let buf = &mut batch[..n * BLOCK_SIZE];
        data.get(blkno, buf)?;
        for block in buf.chunks_exact(BLOCK_SIZE) {
            writer.push(hash, &salted(options.hash, &salt, block))?;
        }
        blkno += n as u64;
    }
    writer.flush(hash)?;

    // interior levels
    let mut node = vec![0u8; BLOCK_SIZE];
    for level in 1..geometry.levels.len() {
        let children = geometry.level_offset(level - 1);
        let mut writer = NodeWriter::new(geometry.level_offset(level));
        for child in 0..geometry.levels[level - 1] {
            hash.get(children + child, &mut node)?;
            writer.push(hash, &salted(options.hash, &salt, &node))?;
        }
        writer.flush(hash)?;
    }

    hash.get(geometry.root_block(), &mut node)?;
    let root = salted(options.hash, &salt, &node);

    if options.need_superblock {
        let sb = Superblock::new(&uuid, options.hash, BLOCK_SIZE as u32, data_blocks, &salt)?;
        let mut block = vec![0u8; BLOCK_SIZE];
        block[..512].copy_from_slice(zerocopy::IntoBytes::as_bytes(&sb));
        hash.put(0, &block)?;
    }

    info!("formatted verity tree over {data_blocks} blocks, root {}", hex::encode(&root));
    Ok(root)
}

/// Read the superblock from block 0 of the hash device
pub fn read_superblock(hash: &mut dyn BlockDevice) -> Result<Superblock> {
    hash.set_block_size(BLOCK_SIZE)?;
    let mut block = vec![0u8; BLOCK_SIZE];
    hash.get(0, &mut block)?;
    Superblock::from_block(&block)
}

/// Recompute the tree from `data` and compare every node and the root with `root_hash`
pub fn verify(data: &mut dyn BlockDevice, hash: &mut dyn BlockDevice, root_hash: &[u8]) -> Result<()> {
    let sb = read_superblock(hash)?;
    let alg = sb.hash()?;
    let salt = sb.salt()?.to_vec();
    if sb.data_block_size.get() as usize != BLOCK_SIZE || sb.hash_block_size.get() as usize != BLOCK_SIZE {
        raise!(Error::Unsupported);
    }
    let data_blocks = prepare(data, hash)?;
    if data_blocks < sb.data_blocks.get() {
        raise!(Error::FileTooSmall);
    }
    let geometry = Geometry::new(alg, sb.data_blocks.get(), true);
    let per_node = geometry.digests_per_node();

    let mut expected = vec![0u8; BLOCK_SIZE];
    let mut stored = vec![0u8; BLOCK_SIZE];
    let mut block = vec![0u8; BLOCK_SIZE];

    for (level, &nodes) in geometry.levels.iter().enumerate() {
        let (children, child_start) = match level {
            0 => (geometry.data_blocks, 0),
            _ => (geometry.levels[level - 1], geometry.level_offset(level - 1)),
        };
        for index in 0..nodes {
            expected.fill(0);
            let first = index * per_node as u64;
            let last = (first + per_node as u64).min(children);
            for (slot, child) in (first..last).enumerate() {
                if level == 0 {
                    data.get(child, &mut block)?;
                } else {
                    hash.get(child_start + child, &mut block)?;
                }
                let digest = salted(alg, &salt, &block);
                expected[slot * digest.len()..(slot + 1) * digest.len()].copy_from_slice(&digest);
            }
            hash.get(geometry.level_offset(level) + index, &mut stored)?;
            if stored != expected {
                debug!("verity node {index} of level {level} does not match");
                raise!(Error::VerifyFailed);
            }
        }
    }

    hash.get(geometry.root_block(), &mut block)?;
    if salted(alg, &salt, &block) != root_hash {
        debug!("verity root hash does not match");
        raise!(Error::VerifyFailed);
    }
    Ok(())
}

/// Map `data_path` verified by `hash_path` as device-mapper device `name`
pub fn open(dm: &mut dyn DeviceMapper, name: &str, data_path: &Path, hash_path: &Path, root_hash: &[u8]) -> Result<()> {
    let mut hash = FileDevice::open(hash_path, OpenMode::ReadOnly, BLOCK_SIZE)?;
    let sb = read_superblock(&mut hash)?;
    let alg = sb.hash()?;
    if root_hash.len() != alg.size() {
        raise!(Error::BadParameter);
    }
    let data_block_size = sb.data_block_size.get();
    if data_block_size == 0 {
        raise!(Error::BadParameter);
    }
    let data = FileDevice::open(data_path, OpenMode::ReadOnly, data_block_size as usize)?;
    let data_blocks = data.num_blocks()?;
    drop(data);
    drop(hash);

    let target = VerityTarget {
        data_device: dm.attach(data_path, true)?,
        hash_device: dm.attach(hash_path, true)?,
        data_block_size,
        hash_block_size: sb.hash_block_size.get(),
        data_blocks,
        hash_start: 1,
        algorithm: sb.algorithm()?.to_owned(),
        root_hash: root_hash.to_vec(),
        salt: sb.salt()?.to_vec(),
    };
    dm.create(name, &target.to_string(), true)?;
    info!("opened verity device {name}");
    Ok(())
}

/// Remove device-mapper device `name`
pub fn close(dm: &mut dyn DeviceMapper, name: &str) -> Result<()> {
    dm.remove(name)
}

/// Print the superblock and the root hash recomputed from the top node
pub fn dump(hash: &mut dyn BlockDevice, out: &mut dyn Write) -> Result<()> {
    let sb = read_superblock(hash)?;
    let alg = sb.hash()?;
    let mut node = vec![0u8; BLOCK_SIZE];
    hash.get(1, &mut node)?;
    let root = salted(alg, sb.salt()?, &node);

    let print = |out: &mut dyn Write| -> std::io::Result<()> {
        writeln!(out, "VERITY header information")?;
        writeln!(out, "UUID:            \t{}", sb.uuid())?;
        writeln!(out, "Hash type:       \t{}", sb.hash_type.get())?;
        writeln!(out, "Data blocks:     \t{}", sb.data_blocks.get())?;
        writeln!(out, "Data block size: \t{}", sb.data_block_size.get())?;
        writeln!(out, "Hash block size: \t{}", sb.hash_block_size.get())?;
        writeln!(out, "Hash algorithm:  \t{}", alg)?;
        writeln!(out, "Salt:            \t{}", hex::encode(sb.salt().unwrap_or_default()))?;
        writeln!(out, "Root hash:       \t{}", hex::encode(&root))
    };
    print(out).map_err(|e| io_error(Error::WriteFailed, "verity dump", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDevice;

    const UUID: &str = "6f1c2c8e-3d7b-4b57-9f0a-2b8e4e1c5d90";

    fn data(blocks: usize) -> MemDevice {
        let bytes = (0..blocks * BLOCK_SIZE).map(|i| (i / 7) as u8).collect();
        MemDevice::from_bytes(bytes, 512).unwrap()
    }

    fn options() -> FormatOptions {
        FormatOptions {
            uuid: Some(UUID.into()),
            salt: Some(b"0123456789abcdef".to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn test_geometry() {
        let g = Geometry::new(HashType::Sha256, 16384, true);
        assert_eq!(g.levels, vec![128, 1]);
        assert_eq!(g.total_nodes(), 129);
        assert_eq!(g.hash_blocks(), 130);
        assert_eq!(g.root_block(), 1);
        assert_eq!(g.level_offset(0), 2);

        let g = Geometry::new(HashType::Sha256, 2, false);
        assert_eq!(g.levels, vec![1]);
        assert_eq!(g.root_block(), 0);

        let g = Geometry::new(HashType::Sha512, 64 * 64 + 1, false);
        assert_eq!(g.levels, vec![65, 2, 1]);
        assert_eq!(g.level_offset(0), 3);
        assert_eq!(g.level_offset(1), 1);
    }

    #[test]
    fn test_two_block_root() {
        let mut data = MemDevice::new(2 * BLOCK_SIZE, 512).unwrap();
        let mut hash = MemDevice::growable(BLOCK_SIZE).unwrap();
        let salt = b"salt".to_vec();
        let opts = FormatOptions {
            salt: Some(salt.clone()),
            need_superblock: false,
            ..options()
        };
        let root = format(&mut data, &mut hash, &opts).unwrap();

        let leaf = HashType::Sha256.digest(&[&salt, &[0u8; BLOCK_SIZE]]);
        let mut node = vec![0u8; BLOCK_SIZE];
        node[..32].copy_from_slice(&leaf);
        node[32..64].copy_from_slice(&leaf);
        assert_eq!(hash.as_bytes(), node.as_slice());
        assert_eq!(root, HashType::Sha256.digest(&[&salt, &node]));
    }

    #[test_log::test]
    fn test_format_is_deterministic() {
        let mut first = MemDevice::growable(BLOCK_SIZE).unwrap();
        let mut second = MemDevice::growable(BLOCK_SIZE).unwrap();
        let a = format(&mut data(300), &mut first, &options()).unwrap();
        let b = format(&mut data(300), &mut second, &options()).unwrap();
        assert_eq!(a, b);
        assert_eq!(first.as_bytes(), second.as_bytes());
        // superblock + 3 leaves + top node
        assert_eq!(first.byte_size().unwrap(), 5 * BLOCK_SIZE as u64);

        let mut flipped = data(300);
        flipped.as_bytes_mut()[299 * BLOCK_SIZE + 17] ^= 1;
        let c = format(&mut flipped, &mut MemDevice::growable(BLOCK_SIZE).unwrap(), &options()).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_verify() {
        let mut data = data(200);
        let mut hash = MemDevice::growable(BLOCK_SIZE).unwrap();
        let root = format(&mut data, &mut hash, &options()).unwrap();
        verify(&mut data, &mut hash, &root).unwrap();

        let mut wrong = root.clone();
        wrong[0] ^= 0xff;
        assert_eq!(verify(&mut data, &mut hash, &wrong).unwrap_err(), Error::VerifyFailed);

        data.as_bytes_mut()[150 * BLOCK_SIZE] ^= 0x80;
        assert_eq!(verify(&mut data, &mut hash, &root).unwrap_err(), Error::VerifyFailed);
    }

    #[test]
    fn test_superblock_and_dump() {
        let mut hash = MemDevice::growable(BLOCK_SIZE).unwrap();
        let root = format(&mut data(4), &mut hash, &options()).unwrap();

        let sb = read_superblock(&mut hash).unwrap();
        assert_eq!(sb.data_blocks.get(), 4);
        assert_eq!(sb.uuid().to_string(), UUID);
        assert_eq!(sb.salt().unwrap(), b"0123456789abcdef");

        let mut out = Vec::new();
        dump(&mut hash, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(&format!("Root hash:       \t{}", hex::encode(&root))));
        assert!(text.contains("Hash algorithm:  \tsha256"));
    }

    #[test]
    fn test_validation() {
        let mut hash = MemDevice::growable(BLOCK_SIZE).unwrap();
        assert_eq!(
            format(&mut data(1), &mut hash, &options()).unwrap_err(),
            Error::FileTooSmall
        );

        let mut odd = MemDevice::new(2 * BLOCK_SIZE + 512, 512).unwrap();
        assert_eq!(format(&mut odd, &mut hash, &options()).unwrap_err(), Error::NotBlockMultiple);

        let opts = FormatOptions {
            salt: Some(vec![0u8; MAX_SALT_SIZE + 1]),
            ..options()
        };
        assert_eq!(format(&mut data(2), &mut hash, &opts).unwrap_err(), Error::BadParameter);

        let opts = FormatOptions {
            uuid: Some("nope".into()),
            ..options()
        };
        assert_eq!(format(&mut data(2), &mut hash, &opts).unwrap_err(), Error::BadUuid);

        let mut blank = MemDevice::new(BLOCK_SIZE, 512).unwrap();
        assert_eq!(read_superblock(&mut blank).unwrap_err(), Error::BadSignature);
    }
}
