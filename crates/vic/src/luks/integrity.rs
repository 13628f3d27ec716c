// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! dm-integrity superblock, found at the start of a LUKS2 segment with integrity

use std::io::Write;

use zerocopy::*;

use crate::{blockdev::read_bytes, error::io_error, BlockDevice, Error, Result, SECTOR_SIZE};

/// `integrt\0`
pub const MAGIC: [u8; 8] = *b"integrt\0";

pub const FLAG_HAVE_JOURNAL_MAC: u32 = 0x1;
pub const FLAG_RECALCULATING: u32 = 0x2;
pub const FLAG_DIRTY_BITMAP: u32 = 0x4;
pub const FLAG_FIXED_PADDING: u32 = 0x8;
pub const FLAG_FIXED_HMAC: u32 = 0x10;

/// On-disk dm-integrity superblock (little endian)
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Superblock {
    pub magic: [u8; 8],
    pub version: u8,
    pub log2_interleave_sectors: i8,
    pub integrity_tag_size: U16<LittleEndian>,
    pub journal_sections: U32<LittleEndian>,
    pub provided_data_sectors: U64<LittleEndian>,
    pub flags: U32<LittleEndian>,
    pub log2_sectors_per_block: u8,
    pub log2_blocks_per_bitmap_bit: u8,
    pub pad: [u8; 2],
    pub recalc_sector: U64<LittleEndian>,
    pub pad2: [u8; 8],
    pub salt: [u8; 16],
}

const _: () = assert!(core::mem::offset_of!(Superblock, version) == 8);
const _: () = assert!(core::mem::offset_of!(Superblock, integrity_tag_size) == 10);
const _: () = assert!(core::mem::offset_of!(Superblock, provided_data_sectors) == 16);
const _: () = assert!(core::mem::offset_of!(Superblock, log2_sectors_per_block) == 28);
const _: () = assert!(core::mem::offset_of!(Superblock, recalc_sector) == 32);
const _: () = assert!(core::mem::offset_of!(Superblock, salt) == 48);
const _: () = assert!(core::mem::size_of::<Superblock>() == 64);

impl Superblock {
    /// Bytes per integrity block
    pub fn sector_size(&self) -> Result<u64> {
        let shift = u32::from(self.log2_sectors_per_block);
        match (SECTOR_SIZE as u64).checked_shl(shift) {
            Some(size) if size >> shift == SECTOR_SIZE as u64 => Ok(size),
            _ => raise!(Error::BadParameter),
        }
    }
}

/// Read the superblock at byte `offset`, `None` when there is none
pub fn read_superblock(dev: &mut dyn BlockDevice, offset: u64) -> Result<Option<Superblock>> {
    let mut buf = vec![0u8; SECTOR_SIZE.max(dev.block_size())];
    read_bytes(dev, offset, &mut buf).map_err(|_| Error::HeaderReadFailed)?;
    let (sb, _) = Superblock::read_from_prefix(&buf).map_err(|_| Error::HeaderReadFailed)?;
    if sb.magic != MAGIC {
        return Ok(None);
    }
    Ok(Some(sb))
}

/// Print the superblock in `integritysetup dump` style
pub fn dump(sb: &Superblock, out: &mut dyn Write) -> Result<()> {
    let sector_size = sb.sector_size()?;
    write_dump(sb, sector_size, out).map_err(|e| io_error(Error::WriteFailed, "integrity dump", e))
}

fn write_dump(sb: &Superblock, sector_size: u64, out: &mut dyn Write) -> std::io::Result<()> {
    let flags = sb.flags.get();
    writeln!(out, "Info for integrity device.")?;
    writeln!(out, "superblock_version {}", sb.version)?;
    writeln!(out, "log2_interleave_sectors {}", sb.log2_interleave_sectors)?;
    writeln!(out, "integrity_tag_size {}", sb.integrity_tag_size.get())?;
    writeln!(out, "journal_sections {}", sb.journal_sections.get())?;
    writeln!(out, "provided_data_sectors {}", sb.provided_data_sectors.get())?;
    writeln!(out, "sector_size {sector_size}")?;
    if sb.version >= 2 {
        writeln!(out, "log2_blocks_per_bitmap {}", sb.log2_blocks_per_bitmap_bit)?;
    }

    let names = [
        (FLAG_HAVE_JOURNAL_MAC, "have_journal_mac"),
        (FLAG_RECALCULATING, "recalculating"),
        (FLAG_DIRTY_BITMAP, "dirty_bitmap"),
        (FLAG_FIXED_PADDING, "fix_padding"),
        (FLAG_FIXED_HMAC, "fix_hmac"),
    ];
    write!(out, "flags")?;
    for (bit, name) in names {
        if flags & bit != 0 {
            write!(out, " {name}")?;
        }
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDevice;

    #[test]
    fn test_read_superblock() {
        let mut dev = MemDevice::new(8192, 512).unwrap();
        assert!(read_superblock(&mut dev, 4096).unwrap().is_none());

        let mut sb = Superblock::new_zeroed();
        sb.magic = MAGIC;
        sb.version = 2;
        sb.integrity_tag_size.set(32);
        sb.provided_data_sectors.set(1000);
        sb.log2_sectors_per_block = 3;
        sb.flags.set(FLAG_HAVE_JOURNAL_MAC | FLAG_FIXED_PADDING);
        dev.as_bytes_mut()[4096..4096 + 64].copy_from_slice(sb.as_bytes());

        let sb = read_superblock(&mut dev, 4096).unwrap().unwrap();
        assert_eq!(sb.integrity_tag_size.get(), 32);

        let mut out = Vec::new();
        dump(&sb, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("sector_size 4096"));
        assert!(text.contains("flags have_journal_mac fix_padding\n"));
    }

    #[test]
    fn test_sector_size_shift() {
        let mut sb = Superblock::new_zeroed();
        sb.magic = MAGIC;
        assert_eq!(sb.sector_size().unwrap(), 512);

        for shift in [55u8, 64, 255] {
            sb.log2_sectors_per_block = shift;
            assert_eq!(sb.sector_size().unwrap_err(), Error::BadParameter);
            assert_eq!(dump(&sb, &mut Vec::new()).unwrap_err(), Error::BadParameter);
        }
    }
}
