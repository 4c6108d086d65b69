//! Master Boot Record parsing.
//!
//! Four 16-byte partition entries at offset 446, little-endian LBA
//! fields, and the 0x55AA boot signature at offset 510.

use std::io::{Read, Seek};

use byteorder::{ByteOrder, LittleEndian};

use crate::{read_sector, Partition, PartitionHint, Result, SECTOR_SIZE};

/// Boot signature bytes at offset 510.
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Offset of the partition table within the boot sector.
const TABLE_OFFSET: usize = 446;

/// One slot of the MBR partition table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionEntry {
    pub status: u8,
    pub first_chs: [u8; 3],
    pub kind: u8,
    pub last_chs: [u8; 3],
    pub first_sector_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn parse(buf: &[u8]) -> Self {
        PartitionEntry {
            status: buf[0],
            first_chs: [buf[1], buf[2], buf[3]],
            kind: buf[4],
            last_chs: [buf[5], buf[6], buf[7]],
            first_sector_lba: LittleEndian::read_u32(&buf[8..12]),
            sector_count: LittleEndian::read_u32(&buf[12..16]),
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.status;
        buf[1..4].copy_from_slice(&self.first_chs);
        buf[4] = self.kind;
        buf[5..8].copy_from_slice(&self.last_chs);
        LittleEndian::write_u32(&mut buf[8..12], self.first_sector_lba);
        LittleEndian::write_u32(&mut buf[12..16], self.sector_count);
    }

    pub fn is_empty(&self) -> bool {
        self.kind == 0
    }
}

/// Partition type tags worth naming; everything else reports "unknown".
static PARTITION_TYPES: &[(u8, &str, PartitionHint)] = &[
    (0x01, "FAT12", PartitionHint::FileSystem),
    (0x05, "Extended", PartitionHint::Ignore),
    (0x06, "FAT16", PartitionHint::FileSystem),
    (0x07, "NTFS/exFAT", PartitionHint::FileSystem),
    (0x0B, "FAT32 (CHS)", PartitionHint::FileSystem),
    (0x0C, "FAT32 (LBA)", PartitionHint::FileSystem),
    (0x0F, "Extended (LBA)", PartitionHint::Ignore),
    (0x82, "Linux swap", PartitionHint::Ignore),
    (0x83, "Linux", PartitionHint::FileSystem),
    (0xA8, "Apple UFS", PartitionHint::FileSystem),
    (0xAB, "Apple boot", PartitionHint::Ignore),
    (0xAF, "Apple HFS/HFS+", PartitionHint::Hfs),
    (0xEE, "Protective GPT", PartitionHint::Ignore),
    (0xEF, "EFI system", PartitionHint::Ignore),
];

/// Name and content hint for an MBR partition type tag.
pub fn partition_type(kind: u8) -> (&'static str, PartitionHint) {
    PARTITION_TYPES
        .iter()
        .find(|&&(tag, _, _)| tag == kind)
        .map(|&(_, name, hint)| (name, hint))
        .unwrap_or(("unknown", PartitionHint::Unknown))
}

/// Probe for an MBR. Declines when the boot signature is absent.
pub fn probe<R: Read + Seek>(reader: &mut R) -> Result<Option<Vec<Partition>>> {
    let Some(sector) = read_sector(reader, 0)? else {
        return Ok(None);
    };
    if sector[510..512] != BOOT_SIGNATURE {
        return Ok(None);
    }

    let mut partitions = Vec::new();
    for index in 0..4 {
        let at = TABLE_OFFSET + index * 16;
        let entry = PartitionEntry::parse(&sector[at..at + 16]);
        if entry.is_empty() {
            continue;
        }
        let (name, hint) = partition_type(entry.kind);
        partitions.push(Partition {
            index,
            offset: entry.first_sector_lba as u64 * SECTOR_SIZE,
            length: entry.sector_count as u64 * SECTOR_SIZE,
            hint,
            name: name.to_string(),
        });
    }
    Ok(Some(partitions))
}
