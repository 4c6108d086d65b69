//! Apple Partition Map parsing.
//!
//! An optional Driver Descriptor Map ("ER") occupies block 0; "PM" map
//! entries start at block 1, one per 512-byte block, each naming its own
//! count of total map entries. All fields are big-endian.

use std::io::{Read, Seek};

use byteorder::{ByteOrder, BigEndian};
use log::warn;

use crate::{read_sector, Partition, PartitionHint, Result, SECTOR_SIZE};

/// Driver Descriptor Map signature "ER".
pub const DDM_SIGNATURE: u16 = 0x4552;

/// Partition map entry signature "PM".
pub const ENTRY_SIGNATURE: u16 = 0x504D;

/// Cap on map entries; real maps hold a handful.
const MAX_ENTRIES: u32 = 64;

/// One Apple Partition Map entry.
#[derive(Debug, Clone)]
pub struct ApmEntry {
    /// Total number of entries in the map, repeated in every entry.
    pub map_entries: u32,
    /// First block of the partition, in 512-byte blocks.
    pub start_block: u32,
    pub block_count: u32,
    /// Partition name (up to 32 bytes).
    pub name: String,
    /// Partition type string, e.g. "Apple_HFS".
    pub kind: String,
}

fn string_field(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim().to_string()
}

impl ApmEntry {
    /// Decode one 512-byte map entry; `None` when the "PM" signature is
    /// absent.
    pub fn parse(buf: &[u8; 512]) -> Option<Self> {
        if BigEndian::read_u16(&buf[0..2]) != ENTRY_SIGNATURE {
            return None;
        }
        Some(ApmEntry {
            map_entries: BigEndian::read_u32(&buf[4..8]),
            start_block: BigEndian::read_u32(&buf[8..12]),
            block_count: BigEndian::read_u32(&buf[12..16]),
            name: string_field(&buf[16..48]),
            kind: string_field(&buf[48..80]),
        })
    }

    pub fn hint(&self) -> PartitionHint {
        match self.kind.as_str() {
            "Apple_HFS" | "Apple_HFSX" => PartitionHint::Hfs,
            "Apple_CoreStorage" => PartitionHint::CoreStorage,
            "Apple_UFS" => PartitionHint::FileSystem,
            "Apple_partition_map" | "Apple_Free" | "Apple_Boot" => PartitionHint::Ignore,
            kind if kind.starts_with("Apple_Driver") => PartitionHint::Ignore,
            _ => PartitionHint::Unknown,
        }
    }
}

/// Probe for an Apple Partition Map. Declines when block 1 is not a "PM"
/// entry.
pub fn probe<R: Read + Seek>(reader: &mut R) -> Result<Option<Vec<Partition>>> {
    // The DDM is advisory; damaged images often lack it.
    if let Some(block0) = read_sector(reader, 0)? {
        if BigEndian::read_u16(&block0[0..2]) != DDM_SIGNATURE {
            warn!("no driver descriptor map; probing the partition map anyway");
        }
    }

    let Some(block1) = read_sector(reader, 1)? else {
        return Ok(None);
    };
    let Some(first) = ApmEntry::parse(&block1) else {
        return Ok(None);
    };

    let count = first.map_entries.min(MAX_ENTRIES);
    let mut partitions = Vec::new();
    for index in 0..count {
        let entry = if index == 0 {
            first.clone()
        } else {
            let Some(block) = read_sector(reader, 1 + index as u64)? else {
                break;
            };
            match ApmEntry::parse(&block) {
                Some(entry) => entry,
                None => break,
            }
        };

        partitions.push(Partition {
            index: index as usize,
            offset: entry.start_block as u64 * SECTOR_SIZE,
            length: entry.block_count as u64 * SECTOR_SIZE,
            hint: entry.hint(),
            name: if entry.name.is_empty() {
                entry.kind.clone()
            } else {
                entry.name.clone()
            },
        });
    }
    Ok(Some(partitions))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_entry(image: &mut [u8], block: usize, entry: &ApmEntry) {
        let at = block * 512;
        BigEndian::write_u16(&mut image[at..], ENTRY_SIGNATURE);
        BigEndian::write_u32(&mut image[at + 4..], entry.map_entries);
        BigEndian::write_u32(&mut image[at + 8..], entry.start_block);
        BigEndian::write_u32(&mut image[at + 12..], entry.block_count);
        image[at + 16..at + 16 + entry.name.len()].copy_from_slice(entry.name.as_bytes());
        image[at + 48..at + 48 + entry.kind.len()].copy_from_slice(entry.kind.as_bytes());
    }

    pub(crate) fn apm_image() -> Vec<u8> {
        let mut image = vec![0u8; 16 * 512];
        BigEndian::write_u16(&mut image[0..], DDM_SIGNATURE);
        BigEndian::write_u16(&mut image[2..], 512);

        write_entry(
            &mut image,
            1,
            &ApmEntry {
                map_entries: 2,
                start_block: 1,
                block_count: 2,
                name: "Apple".into(),
                kind: "Apple_partition_map".into(),
            },
        );
        write_entry(
            &mut image,
            2,
            &ApmEntry {
                map_entries: 2,
                start_block: 8,
                block_count: 8,
                name: "MacOS".into(),
                kind: "Apple_HFS".into(),
            },
        );
        image
    }

    #[test]
    fn test_probe_apm() {
        let partitions = probe(&mut Cursor::new(apm_image())).unwrap().unwrap();
        assert_eq!(partitions.len(), 2);

        assert_eq!(partitions[0].hint, PartitionHint::Ignore);
        let hfs = &partitions[1];
        assert_eq!(hfs.hint, PartitionHint::Hfs);
        assert_eq!(hfs.offset, 8 * 512);
        assert_eq!(hfs.length, 8 * 512);
        assert_eq!(hfs.name, "MacOS");
    }

    #[test]
    fn test_probe_without_ddm() {
        let mut image = apm_image();
        image[0] = 0;
        image[1] = 0;
        let partitions = probe(&mut Cursor::new(image)).unwrap().unwrap();
        assert_eq!(partitions.len(), 2);
    }

    #[test]
    fn test_probe_declines_without_entries() {
        let image = vec![0u8; 4096];
        assert!(probe(&mut Cursor::new(image)).unwrap().is_none());
    }

    #[test]
    fn test_hint_mapping() {
        let entry = |kind: &str| ApmEntry {
            map_entries: 1,
            start_block: 0,
            block_count: 0,
            name: String::new(),
            kind: kind.into(),
        };
        assert_eq!(entry("Apple_HFSX").hint(), PartitionHint::Hfs);
        assert_eq!(entry("Apple_CoreStorage").hint(), PartitionHint::CoreStorage);
        assert_eq!(entry("Apple_Driver43").hint(), PartitionHint::Ignore);
        assert_eq!(entry("Mystery").hint(), PartitionHint::Unknown);
    }
}
