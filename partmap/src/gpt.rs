//! GUID Partition Table parsing.
//!
//! The header lives at LBA 1 behind a protective MBR; entry fields are
//! little-endian, and GUIDs render with their first three groups
//! byte-swapped per RFC 4122's mixed layout.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use crate::{read_sector, PartMapError, Partition, PartitionHint, Result, SECTOR_SIZE};

/// "EFI PART" at the start of LBA 1.
pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

/// Apple HFS+ partition type: 48465300-0000-11AA-AA11-00306543ECAC.
pub const HFS_TYPE_GUID: [u8; 16] = [
    0x00, 0x53, 0x46, 0x48, 0x00, 0x00, 0xAA, 0x11, 0xAA, 0x11, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC,
];

/// Apple Core Storage: 53746F72-6167-11AA-AA11-00306543ECAC.
pub const CORE_STORAGE_TYPE_GUID: [u8; 16] = [
    0x72, 0x6F, 0x74, 0x53, 0x67, 0x61, 0xAA, 0x11, 0xAA, 0x11, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC,
];

/// Apple APFS: 7C3457EF-0000-11AA-AA11-00306543ECAC.
pub const APFS_TYPE_GUID: [u8; 16] = [
    0xEF, 0x57, 0x34, 0x7C, 0x00, 0x00, 0xAA, 0x11, 0xAA, 0x11, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC,
];

/// Apple boot: 426F6F74-0000-11AA-AA11-00306543ECAC.
pub const APPLE_BOOT_TYPE_GUID: [u8; 16] = [
    0x74, 0x6F, 0x6F, 0x42, 0x00, 0x00, 0xAA, 0x11, 0xAA, 0x11, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC,
];

/// EFI system partition: C12A7328-F81F-11D2-BA4B-00A0C93EC93B.
pub const EFI_SYSTEM_TYPE_GUID: [u8; 16] = [
    0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B,
];

static TYPE_GUIDS: &[([u8; 16], &str, PartitionHint)] = &[
    (HFS_TYPE_GUID, "Apple HFS/HFS+", PartitionHint::Hfs),
    (CORE_STORAGE_TYPE_GUID, "Apple Core Storage", PartitionHint::CoreStorage),
    (APFS_TYPE_GUID, "Apple APFS", PartitionHint::FileSystem),
    (APPLE_BOOT_TYPE_GUID, "Apple boot", PartitionHint::Ignore),
    (EFI_SYSTEM_TYPE_GUID, "EFI system", PartitionHint::Ignore),
];

/// The GPT header fields needed to walk the entry array.
#[derive(Debug, Clone)]
pub struct GptHeader {
    pub revision: u32,
    pub header_size: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8; 16],
    pub entries_lba: u64,
    pub entry_count: u32,
    pub entry_size: u32,
}

impl GptHeader {
    /// Decode from the 92-byte header at LBA 1. The signature must
    /// already have been checked.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 92 {
            return Err(PartMapError::Malformed("GPT header too short".into()));
        }
        let mut disk_guid = [0u8; 16];
        disk_guid.copy_from_slice(&buf[56..72]);
        Ok(GptHeader {
            revision: LittleEndian::read_u32(&buf[8..12]),
            header_size: LittleEndian::read_u32(&buf[12..16]),
            current_lba: LittleEndian::read_u64(&buf[24..32]),
            backup_lba: LittleEndian::read_u64(&buf[32..40]),
            first_usable_lba: LittleEndian::read_u64(&buf[40..48]),
            last_usable_lba: LittleEndian::read_u64(&buf[48..56]),
            disk_guid,
            entries_lba: LittleEndian::read_u64(&buf[72..80]),
            entry_count: LittleEndian::read_u32(&buf[80..84]),
            entry_size: LittleEndian::read_u32(&buf[84..88]),
        })
    }
}

/// Render a GUID the way partition tools print it: the first three
/// groups are stored little-endian, the last two big-endian.
pub fn format_guid(bytes: &[u8; 16]) -> String {
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        LittleEndian::read_u32(&bytes[0..4]),
        LittleEndian::read_u16(&bytes[4..6]),
        LittleEndian::read_u16(&bytes[6..8]),
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15],
    )
}

fn decode_entry_name(buf: &[u8]) -> String {
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Probe for a GPT. Declines when LBA 1 lacks the "EFI PART" signature.
pub fn probe<R: Read + Seek>(reader: &mut R) -> Result<Option<Vec<Partition>>> {
    let Some(sector) = read_sector(reader, 1)? else {
        return Ok(None);
    };
    if &sector[..8] != GPT_SIGNATURE {
        return Ok(None);
    }

    let header = GptHeader::parse(&sector)?;
    if header.entry_size < 128 || header.entry_size > 4096 {
        return Err(PartMapError::Malformed(format!(
            "implausible GPT entry size {}",
            header.entry_size
        )));
    }
    if header.entry_count > 1024 {
        return Err(PartMapError::Malformed(format!(
            "implausible GPT entry count {}",
            header.entry_count
        )));
    }

    let mut table = vec![0u8; header.entry_count as usize * header.entry_size as usize];
    reader.seek(SeekFrom::Start(header.entries_lba * SECTOR_SIZE))?;
    reader.read_exact(&mut table)?;

    let mut partitions = Vec::new();
    for index in 0..header.entry_count as usize {
        let entry = &table[index * header.entry_size as usize..][..header.entry_size as usize];
        let mut type_guid = [0u8; 16];
        type_guid.copy_from_slice(&entry[..16]);
        if type_guid == [0u8; 16] {
            continue;
        }

        let first_lba = LittleEndian::read_u64(&entry[32..40]);
        let last_lba = LittleEndian::read_u64(&entry[40..48]);
        if last_lba < first_lba {
            return Err(PartMapError::Malformed(format!(
                "GPT entry {index} ends before it starts"
            )));
        }

        let (type_name, hint) = TYPE_GUIDS
            .iter()
            .find(|&&(guid, _, _)| guid == type_guid)
            .map(|&(_, name, hint)| (name.to_string(), hint))
            .unwrap_or_else(|| (format_guid(&type_guid), PartitionHint::Unknown));

        let label = decode_entry_name(&entry[56..128]);
        partitions.push(Partition {
            index,
            offset: first_lba * SECTOR_SIZE,
            length: (last_lba - first_lba + 1) * SECTOR_SIZE,
            hint,
            name: if label.is_empty() { type_name } else { label },
        });
    }
    Ok(Some(partitions))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mbr;
    use std::io::Cursor;

    /// A minimal disk: protective MBR, GPT header at LBA 1, two entries
    /// at LBA 2 (an HFS+ volume and an unnamed EFI system partition).
    pub(crate) fn gpt_image() -> Vec<u8> {
        let mut image = mbr::tests::mbr_image(&[mbr::PartitionEntry {
            kind: 0xEE,
            first_sector_lba: 1,
            sector_count: 0xFFFF_FFFF,
            ..Default::default()
        }]);
        image.resize(64 * 512, 0);

        let header_at = 512;
        image[header_at..header_at + 8].copy_from_slice(GPT_SIGNATURE);
        LittleEndian::write_u32(&mut image[header_at + 8..], 0x0001_0000);
        LittleEndian::write_u32(&mut image[header_at + 12..], 92);
        LittleEndian::write_u64(&mut image[header_at + 24..], 1);
        LittleEndian::write_u64(&mut image[header_at + 32..], 63);
        LittleEndian::write_u64(&mut image[header_at + 40..], 6);
        LittleEndian::write_u64(&mut image[header_at + 48..], 58);
        LittleEndian::write_u64(&mut image[header_at + 72..], 2); // entries LBA
        LittleEndian::write_u32(&mut image[header_at + 80..], 2);
        LittleEndian::write_u32(&mut image[header_at + 84..], 128);

        let entry0 = 2 * 512;
        image[entry0..entry0 + 16].copy_from_slice(&HFS_TYPE_GUID);
        image[entry0 + 16] = 0xAB; // unique GUID, arbitrary
        LittleEndian::write_u64(&mut image[entry0 + 32..], 40);
        LittleEndian::write_u64(&mut image[entry0 + 40..], 2039);
        for (i, unit) in "Macintosh HD".encode_utf16().enumerate() {
            LittleEndian::write_u16(&mut image[entry0 + 56 + i * 2..], unit);
        }

        let entry1 = entry0 + 128;
        image[entry1..entry1 + 16].copy_from_slice(&EFI_SYSTEM_TYPE_GUID);
        LittleEndian::write_u64(&mut image[entry1 + 32..], 6);
        LittleEndian::write_u64(&mut image[entry1 + 40..], 39);

        image
    }

    #[test]
    fn test_probe_gpt() {
        let partitions = probe(&mut Cursor::new(gpt_image())).unwrap().unwrap();
        assert_eq!(partitions.len(), 2);

        let hfs = &partitions[0];
        assert_eq!(hfs.offset, 40 * 512);
        assert_eq!(hfs.length, 2000 * 512);
        assert_eq!(hfs.hint, PartitionHint::Hfs);
        assert_eq!(hfs.name, "Macintosh HD");

        let efi = &partitions[1];
        assert_eq!(efi.hint, PartitionHint::Ignore);
        assert_eq!(efi.name, "EFI system");
    }

    #[test]
    fn test_probe_declines_without_signature() {
        let image = mbr::tests::mbr_image(&[]);
        assert!(probe(&mut Cursor::new(image)).unwrap().is_none());
    }

    #[test]
    fn test_malformed_entry_size() {
        let mut image = gpt_image();
        LittleEndian::write_u32(&mut image[512 + 84..], 7);
        assert!(matches!(
            probe(&mut Cursor::new(image)).unwrap_err(),
            PartMapError::Malformed(_)
        ));
    }

    #[test]
    fn test_format_guid() {
        assert_eq!(
            format_guid(&HFS_TYPE_GUID),
            "48465300-0000-11AA-AA11-00306543ECAC"
        );
        assert_eq!(
            format_guid(&EFI_SYSTEM_TYPE_GUID),
            "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        );
    }
}
