//! Core Storage detection.
//!
//! Only the detection surface: the physical-volume header at block 0
//! carries a "CS" signature word at offset 88 and a little-endian volume
//! size. The logical-volume metadata beyond that is not decoded; the
//! prober reports the physical volume as a single region.

use std::io::{Read, Seek};

use byteorder::{ByteOrder, LittleEndian};

use crate::{read_sector, Partition, PartitionHint, Result};

/// "CS" signature bytes at offset 88 of the physical-volume header.
pub const CS_SIGNATURE: [u8; 2] = *b"CS";

const SIGNATURE_OFFSET: usize = 88;
const VOLUME_SIZE_OFFSET: usize = 16;

/// Probe for a Core Storage physical volume.
pub fn probe<R: Read + Seek>(reader: &mut R) -> Result<Option<Vec<Partition>>> {
    let Some(sector) = read_sector(reader, 0)? else {
        return Ok(None);
    };
    if sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] != CS_SIGNATURE {
        return Ok(None);
    }

    let size = LittleEndian::read_u64(&sector[VOLUME_SIZE_OFFSET..VOLUME_SIZE_OFFSET + 8]);
    Ok(Some(vec![Partition {
        index: 0,
        offset: 0,
        length: size,
        hint: PartitionHint::CoreStorage,
        name: "Core Storage physical volume".to_string(),
    }]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cs_image(size: u64) -> Vec<u8> {
        let mut image = vec![0u8; 4096];
        LittleEndian::write_u64(&mut image[VOLUME_SIZE_OFFSET..], size);
        image[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2].copy_from_slice(&CS_SIGNATURE);
        image
    }

    #[test]
    fn test_probe_core_storage() {
        let partitions = probe(&mut Cursor::new(cs_image(1 << 30))).unwrap().unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].hint, PartitionHint::CoreStorage);
        assert_eq!(partitions[0].length, 1 << 30);
    }

    #[test]
    fn test_probe_declines_without_signature() {
        assert!(probe(&mut Cursor::new(vec![0u8; 4096])).unwrap().is_none());
    }
}
