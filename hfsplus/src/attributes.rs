//! Extended-attribute records from the attributes B-tree.
//!
//! Keys are `(fileID, attrName, startBlock)`; attribute names compare
//! binarily regardless of the catalog's case rules. The B-tree layer
//! hands payloads over opaquely; they are classified here.

use std::cmp::Ordering;
use std::io::{Cursor, Read, Seek};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{HfsError, Result};
use crate::unicode;
use crate::volume::{ExtentDescriptor, ForkData, Volume};

/// Attribute record types.
pub const ATTR_RECORD_INLINE: u32 = 0x10;
pub const ATTR_RECORD_FORK: u32 = 0x20;
pub const ATTR_RECORD_EXTENTS: u32 = 0x30;

/// Key of an attributes-tree record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeKey {
    pub file_id: u32,
    pub start_block: u32,
    pub name: Vec<u16>,
}

impl AttributeKey {
    /// Decode from key bytes including the 16-bit length prefix.
    pub fn parse(key: &[u8]) -> Result<Self> {
        if key.len() < 14 {
            return Err(HfsError::Malformed("attribute key too short".into()));
        }
        let file_id = u32::from_be_bytes([key[4], key[5], key[6], key[7]]);
        let start_block = u32::from_be_bytes([key[8], key[9], key[10], key[11]]);
        let name_len = u16::from_be_bytes([key[12], key[13]]) as usize;
        let name_end = 14 + name_len * 2;
        if name_end > key.len() {
            return Err(HfsError::Malformed(format!(
                "attribute name of {name_len} units exceeds the key"
            )));
        }
        Ok(AttributeKey {
            file_id,
            start_block,
            name: unicode::decode_be_units(&key[14..name_end]),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let key_length = 12 + self.name.len() as u16 * 2;
        out.write_u16::<BigEndian>(key_length).unwrap();
        out.write_u16::<BigEndian>(0).unwrap(); // pad
        out.write_u32::<BigEndian>(self.file_id).unwrap();
        out.write_u32::<BigEndian>(self.start_block).unwrap();
        out.write_u16::<BigEndian>(self.name.len() as u16).unwrap();
        for unit in &self.name {
            out.write_u16::<BigEndian>(*unit).unwrap();
        }
    }

    pub fn name(&self) -> String {
        unicode::units_to_string(&self.name)
    }
}

/// A classified attribute payload.
#[derive(Debug, Clone)]
pub enum AttributeRecord {
    /// Attribute data stored inline in the record.
    Inline(Vec<u8>),
    /// Attribute data stored in its own fork.
    Fork(ForkData),
    /// Overflow extents of a fork-based attribute.
    Extents([ExtentDescriptor; 8]),
}

impl AttributeRecord {
    /// Classify an attributes leaf payload by its 32-bit record type.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(HfsError::Malformed("attribute record too short".into()));
        }
        let record_type = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let mut cursor = Cursor::new(payload);
        cursor.set_position(4);

        match record_type {
            ATTR_RECORD_INLINE => {
                let _reserved = [cursor.read_u32::<BigEndian>()?, cursor.read_u32::<BigEndian>()?];
                let size = cursor.read_u32::<BigEndian>()? as usize;
                let at = cursor.position() as usize;
                if at + size > payload.len() {
                    return Err(HfsError::Malformed(
                        "inline attribute data exceeds the record".into(),
                    ));
                }
                Ok(AttributeRecord::Inline(payload[at..at + size].to_vec()))
            }
            ATTR_RECORD_FORK => {
                let _reserved = cursor.read_u32::<BigEndian>()?;
                Ok(AttributeRecord::Fork(ForkData::parse(&mut cursor)?))
            }
            ATTR_RECORD_EXTENTS => {
                let _reserved = cursor.read_u32::<BigEndian>()?;
                let mut extents = [ExtentDescriptor::default(); 8];
                for extent in &mut extents {
                    *extent = ExtentDescriptor::parse(&mut cursor)?;
                }
                Ok(AttributeRecord::Extents(extents))
            }
            other => Err(HfsError::Malformed(format!(
                "unknown attribute record type 0x{other:08X}"
            ))),
        }
    }
}

/// Comparator positioning an attributes search at `(file_id, name,
/// start_block)`. Names compare binarily.
pub fn key_comparator(
    file_id: u32,
    name: &[u16],
    start_block: u32,
) -> impl Fn(&[u8]) -> Ordering + '_ {
    move |key: &[u8]| {
        let Ok(key) = AttributeKey::parse(key) else {
            return Ordering::Less;
        };
        key.file_id
            .cmp(&file_id)
            .then_with(|| unicode::compare_binary(&key.name, name))
            .then(key.start_block.cmp(&start_block))
    }
}

/// List the attribute names attached to a CNID. Returns an empty list on
/// volumes without an attributes file.
pub fn list_attributes<R: Read + Seek>(vol: &Volume<R>, cnid: u32) -> Result<Vec<String>> {
    let Some(tree) = vol.attributes()? else {
        return Ok(Vec::new());
    };

    let empty: Vec<u16> = Vec::new();
    let cmp = key_comparator(cnid, &empty, 0);
    let mut cursor = tree.cursor();
    cursor.seek_with(&cmp)?;

    let mut names = Vec::new();
    while let Some((key, _)) = cursor.current()? {
        let key = AttributeKey::parse(key)?;
        if key.file_id > cnid {
            break;
        }
        // Overflow-extent records repeat the name with a non-zero start.
        if key.file_id == cnid && key.start_block == 0 {
            names.push(key.name());
        }
        if !cursor.next()? {
            break;
        }
    }
    Ok(names)
}
