//! Catalog file records: folders, files, and threads.
//!
//! Catalog leaf records are keyed by `(parentID, nodeName)` and carry one
//! of four payloads distinguished by a leading 16-bit record type. Name
//! characters are stored big-endian on disk and swapped to host order at
//! decode time; all comparisons operate on host-native values.

use std::cmp::Ordering;
use std::io::{Cursor, Read, Seek};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::btree::Cursor as TreeCursor;
use crate::error::{HfsError, Result};
use crate::unicode;
use crate::volume::{ForkData, Volume};

/// Well-known Catalog Node IDs
pub const CNID_ROOT_PARENT: u32 = 1;
pub const CNID_ROOT_FOLDER: u32 = 2;
pub const CNID_EXTENTS_FILE: u32 = 3;
pub const CNID_CATALOG_FILE: u32 = 4;
pub const CNID_BAD_BLOCKS_FILE: u32 = 5;
pub const CNID_ALLOCATION_FILE: u32 = 6;
pub const CNID_STARTUP_FILE: u32 = 7;
pub const CNID_ATTRIBUTES_FILE: u32 = 8;

/// Catalog record types
pub const RECORD_TYPE_FOLDER: u16 = 0x0001;
pub const RECORD_TYPE_FILE: u16 = 0x0002;
pub const RECORD_TYPE_FOLDER_THREAD: u16 = 0x0003;
pub const RECORD_TYPE_FILE_THREAD: u16 = 0x0004;

const MODE_FORMAT_MASK: u16 = 0o170000;
const MODE_SYMLINK: u16 = 0o120000;

/// BSD-style ownership and permissions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BsdInfo {
    pub owner_id: u32,
    pub group_id: u32,
    pub admin_flags: u8,
    pub owner_flags: u8,
    pub file_mode: u16,
    pub special: u32,
}

impl BsdInfo {
    fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(BsdInfo {
            owner_id: reader.read_u32::<BigEndian>()?,
            group_id: reader.read_u32::<BigEndian>()?,
            admin_flags: reader.read_u8()?,
            owner_flags: reader.read_u8()?,
            file_mode: reader.read_u16::<BigEndian>()?,
            special: reader.read_u32::<BigEndian>()?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u32::<BigEndian>(self.owner_id).unwrap();
        out.write_u32::<BigEndian>(self.group_id).unwrap();
        out.write_u8(self.admin_flags).unwrap();
        out.write_u8(self.owner_flags).unwrap();
        out.write_u16::<BigEndian>(self.file_mode).unwrap();
        out.write_u32::<BigEndian>(self.special).unwrap();
    }

    /// Whether the file mode marks a symlink.
    pub fn is_symlink(&self) -> bool {
        self.file_mode & MODE_FORMAT_MASK == MODE_SYMLINK
    }
}

/// Catalog key: `(parentID, nodeName)`. Names are host-native UTF-16
/// units after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogKey {
    pub parent_id: u32,
    pub node_name: Vec<u16>,
}

impl CatalogKey {
    /// Decode from key bytes including the 16-bit length prefix.
    pub fn parse(key: &[u8]) -> Result<Self> {
        if key.len() < 8 {
            return Err(HfsError::Malformed("catalog key too short".into()));
        }
        let parent_id = u32::from_be_bytes([key[2], key[3], key[4], key[5]]);
        let name_len = u16::from_be_bytes([key[6], key[7]]) as usize;
        let name_end = 8 + name_len * 2;
        if name_end > key.len() {
            return Err(HfsError::Malformed(format!(
                "catalog key name of {name_len} units exceeds the key"
            )));
        }
        Ok(CatalogKey {
            parent_id,
            node_name: unicode::decode_be_units(&key[8..name_end]),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let key_length = 6 + self.node_name.len() as u16 * 2;
        out.write_u16::<BigEndian>(key_length).unwrap();
        out.write_u32::<BigEndian>(self.parent_id).unwrap();
        out.write_u16::<BigEndian>(self.node_name.len() as u16).unwrap();
        for unit in &self.node_name {
            out.write_u16::<BigEndian>(*unit).unwrap();
        }
    }

    pub fn name(&self) -> String {
        unicode::units_to_string(&self.node_name)
    }
}

/// Catalog folder record
#[derive(Debug, Clone, Default)]
pub struct CatalogFolder {
    pub flags: u16,
    pub valence: u32,
    pub folder_id: u32,
    pub create_date: u32,
    pub content_mod_date: u32,
    pub attribute_mod_date: u32,
    pub access_date: u32,
    pub backup_date: u32,
    pub bsd_info: BsdInfo,
    /// Finder folder + extended info; opaque, never swapped.
    pub finder_info: [u8; 32],
    pub text_encoding: u32,
    pub folder_count: u32,
}

impl CatalogFolder {
    fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let flags = cursor.read_u16::<BigEndian>()?;
        let valence = cursor.read_u32::<BigEndian>()?;
        let folder_id = cursor.read_u32::<BigEndian>()?;
        let create_date = cursor.read_u32::<BigEndian>()?;
        let content_mod_date = cursor.read_u32::<BigEndian>()?;
        let attribute_mod_date = cursor.read_u32::<BigEndian>()?;
        let access_date = cursor.read_u32::<BigEndian>()?;
        let backup_date = cursor.read_u32::<BigEndian>()?;
        let bsd_info = BsdInfo::parse(cursor)?;
        let mut finder_info = [0u8; 32];
        cursor.read_exact(&mut finder_info)?;
        Ok(CatalogFolder {
            flags,
            valence,
            folder_id,
            create_date,
            content_mod_date,
            attribute_mod_date,
            access_date,
            backup_date,
            bsd_info,
            finder_info,
            text_encoding: cursor.read_u32::<BigEndian>()?,
            folder_count: cursor.read_u32::<BigEndian>()?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(self.flags).unwrap();
        out.write_u32::<BigEndian>(self.valence).unwrap();
        out.write_u32::<BigEndian>(self.folder_id).unwrap();
        out.write_u32::<BigEndian>(self.create_date).unwrap();
        out.write_u32::<BigEndian>(self.content_mod_date).unwrap();
        out.write_u32::<BigEndian>(self.attribute_mod_date).unwrap();
        out.write_u32::<BigEndian>(self.access_date).unwrap();
        out.write_u32::<BigEndian>(self.backup_date).unwrap();
        self.bsd_info.write_to(out);
        out.extend_from_slice(&self.finder_info);
        out.write_u32::<BigEndian>(self.text_encoding).unwrap();
        out.write_u32::<BigEndian>(self.folder_count).unwrap();
    }
}

/// Catalog file record
#[derive(Debug, Clone, Default)]
pub struct CatalogFile {
    pub flags: u16,
    pub reserved1: u32,
    pub file_id: u32,
    pub create_date: u32,
    pub content_mod_date: u32,
    pub attribute_mod_date: u32,
    pub access_date: u32,
    pub backup_date: u32,
    pub bsd_info: BsdInfo,
    /// Finder file + extended info; opaque, never swapped.
    pub finder_info: [u8; 32],
    pub text_encoding: u32,
    pub reserved2: u32,
    pub data_fork: ForkData,
    pub resource_fork: ForkData,
}

impl CatalogFile {
    fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let flags = cursor.read_u16::<BigEndian>()?;
        let reserved1 = cursor.read_u32::<BigEndian>()?;
        let file_id = cursor.read_u32::<BigEndian>()?;
        let create_date = cursor.read_u32::<BigEndian>()?;
        let content_mod_date = cursor.read_u32::<BigEndian>()?;
        let attribute_mod_date = cursor.read_u32::<BigEndian>()?;
        let access_date = cursor.read_u32::<BigEndian>()?;
        let backup_date = cursor.read_u32::<BigEndian>()?;
        let bsd_info = BsdInfo::parse(cursor)?;
        let mut finder_info = [0u8; 32];
        cursor.read_exact(&mut finder_info)?;
        Ok(CatalogFile {
            flags,
            reserved1,
            file_id,
            create_date,
            content_mod_date,
            attribute_mod_date,
            access_date,
            backup_date,
            bsd_info,
            finder_info,
            text_encoding: cursor.read_u32::<BigEndian>()?,
            reserved2: cursor.read_u32::<BigEndian>()?,
            data_fork: ForkData::parse(cursor)?,
            resource_fork: ForkData::parse(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(self.flags).unwrap();
        out.write_u32::<BigEndian>(self.reserved1).unwrap();
        out.write_u32::<BigEndian>(self.file_id).unwrap();
        out.write_u32::<BigEndian>(self.create_date).unwrap();
        out.write_u32::<BigEndian>(self.content_mod_date).unwrap();
        out.write_u32::<BigEndian>(self.attribute_mod_date).unwrap();
        out.write_u32::<BigEndian>(self.access_date).unwrap();
        out.write_u32::<BigEndian>(self.backup_date).unwrap();
        self.bsd_info.write_to(out);
        out.extend_from_slice(&self.finder_info);
        out.write_u32::<BigEndian>(self.text_encoding).unwrap();
        out.write_u32::<BigEndian>(self.reserved2).unwrap();
        self.data_fork.write_to(out);
        self.resource_fork.write_to(out);
    }
}

/// Catalog thread record: maps a CNID back to its parent and name.
#[derive(Debug, Clone, Default)]
pub struct CatalogThread {
    pub reserved: i16,
    pub parent_id: u32,
    pub node_name: Vec<u16>,
}

impl CatalogThread {
    fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let reserved = cursor.read_i16::<BigEndian>()?;
        let parent_id = cursor.read_u32::<BigEndian>()?;
        let name_len = cursor.read_u16::<BigEndian>()? as usize;
        let mut raw = vec![0u8; name_len * 2];
        cursor.read_exact(&mut raw)?;
        Ok(CatalogThread {
            reserved,
            parent_id,
            node_name: unicode::decode_be_units(&raw),
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.write_i16::<BigEndian>(self.reserved).unwrap();
        out.write_u32::<BigEndian>(self.parent_id).unwrap();
        out.write_u16::<BigEndian>(self.node_name.len() as u16).unwrap();
        for unit in &self.node_name {
            out.write_u16::<BigEndian>(*unit).unwrap();
        }
    }

    pub fn name(&self) -> String {
        unicode::units_to_string(&self.node_name)
    }
}

/// A decoded catalog leaf payload.
#[derive(Debug, Clone)]
pub enum CatalogRecord {
    Folder(CatalogFolder),
    File(CatalogFile),
    FolderThread(CatalogThread),
    FileThread(CatalogThread),
}

impl CatalogRecord {
    /// Decode a catalog leaf payload, dispatching on the record type.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(HfsError::Malformed("catalog record too short".into()));
        }
        let record_type = u16::from_be_bytes([payload[0], payload[1]]);
        let mut cursor = Cursor::new(payload);
        cursor.set_position(2);

        match record_type {
            RECORD_TYPE_FOLDER => Ok(CatalogRecord::Folder(CatalogFolder::parse(&mut cursor)?)),
            RECORD_TYPE_FILE => Ok(CatalogRecord::File(CatalogFile::parse(&mut cursor)?)),
            RECORD_TYPE_FOLDER_THREAD => {
                Ok(CatalogRecord::FolderThread(CatalogThread::parse(&mut cursor)?))
            }
            RECORD_TYPE_FILE_THREAD => {
                Ok(CatalogRecord::FileThread(CatalogThread::parse(&mut cursor)?))
            }
            other => Err(HfsError::Malformed(format!(
                "unknown catalog record type 0x{other:04X}"
            ))),
        }
    }

    pub fn record_type(&self) -> u16 {
        match self {
            CatalogRecord::Folder(_) => RECORD_TYPE_FOLDER,
            CatalogRecord::File(_) => RECORD_TYPE_FILE,
            CatalogRecord::FolderThread(_) => RECORD_TYPE_FOLDER_THREAD,
            CatalogRecord::FileThread(_) => RECORD_TYPE_FILE_THREAD,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(self.record_type()).unwrap();
        match self {
            CatalogRecord::Folder(folder) => folder.write_body(out),
            CatalogRecord::File(file) => file.write_body(out),
            CatalogRecord::FolderThread(thread) | CatalogRecord::FileThread(thread) => {
                thread.write_body(out)
            }
        }
    }
}

/// Encode a string as catalog name units.
pub fn name_to_units(name: &str) -> Vec<u16> {
    unicode::string_to_units(name)
}

/// Comparator positioning a catalog search at `(parent_id, name)`.
/// Binary name ordering on HFSX, case-insensitive folding on HFS+.
pub fn key_comparator(
    parent_id: u32,
    name: &[u16],
    case_sensitive: bool,
) -> impl Fn(&[u8]) -> Ordering + '_ {
    move |key: &[u8]| {
        let Ok(key) = CatalogKey::parse(key) else {
            return Ordering::Less;
        };
        key.parent_id.cmp(&parent_id).then_with(|| {
            if case_sensitive {
                unicode::compare_binary(&key.node_name, name)
            } else {
                unicode::compare_folded(&key.node_name, name)
            }
        })
    }
}

/// Look up one catalog record by `(parent_id, name)`.
pub fn lookup<R: Read + Seek>(
    vol: &Volume<R>,
    parent_id: u32,
    name: &str,
) -> Result<Option<(CatalogKey, CatalogRecord)>> {
    let units = name_to_units(name);
    let cmp = key_comparator(parent_id, &units, vol.case_sensitive());
    match vol.catalog().search_with(&cmp)? {
        Some(hit) if hit.found => {
            let (key, payload) = hit.node.record_parts(hit.record_index)?;
            Ok(Some((CatalogKey::parse(key)?, CatalogRecord::parse(payload)?)))
        }
        _ => Ok(None),
    }
}

/// Collect every catalog record keyed under `parent_id`, thread records
/// included, in key order.
pub fn children<R: Read + Seek>(
    vol: &Volume<R>,
    parent_id: u32,
) -> Result<Vec<(CatalogKey, CatalogRecord)>> {
    let empty: Vec<u16> = Vec::new();
    let cmp = key_comparator(parent_id, &empty, vol.case_sensitive());

    let mut cursor: TreeCursor<'_, R> = vol.catalog().cursor();
    cursor.seek_with(&cmp)?;

    let mut records = Vec::new();
    while let Some((key, payload)) = cursor.current()? {
        let key = CatalogKey::parse(key)?;
        if key.parent_id > parent_id {
            break;
        }
        if key.parent_id == parent_id {
            records.push((key, CatalogRecord::parse(payload)?));
        }
        if !cursor.next()? {
            break;
        }
    }
    Ok(records)
}

/// The root folder record and its name.
pub fn root_folder<R: Read + Seek>(vol: &Volume<R>) -> Result<(CatalogRecord, String)> {
    for (key, record) in children(vol, CNID_ROOT_PARENT)? {
        if matches!(record, CatalogRecord::Folder(_)) {
            return Ok((record, key.name()));
        }
    }
    Err(HfsError::FileNotFound("/".into()))
}

/// Resolve a slash-separated path to its catalog record. Returns the
/// record and the final component's name.
pub fn resolve_path<R: Read + Seek>(
    vol: &Volume<R>,
    path: &str,
) -> Result<(CatalogRecord, String)> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return root_folder(vol);
    }

    let components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
    let mut parent = CNID_ROOT_FOLDER;

    for (i, component) in components.iter().enumerate() {
        let last = i == components.len() - 1;
        match lookup(vol, parent, component)? {
            Some((_, record)) => {
                if last {
                    return Ok((record, component.to_string()));
                }
                match record {
                    CatalogRecord::Folder(folder) => parent = folder.folder_id,
                    CatalogRecord::File(_) => {
                        return Err(HfsError::NotADirectory(components[..=i].join("/")))
                    }
                    _ => {
                        return Err(HfsError::Malformed(
                            "thread record keyed like a directory entry".into(),
                        ))
                    }
                }
            }
            None => return Err(HfsError::FileNotFound(components[..=i].join("/"))),
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testvol;
    use crate::volume::Volume;

    fn sample_file() -> CatalogFile {
        CatalogFile {
            flags: 0x0002,
            file_id: 16,
            create_date: 3_600_000_000,
            content_mod_date: 3_600_000_100,
            attribute_mod_date: 3_600_000_100,
            access_date: 3_600_000_200,
            backup_date: 0,
            bsd_info: BsdInfo {
                owner_id: 501,
                group_id: 20,
                file_mode: 0o100644,
                ..Default::default()
            },
            text_encoding: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_file_record_round_trip() {
        let record = CatalogRecord::File(sample_file());
        let mut encoded = Vec::new();
        record.write_to(&mut encoded);
        assert_eq!(encoded.len(), 248);

        let parsed = CatalogRecord::parse(&encoded).unwrap();
        let CatalogRecord::File(file) = parsed else {
            panic!("expected a file record");
        };
        assert_eq!(file.file_id, 16);
        assert_eq!(file.bsd_info.owner_id, 501);

        let mut again = Vec::new();
        CatalogRecord::File(file).write_to(&mut again);
        assert_eq!(again, encoded);
    }

    #[test]
    fn test_folder_and_thread_round_trip() {
        let record = CatalogRecord::Folder(CatalogFolder {
            valence: 3,
            folder_id: 17,
            folder_count: 1,
            ..Default::default()
        });
        let mut encoded = Vec::new();
        record.write_to(&mut encoded);
        assert_eq!(encoded.len(), 88);
        let mut again = Vec::new();
        CatalogRecord::parse(&encoded).unwrap().write_to(&mut again);
        assert_eq!(again, encoded);

        let record = CatalogRecord::FolderThread(CatalogThread {
            reserved: 0,
            parent_id: 2,
            node_name: name_to_units("beta"),
        });
        let mut encoded = Vec::new();
        record.write_to(&mut encoded);
        let parsed = CatalogRecord::parse(&encoded).unwrap();
        let CatalogRecord::FolderThread(thread) = parsed else {
            panic!("expected a folder thread");
        };
        assert_eq!(thread.parent_id, 2);
        assert_eq!(thread.name(), "beta");
    }

    #[test]
    fn test_unknown_record_type_is_malformed() {
        let err = CatalogRecord::parse(&[0x00, 0x09, 0, 0]).unwrap_err();
        assert!(matches!(err, HfsError::Malformed(_)));
    }

    #[test]
    fn test_catalog_key_round_trip() {
        let key = CatalogKey {
            parent_id: 2,
            node_name: name_to_units("alpha.txt"),
        };
        let mut encoded = Vec::new();
        key.write_to(&mut encoded);
        // keyLength covers parentID + name length + name.
        assert_eq!(
            u16::from_be_bytes([encoded[0], encoded[1]]),
            6 + 2 * 9
        );
        assert_eq!(CatalogKey::parse(&encoded).unwrap(), key);
    }

    #[test]
    fn test_lookup_file() {
        let vol = Volume::attach(testvol::source(testvol::small_volume())).unwrap();

        let (key, record) = lookup(&vol, 2, "alpha.txt").unwrap().unwrap();
        assert_eq!(key.name(), "alpha.txt");
        let CatalogRecord::File(file) = record else {
            panic!("expected a file record");
        };
        assert_eq!(file.file_id, 16);
        assert_eq!(file.data_fork.logical_size, testvol::ALPHA_CONTENT.len() as u64);

        // Case-insensitive match on HFS+.
        assert!(lookup(&vol, 2, "ALPHA.TXT").unwrap().is_some());
        assert!(lookup(&vol, 2, "missing").unwrap().is_none());
    }

    #[test]
    fn test_children_of_root() {
        let vol = Volume::attach(testvol::source(testvol::small_volume())).unwrap();
        let records = children(&vol, 2).unwrap();

        let names: Vec<String> = records.iter().map(|(k, _)| k.name()).collect();
        assert_eq!(names, vec!["", "alpha.txt", "beta", "gamma.txt"]);
        assert!(matches!(records[0].1, CatalogRecord::FolderThread(_)));
    }

    #[test]
    fn test_resolve_path() {
        let vol = Volume::attach(testvol::source(testvol::small_volume())).unwrap();

        let (record, name) = resolve_path(&vol, "/beta/nested.txt").unwrap();
        assert_eq!(name, "nested.txt");
        assert!(matches!(record, CatalogRecord::File(_)));

        let (record, _) = resolve_path(&vol, "/").unwrap();
        assert!(matches!(record, CatalogRecord::Folder(_)));

        assert!(matches!(
            resolve_path(&vol, "/beta/missing").unwrap_err(),
            HfsError::FileNotFound(_)
        ));
        assert!(matches!(
            resolve_path(&vol, "/alpha.txt/beyond").unwrap_err(),
            HfsError::NotADirectory(_)
        ));
    }
}
