//! Volume detection and the HFS+ volume header.
//!
//! All multi-byte integers on disk are big-endian. Each structure decodes
//! from its on-disk buffer into a host-native value and encodes back with
//! `write_to`; the two are exact inverses over the structure's extent.
//! Opaque byte arrays (Finder info) are carried untouched.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use std::io::{Cursor, Read, Seek};

use crate::btree::{BTree, TreeKind};
use crate::catalog::{
    CNID_ALLOCATION_FILE, CNID_ATTRIBUTES_FILE, CNID_BAD_BLOCKS_FILE, CNID_CATALOG_FILE,
    CNID_EXTENTS_FILE, CNID_STARTUP_FILE,
};
use crate::error::{HfsError, Result};
use crate::fork::{Fork, ForkKind};
use crate::source::Source;

/// HFS+ volume header offset from the start of the volume.
pub const VOLUME_HEADER_OFFSET: u64 = 1024;

/// HFS+ signature: "H+" (0x482B)
pub const HFS_PLUS_SIGNATURE: u16 = 0x482B;

/// HFSX signature: "HX" (0x4858) — case-sensitive variant
pub const HFSX_SIGNATURE: u16 = 0x4858;

/// HFS Standard signature: "BD" (0x4244) — bare or wrapping HFS+
pub const HFS_SIGNATURE: u16 = 0x4244;

/// Size of the candidate region examined during detection.
const DETECT_SPAN: usize = 2048;

/// Seconds between the HFS epoch (1904-01-01) and the Unix epoch.
const HFS_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Convert an HFS+ timestamp (seconds since 1904-01-01 UTC) to Unix seconds.
pub fn hfs_time_to_unix(t: u32) -> i64 {
    t as i64 - HFS_EPOCH_OFFSET
}

/// An extent descriptor: contiguous run of allocation blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtentDescriptor {
    pub start_block: u32,
    pub block_count: u32,
}

impl ExtentDescriptor {
    pub(crate) fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(ExtentDescriptor {
            start_block: reader.read_u32::<BigEndian>()?,
            block_count: reader.read_u32::<BigEndian>()?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u32::<BigEndian>(self.start_block).unwrap();
        out.write_u32::<BigEndian>(self.block_count).unwrap();
    }
}

/// Fork data: size and initial extents of a data, resource, or special fork
#[derive(Debug, Clone, Default)]
pub struct ForkData {
    pub logical_size: u64,
    pub clump_size: u32,
    pub total_blocks: u32,
    pub extents: [ExtentDescriptor; 8],
}

impl ForkData {
    pub(crate) fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let logical_size = reader.read_u64::<BigEndian>()?;
        let clump_size = reader.read_u32::<BigEndian>()?;
        let total_blocks = reader.read_u32::<BigEndian>()?;
        let mut extents = [ExtentDescriptor::default(); 8];
        for extent in &mut extents {
            *extent = ExtentDescriptor::parse(reader)?;
        }
        Ok(ForkData {
            logical_size,
            clump_size,
            total_blocks,
            extents,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u64::<BigEndian>(self.logical_size).unwrap();
        out.write_u32::<BigEndian>(self.clump_size).unwrap();
        out.write_u32::<BigEndian>(self.total_blocks).unwrap();
        for extent in &self.extents {
            extent.write_to(out);
        }
    }
}

/// The HFS+ Volume Header (512 bytes at offset 1024)
#[derive(Debug, Clone)]
pub struct VolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub last_mounted_version: u32,
    pub journal_info_block: u32,
    pub create_date: u32,
    pub modify_date: u32,
    pub backup_date: u32,
    pub checked_date: u32,
    pub file_count: u32,
    pub folder_count: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub next_allocation: u32,
    pub rsrc_clump_size: u32,
    pub data_clump_size: u32,
    pub next_catalog_id: u32,
    pub write_count: u32,
    pub encodings_bitmap: u64,
    /// Opaque Finder info; never byte-swapped.
    pub finder_info: [u8; 32],
    pub allocation_file: ForkData,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
    pub attributes_file: ForkData,
    pub startup_file: ForkData,
}

impl VolumeHeader {
    /// Decode a volume header from its 512-byte on-disk buffer.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 512 {
            return Err(HfsError::Malformed("volume header buffer too short".into()));
        }
        let mut cursor = Cursor::new(buf);

        let signature = cursor.read_u16::<BigEndian>()?;
        if signature != HFS_PLUS_SIGNATURE && signature != HFSX_SIGNATURE {
            return Err(HfsError::InvalidSignature(signature));
        }

        let version = cursor.read_u16::<BigEndian>()?;
        let attributes = cursor.read_u32::<BigEndian>()?;
        let last_mounted_version = cursor.read_u32::<BigEndian>()?;
        let journal_info_block = cursor.read_u32::<BigEndian>()?;
        let create_date = cursor.read_u32::<BigEndian>()?;
        let modify_date = cursor.read_u32::<BigEndian>()?;
        let backup_date = cursor.read_u32::<BigEndian>()?;
        let checked_date = cursor.read_u32::<BigEndian>()?;
        let file_count = cursor.read_u32::<BigEndian>()?;
        let folder_count = cursor.read_u32::<BigEndian>()?;
        let block_size = cursor.read_u32::<BigEndian>()?;
        let total_blocks = cursor.read_u32::<BigEndian>()?;
        let free_blocks = cursor.read_u32::<BigEndian>()?;
        let next_allocation = cursor.read_u32::<BigEndian>()?;
        let rsrc_clump_size = cursor.read_u32::<BigEndian>()?;
        let data_clump_size = cursor.read_u32::<BigEndian>()?;
        let next_catalog_id = cursor.read_u32::<BigEndian>()?;
        let write_count = cursor.read_u32::<BigEndian>()?;
        let encodings_bitmap = cursor.read_u64::<BigEndian>()?;

        let mut finder_info = [0u8; 32];
        cursor.read_exact(&mut finder_info)?;

        let allocation_file = ForkData::parse(&mut cursor)?;
        let extents_file = ForkData::parse(&mut cursor)?;
        let catalog_file = ForkData::parse(&mut cursor)?;
        let attributes_file = ForkData::parse(&mut cursor)?;
        let startup_file = ForkData::parse(&mut cursor)?;

        Ok(VolumeHeader {
            signature,
            version,
            attributes,
            last_mounted_version,
            journal_info_block,
            create_date,
            modify_date,
            backup_date,
            checked_date,
            file_count,
            folder_count,
            block_size,
            total_blocks,
            free_blocks,
            next_allocation,
            rsrc_clump_size,
            data_clump_size,
            next_catalog_id,
            write_count,
            encodings_bitmap,
            finder_info,
            allocation_file,
            extents_file,
            catalog_file,
            attributes_file,
            startup_file,
        })
    }

    /// Encode the header back into its 512-byte on-disk form.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(self.signature).unwrap();
        out.write_u16::<BigEndian>(self.version).unwrap();
        out.write_u32::<BigEndian>(self.attributes).unwrap();
        out.write_u32::<BigEndian>(self.last_mounted_version).unwrap();
        out.write_u32::<BigEndian>(self.journal_info_block).unwrap();
        out.write_u32::<BigEndian>(self.create_date).unwrap();
        out.write_u32::<BigEndian>(self.modify_date).unwrap();
        out.write_u32::<BigEndian>(self.backup_date).unwrap();
        out.write_u32::<BigEndian>(self.checked_date).unwrap();
        out.write_u32::<BigEndian>(self.file_count).unwrap();
        out.write_u32::<BigEndian>(self.folder_count).unwrap();
        out.write_u32::<BigEndian>(self.block_size).unwrap();
        out.write_u32::<BigEndian>(self.total_blocks).unwrap();
        out.write_u32::<BigEndian>(self.free_blocks).unwrap();
        out.write_u32::<BigEndian>(self.next_allocation).unwrap();
        out.write_u32::<BigEndian>(self.rsrc_clump_size).unwrap();
        out.write_u32::<BigEndian>(self.data_clump_size).unwrap();
        out.write_u32::<BigEndian>(self.next_catalog_id).unwrap();
        out.write_u32::<BigEndian>(self.write_count).unwrap();
        out.write_u64::<BigEndian>(self.encodings_bitmap).unwrap();
        out.extend_from_slice(&self.finder_info);
        self.allocation_file.write_to(out);
        self.extents_file.write_to(out);
        self.catalog_file.write_to(out);
        self.attributes_file.write_to(out);
        self.startup_file.write_to(out);
    }

    /// Whether this is a case-sensitive HFSX volume.
    pub fn is_hfsx(&self) -> bool {
        self.signature == HFSX_SIGNATURE
    }
}

/// The fields of a legacy HFS Master Directory Block needed to recognize
/// a wrapper and locate the embedded HFS+ volume. The MDB proper is 162
/// bytes; everything not listed here is ignored.
#[derive(Debug, Clone, Default)]
pub struct MasterDirectoryBlock {
    /// `drSigWord` — "BD" on any HFS Standard volume.
    pub sig_word: u16,
    /// `drAlBlkSiz` — allocation block size in bytes.
    pub alloc_block_size: u32,
    /// `drAlBlSt` — first allocation block, in 512-byte sectors.
    pub alloc_block_start: u16,
    /// `drEmbedSigWord` — "H+" when an HFS+ volume is embedded.
    pub embed_sig_word: u16,
    /// `drEmbedExtent` — embedded volume location in allocation blocks.
    pub embed_start_block: u16,
    pub embed_block_count: u16,
}

/// Size of the wrapper MDB candidate region.
pub const MDB_SIZE: usize = 162;

impl MasterDirectoryBlock {
    /// Decode the needed MDB fields from at least 130 bytes of buffer.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 130 {
            return Err(HfsError::Malformed("MDB buffer too short".into()));
        }
        Ok(MasterDirectoryBlock {
            sig_word: u16::from_be_bytes([buf[0], buf[1]]),
            alloc_block_size: u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]),
            alloc_block_start: u16::from_be_bytes([buf[28], buf[29]]),
            embed_sig_word: u16::from_be_bytes([buf[124], buf[125]]),
            embed_start_block: u16::from_be_bytes([buf[126], buf[127]]),
            embed_block_count: u16::from_be_bytes([buf[128], buf[129]]),
        })
    }

    /// Encode the recognized fields into a zero-filled 162-byte MDB image.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let base = out.len();
        out.resize(base + MDB_SIZE, 0);
        out[base..base + 2].copy_from_slice(&self.sig_word.to_be_bytes());
        out[base + 20..base + 24].copy_from_slice(&self.alloc_block_size.to_be_bytes());
        out[base + 28..base + 30].copy_from_slice(&self.alloc_block_start.to_be_bytes());
        out[base + 124..base + 126].copy_from_slice(&self.embed_sig_word.to_be_bytes());
        out[base + 126..base + 128].copy_from_slice(&self.embed_start_block.to_be_bytes());
        out[base + 128..base + 130].copy_from_slice(&self.embed_block_count.to_be_bytes());
    }

    /// Byte offset of the embedded HFS+ volume within the wrapper.
    pub fn embedded_offset(&self) -> u64 {
        self.alloc_block_start as u64 * 512
            + self.embed_start_block as u64 * self.alloc_block_size as u64
    }

    /// Byte length of the embedded HFS+ volume.
    pub fn embedded_length(&self) -> u64 {
        self.embed_block_count as u64 * self.alloc_block_size as u64
    }
}

/// The journal info block, referenced by the volume header on journaled
/// volumes. The journal itself is not replayed.
#[derive(Debug, Clone)]
pub struct JournalInfoBlock {
    pub flags: u32,
    pub device_signature: [u8; 32],
    pub offset: u64,
    pub size: u64,
}

impl JournalInfoBlock {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 52 {
            return Err(HfsError::Malformed("journal info block too short".into()));
        }
        let mut cursor = Cursor::new(buf);
        let flags = cursor.read_u32::<BigEndian>()?;
        let mut device_signature = [0u8; 32];
        cursor.read_exact(&mut device_signature)?;
        Ok(JournalInfoBlock {
            flags,
            device_signature,
            offset: cursor.read_u64::<BigEndian>()?,
            size: cursor.read_u64::<BigEndian>()?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u32::<BigEndian>(self.flags).unwrap();
        out.extend_from_slice(&self.device_signature);
        out.write_u64::<BigEndian>(self.offset).unwrap();
        out.write_u64::<BigEndian>(self.size).unwrap();
    }
}

/// Filesystem flavor found by [`detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Modern HFS+ ("H+").
    HfsPlus,
    /// Case-sensitive HFSX ("HX").
    Hfsx,
    /// HFS+ embedded in an HFS Standard wrapper.
    WrappedHfsPlus,
    /// Bare HFS Standard; recognized but not supported.
    Hfs,
    Unknown,
}

/// Identify the filesystem at the start of a source.
///
/// Reads 2 KiB at offset 0 and examines the candidate MDB and HFS+ header
/// both sited at offset 1024. A "BD" MDB whose embedded signature is "H+"
/// marks a wrapped volume; a bare "BD" is legacy HFS; otherwise the HFS+
/// header signature decides.
pub fn detect<R: Read + Seek>(source: &Source<R>) -> Result<VolumeKind> {
    let mut buf = [0u8; DETECT_SPAN];
    let n = source.read_at(&mut buf, 0)?;
    if n < 1536 {
        return Ok(VolumeKind::Unknown);
    }

    let candidate = &buf[VOLUME_HEADER_OFFSET as usize..];
    let mdb = MasterDirectoryBlock::parse(candidate)?;
    if mdb.sig_word == HFS_SIGNATURE {
        if mdb.embed_sig_word == HFS_PLUS_SIGNATURE {
            info!("found a wrapped HFS+ volume");
            return Ok(VolumeKind::WrappedHfsPlus);
        }
        info!("found an HFS Standard volume");
        return Ok(VolumeKind::Hfs);
    }

    match u16::from_be_bytes([candidate[0], candidate[1]]) {
        HFS_PLUS_SIGNATURE => Ok(VolumeKind::HfsPlus),
        HFSX_SIGNATURE => Ok(VolumeKind::Hfsx),
        _ => Ok(VolumeKind::Unknown),
    }
}

/// An attached, read-only HFS+/HFSX volume.
///
/// Holds the parsed header plus the two B-trees every other lookup needs:
/// the extents overflow tree (consulted while resolving fork extents) and
/// the catalog.
#[derive(Debug)]
pub struct Volume<R> {
    source: Source<R>,
    header: VolumeHeader,
    block_size: u32,
    block_count: u32,
    length: u64,
    extents_tree: BTree<R>,
    catalog_tree: BTree<R>,
}

impl<R: Read + Seek> Volume<R> {
    /// Detect and attach the volume at the start of `source`.
    ///
    /// Wrapped volumes are entered by advancing to the embedded HFS+
    /// origin; bare HFS Standard and unrecognized filesystems are refused.
    pub fn attach(source: Source<R>) -> Result<Self> {
        let source = match detect(&source)? {
            VolumeKind::HfsPlus | VolumeKind::Hfsx => source,
            VolumeKind::WrappedHfsPlus => {
                let mut buf = [0u8; MDB_SIZE];
                source.read_exact_at(&mut buf, VOLUME_HEADER_OFFSET)?;
                let mdb = MasterDirectoryBlock::parse(&buf)?;
                let offset = mdb.embedded_offset();
                debug!("entering embedded volume at +{offset} bytes");
                source.sub_source(source.index(), offset, mdb.embedded_length())
            }
            VolumeKind::Hfs => {
                return Err(HfsError::Unsupported(
                    "bare HFS Standard volumes are not supported".into(),
                ))
            }
            VolumeKind::Unknown => {
                let mut sig = [0u8; 2];
                source.read_exact_at(&mut sig, VOLUME_HEADER_OFFSET)?;
                return Err(HfsError::InvalidSignature(u16::from_be_bytes(sig)));
            }
        };

        let mut buf = [0u8; 512];
        source.read_exact_at(&mut buf, VOLUME_HEADER_OFFSET)?;
        let header = VolumeHeader::parse(&buf)?;

        let block_size = header.block_size;
        if !block_size.is_power_of_two() || block_size < source.block_size() {
            return Err(HfsError::Malformed(format!(
                "allocation block size {block_size} is not a power of two >= the device block size"
            )));
        }
        let block_count = header.total_blocks;
        let length = if source.length() != 0 {
            source.length()
        } else {
            block_size as u64 * block_count as u64
        };

        let extents_fork = Fork::from_fork_data(
            &source,
            block_size,
            &header.extents_file,
            ForkKind::Data,
            CNID_EXTENTS_FILE,
            None,
        )?;
        let extents_tree = BTree::open(extents_fork, TreeKind::Extents)?;

        let catalog_fork = Fork::from_fork_data(
            &source,
            block_size,
            &header.catalog_file,
            ForkKind::Data,
            CNID_CATALOG_FILE,
            Some(&extents_tree),
        )?;
        let catalog_tree = BTree::open(catalog_fork, TreeKind::Catalog)?;

        Ok(Volume {
            source,
            header,
            block_size,
            block_count,
            length,
            extents_tree,
            catalog_tree,
        })
    }

    /// The parsed volume header.
    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    /// The byte source this volume reads from, positioned at its origin.
    pub fn source(&self) -> &Source<R> {
        &self.source
    }

    /// Allocation block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Total allocation blocks.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Volume length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Whether names compare case-sensitively (HFSX).
    pub fn case_sensitive(&self) -> bool {
        self.header.is_hfsx()
    }

    /// The catalog B-tree.
    pub fn catalog(&self) -> &BTree<R> {
        &self.catalog_tree
    }

    /// The extents overflow B-tree.
    pub fn extents_overflow(&self) -> &BTree<R> {
        &self.extents_tree
    }

    /// Open the attributes B-tree, if the volume has an attributes file.
    pub fn attributes(&self) -> Result<Option<BTree<R>>> {
        if self.header.attributes_file.total_blocks == 0 {
            return Ok(None);
        }
        let fork = self.special_fork(CNID_ATTRIBUTES_FILE)?;
        Ok(Some(BTree::open(fork, TreeKind::Attributes)?))
    }

    /// Volume-relative positional byte read.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.source.read_at(buf, offset)
    }

    /// Volume-relative read in allocation-block units. Block arguments are
    /// converted to device blocks by the allocation/device size ratio.
    pub fn read_blocks(&self, buf: &mut [u8], count: u64, start: u64) -> Result<usize> {
        let ratio = (self.block_size / self.source.block_size()) as u64;
        let n = self.source.read_blocks_at(buf, count * ratio, start * ratio)?;
        Ok(n / ratio as usize)
    }

    /// Build the fork of one of the special files addressed by reserved
    /// CNIDs: 3 extents, 4 catalog, 6 allocation, 7 startup, 8 attributes.
    /// CNID 5 is an extents-overflow convention, not a real fork.
    pub fn special_fork(&self, cnid: u32) -> Result<Fork<R>> {
        let fork_data = match cnid {
            CNID_EXTENTS_FILE => &self.header.extents_file,
            CNID_CATALOG_FILE => &self.header.catalog_file,
            CNID_BAD_BLOCKS_FILE => {
                return Err(HfsError::Unsupported(
                    "the bad block file is not a real fork".into(),
                ))
            }
            CNID_ALLOCATION_FILE => &self.header.allocation_file,
            CNID_STARTUP_FILE => &self.header.startup_file,
            CNID_ATTRIBUTES_FILE => &self.header.attributes_file,
            _ => return Err(HfsError::InvalidArgument("not a special-file CNID")),
        };
        let overflow = if cnid == CNID_EXTENTS_FILE {
            None
        } else {
            Some(&self.extents_tree)
        };
        Fork::from_fork_data(&self.source, self.block_size, fork_data, ForkKind::Data, cnid, overflow)
    }

    /// Build a fork from catalog fork data (a file's data or resource fork).
    pub fn fork(&self, fork_data: &ForkData, kind: ForkKind, cnid: u32) -> Result<Fork<R>> {
        Fork::from_fork_data(
            &self.source,
            self.block_size,
            fork_data,
            kind,
            cnid,
            Some(&self.extents_tree),
        )
    }

    /// Read the journal info block, if the volume references one.
    pub fn journal_info(&self) -> Result<Option<JournalInfoBlock>> {
        if self.header.journal_info_block == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.block_size as usize];
        let n = self.read_blocks(&mut buf, 1, self.header.journal_info_block as u64)?;
        if n < 1 {
            return Err(HfsError::Malformed("journal info block unreadable".into()));
        }
        Ok(Some(JournalInfoBlock::parse(&buf)?))
    }

    /// Query the allocation bitmap for one block.
    pub fn block_in_use(&self, block: u32) -> Result<bool> {
        if block >= self.block_count {
            return Err(HfsError::InvalidArgument("block index beyond the volume"));
        }
        let fork = self.special_fork(CNID_ALLOCATION_FILE)?;
        let mut byte = [0u8; 1];
        if fork.read_range(&mut byte, block as u64 / 8)? != 1 {
            return Err(HfsError::Malformed("allocation bitmap truncated".into()));
        }
        Ok(byte[0] & (0x80 >> (block % 8)) != 0)
    }
}
