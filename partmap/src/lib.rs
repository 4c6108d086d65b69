//! Partition-scheme detection for whole-disk images and devices.
//!
//! The probers exist to locate filesystem volumes — HFS+ above all — and
//! to report the partition table; they decode each scheme only deeply
//! enough to yield a byte offset and length per partition. Detection
//! precedence is GPT, then MBR, then Core Storage, then APM: a protective
//! MBR must not shadow the GPT it guards.

pub mod apm;
pub mod cs;
pub mod error;
pub mod gpt;
pub mod mbr;

pub use error::{PartMapError, Result};

use std::io::{Read, Seek};

use log::info;

/// Sector size assumed by every scheme here.
pub const SECTOR_SIZE: u64 = 512;

/// Recognized partitioning schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Gpt,
    Mbr,
    CoreStorage,
    Apm,
}

impl Scheme {
    pub fn name(self) -> &'static str {
        match self {
            Scheme::Gpt => "GUID Partition Table",
            Scheme::Mbr => "Master Boot Record",
            Scheme::CoreStorage => "Core Storage",
            Scheme::Apm => "Apple Partition Map",
        }
    }
}

/// What a partition likely contains, as far as its type tag says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionHint {
    /// An HFS-family filesystem worth attaching.
    Hfs,
    /// A Core Storage physical volume.
    CoreStorage,
    /// Some other filesystem.
    FileSystem,
    /// Bookkeeping space: free, drivers, partition maps, protective entries.
    Ignore,
    Unknown,
}

/// One partition: a byte range of the parent source plus a content hint.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Slot in the partition table, counted from 0.
    pub index: usize,
    /// Byte offset within the probed source.
    pub offset: u64,
    /// Byte length.
    pub length: u64,
    pub hint: PartitionHint,
    /// Human-readable type or volume name from the table.
    pub name: String,
}

/// Probe the reader for a partition scheme. Returns the scheme and its
/// partitions, or `None` when no scheme announces itself.
pub fn detect<R: Read + Seek>(reader: &mut R) -> Result<Option<(Scheme, Vec<Partition>)>> {
    if let Some(partitions) = gpt::probe(reader)? {
        info!("found a GUID partition table with {} entries", partitions.len());
        return Ok(Some((Scheme::Gpt, partitions)));
    }
    if let Some(partitions) = mbr::probe(reader)? {
        info!("found an MBR with {} partitions", partitions.len());
        return Ok(Some((Scheme::Mbr, partitions)));
    }
    if let Some(partitions) = cs::probe(reader)? {
        info!("found a Core Storage physical volume");
        return Ok(Some((Scheme::CoreStorage, partitions)));
    }
    if let Some(partitions) = apm::probe(reader)? {
        info!("found an Apple partition map with {} entries", partitions.len());
        return Ok(Some((Scheme::Apm, partitions)));
    }
    Ok(None)
}

/// Read one 512-byte sector, or `None` when the source is too short.
pub(crate) fn read_sector<R: Read + Seek>(reader: &mut R, lba: u64) -> Result<Option<[u8; 512]>> {
    use std::io::SeekFrom;

    let mut sector = [0u8; 512];
    reader.seek(SeekFrom::Start(lba * SECTOR_SIZE))?;

    let mut filled = 0;
    while filled < sector.len() {
        match reader.read(&mut sector[filled..]) {
            Ok(0) => return Ok(None),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(sector))
}
