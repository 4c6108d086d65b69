//! Extent lists and the extents overflow file.
//!
//! A fork's allocation is described by up to eight extent descriptors
//! embedded in its fork data; anything beyond those lives in the extents
//! overflow B-tree, keyed by `(fileID, forkType, startBlock)`. This module
//! builds the complete, gap-free mapping from a fork's logical blocks to
//! allocation blocks.

use std::cmp::Ordering;
use std::io::{Read, Seek};

use byteorder::{BigEndian, WriteBytesExt};
use log::debug;

use crate::btree::BTree;
use crate::error::{HfsError, Result};
use crate::fork::ForkKind;
use crate::volume::{ExtentDescriptor, ForkData};

/// One run of an extent list: `block_count` allocation blocks starting at
/// `start_block`, covering logical blocks from `logical_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentEntry {
    pub logical_start: u64,
    pub start_block: u32,
    pub block_count: u32,
}

/// Ordered, gap-free mapping from a fork's logical blocks to allocation
/// blocks. The first entry starts at logical block 0 and each successor
/// begins where its predecessor ends.
#[derive(Debug, Clone, Default)]
pub struct ExtentList {
    entries: Vec<ExtentEntry>,
}

impl ExtentList {
    pub fn new() -> Self {
        ExtentList::default()
    }

    /// Append a run; its logical start follows the current coverage.
    pub fn append(&mut self, start_block: u32, block_count: u32) {
        let logical_start = self.total_blocks();
        self.entries.push(ExtentEntry {
            logical_start,
            start_block,
            block_count,
        });
    }

    /// Number of logical blocks covered so far.
    pub fn total_blocks(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.logical_start + e.block_count as u64)
            .unwrap_or(0)
    }

    /// Locate the run containing `logical_block`. Returns the allocation
    /// block it maps to and the length of the run remaining from there,
    /// or `None` when the block is beyond the coverage.
    pub fn find(&self, logical_block: u64) -> Option<(u32, u32)> {
        let idx = self
            .entries
            .partition_point(|e| e.logical_start <= logical_block);
        if idx == 0 {
            return None;
        }
        let entry = &self.entries[idx - 1];
        let delta = logical_block - entry.logical_start;
        if delta >= entry.block_count as u64 {
            return None;
        }
        Some((
            entry.start_block + delta as u32,
            entry.block_count - delta as u32,
        ))
    }

    pub fn entries(&self) -> &[ExtentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Key of an extents overflow record: `(forkType, fileID, startBlock)`,
/// ordered by `(fileID, forkType, startBlock)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentKey {
    pub fork_type: u8,
    pub file_id: u32,
    pub start_block: u32,
}

/// On-disk key length of an extent key, excluding the length prefix.
pub const EXTENT_KEY_LENGTH: u16 = 10;

impl ExtentKey {
    /// Decode from key bytes including the 16-bit length prefix.
    pub fn parse(key: &[u8]) -> Result<Self> {
        if key.len() < 12 {
            return Err(HfsError::Malformed("extent key too short".into()));
        }
        Ok(ExtentKey {
            fork_type: key[2],
            file_id: u32::from_be_bytes([key[4], key[5], key[6], key[7]]),
            start_block: u32::from_be_bytes([key[8], key[9], key[10], key[11]]),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(EXTENT_KEY_LENGTH).unwrap();
        out.push(self.fork_type);
        out.push(0); // pad
        out.write_u32::<BigEndian>(self.file_id).unwrap();
        out.write_u32::<BigEndian>(self.start_block).unwrap();
    }

    fn cmp_target(&self, file_id: u32, fork_type: u8, start_block: u32) -> Ordering {
        self.file_id
            .cmp(&file_id)
            .then(self.fork_type.cmp(&fork_type))
            .then(self.start_block.cmp(&start_block))
    }
}

/// Decode an extents leaf payload: eight extent descriptors.
pub fn parse_extent_payload(payload: &[u8]) -> Result<[ExtentDescriptor; 8]> {
    if payload.len() < 64 {
        return Err(HfsError::Malformed("extent record too short".into()));
    }
    let mut extents = [ExtentDescriptor::default(); 8];
    for (i, extent) in extents.iter_mut().enumerate() {
        let at = i * 8;
        extent.start_block =
            u32::from_be_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]]);
        extent.block_count = u32::from_be_bytes([
            payload[at + 4],
            payload[at + 5],
            payload[at + 6],
            payload[at + 7],
        ]);
    }
    Ok(extents)
}

/// Comparator positioning an extents-tree search at `(file_id, fork_type,
/// start_block)`. Evaluates a record's key bytes against the target.
pub fn extent_key_comparator(
    file_id: u32,
    fork_type: u8,
    start_block: u32,
) -> impl Fn(&[u8]) -> Ordering {
    move |key: &[u8]| match ExtentKey::parse(key) {
        Ok(k) => k.cmp_target(file_id, fork_type, start_block),
        Err(_) => Ordering::Less,
    }
}

/// Build the complete extent list for a fork: the fork data's inline
/// extents first, then overflow records from the extents tree until the
/// fork's total block count is covered.
pub(crate) fn resolve_fork_extents<R: Read + Seek>(
    fork_data: &ForkData,
    kind: ForkKind,
    cnid: u32,
    overflow: Option<&BTree<R>>,
) -> Result<ExtentList> {
    let mut list = ExtentList::new();
    for extent in &fork_data.extents {
        if extent.block_count == 0 {
            break;
        }
        list.append(extent.start_block, extent.block_count);
    }

    let total = fork_data.total_blocks as u64;
    if list.total_blocks() >= total {
        return Ok(list);
    }

    let Some(tree) = overflow else {
        return Err(HfsError::Malformed(format!(
            "CNID {cnid}: inline extents cover {} of {total} blocks and no overflow tree is available",
            list.total_blocks()
        )));
    };

    while list.total_blocks() < total {
        let covered = list.total_blocks();
        debug!("CNID {cnid}: looking up overflow extents from block {covered}");

        let mut cursor = tree.cursor();
        cursor.seek_with(&extent_key_comparator(cnid, kind.on_disk(), covered as u32))?;
        let Some((key, payload)) = cursor.current()? else {
            break;
        };
        let key = ExtentKey::parse(key)?;
        if key.file_id != cnid || key.fork_type != kind.on_disk() {
            break;
        }

        for extent in parse_extent_payload(payload)? {
            if extent.block_count == 0 {
                break;
            }
            list.append(extent.start_block, extent.block_count);
        }
        if list.total_blocks() == covered {
            break; // an empty record would loop forever
        }
    }

    if list.total_blocks() < total {
        return Err(HfsError::Malformed(format!(
            "CNID {cnid}: extents cover only {} of {total} blocks",
            list.total_blocks()
        )));
    }
    Ok(list)
}
