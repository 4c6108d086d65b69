//! Synthetic volume images for tests.
//!
//! Everything here is produced through the crate's own encoders, so the
//! fixtures stay byte-exact with the decoders by construction. The small
//! volume holds a two-level catalog tree:
//!
//! ```text
//! /            (root folder "MyVol", CNID 2)
//! /alpha.txt   (CNID 16, one extent)
//! /beta        (folder, CNID 17)
//! /beta/nested.txt (CNID 19)
//! /gamma.txt   (CNID 18, three fragmented extents)
//! ```

use std::cell::RefCell;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::rc::Rc;

use crate::btree::{BTreeHeader, NodeDescriptor, NodeKind, ATTR_BIG_KEYS, ATTR_VARIABLE_INDEX_KEYS,
    KEY_COMPARE_BINARY, KEY_COMPARE_CASE_FOLDING};
use crate::catalog::{
    name_to_units, BsdInfo, CatalogFile, CatalogFolder, CatalogKey, CatalogRecord, CatalogThread,
};
use crate::extents::ExtentKey;
use crate::fork::{Fork, ForkKind};
use crate::source::Source;
use crate::volume::{
    ExtentDescriptor, ForkData, MasterDirectoryBlock, VolumeHeader, HFS_PLUS_SIGNATURE,
    HFS_SIGNATURE,
};

pub(crate) const BLOCK_SIZE: u32 = 512;
pub(crate) const TOTAL_BLOCKS: u32 = 64;
pub(crate) const NODE_SIZE: u16 = 1024;

pub(crate) const ALPHA_CONTENT: &[u8] = b"hello, volume!";
pub(crate) const GAMMA_SIZE: usize = 1500;

/// Embedded-volume origin of the wrapped fixture:
/// `drAlBlSt(4) * 512 + startBlock(3) * drAlBlkSiz(1024)`.
pub(crate) const WRAPPER_EMBED_OFFSET: u64 = 5120;

/// Every catalog leaf key of the small volume, in tree order.
pub(crate) const CATALOG_NAMES: &[(u32, &str)] = &[
    (1, "MyVol"),
    (2, ""),
    (2, "alpha.txt"),
    (2, "beta"),
    (2, "gamma.txt"),
    (16, ""),
    (17, ""),
    (17, "nested.txt"),
    (18, ""),
    (19, ""),
];

pub(crate) fn source(bytes: Vec<u8>) -> Source<Cursor<Vec<u8>>> {
    Source::new(Cursor::new(bytes))
}

fn put(image: &mut [u8], offset: usize, bytes: &[u8]) {
    image[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Pack records into a node image: descriptor, records from offset 14,
/// and the offset table (plus the free-space slot) at the tail.
pub(crate) fn build_node(
    node_size: usize,
    descriptor: &NodeDescriptor,
    records: &[Vec<u8>],
) -> Vec<u8> {
    assert_eq!(descriptor.num_records as usize, records.len());
    let mut node = vec![0u8; node_size];

    let mut head = Vec::new();
    descriptor.write_to(&mut head);
    node[..14].copy_from_slice(&head);

    let table_start = node_size - (records.len() + 1) * 2;
    let mut at = 14usize;
    for (i, record) in records.iter().enumerate() {
        assert!(at + record.len() <= table_start, "record {i} does not fit");
        node[at..at + record.len()].copy_from_slice(record);
        let slot = node_size - (i + 1) * 2;
        node[slot..slot + 2].copy_from_slice(&(at as u16).to_be_bytes());
        at += record.len();
    }
    let free_slot = node_size - (records.len() + 1) * 2;
    node[free_slot..free_slot + 2].copy_from_slice(&(at as u16).to_be_bytes());
    node
}

fn leaf_descriptor(forward: u32, backward: u32, num_records: u16) -> NodeDescriptor {
    NodeDescriptor {
        forward_link: forward,
        backward_link: backward,
        kind: NodeKind::Leaf,
        height: 1,
        num_records,
        reserved: 0,
    }
}

fn header_node(node_size: usize, header: &BTreeHeader) -> Vec<u8> {
    let mut header_record = Vec::new();
    header.write_to(&mut header_record);

    let map_len = node_size - 14 - 106 - 128 - 8;
    let mut map = vec![0u8; map_len];
    map[0] = 0xF0;

    build_node(
        node_size,
        &NodeDescriptor {
            forward_link: 0,
            backward_link: 0,
            kind: NodeKind::Header,
            height: 0,
            num_records: 3,
            reserved: 0,
        },
        &[header_record, vec![0u8; 128], map],
    )
}

fn catalog_leaf_record(parent_id: u32, name: &str, record: &CatalogRecord) -> Vec<u8> {
    let key = CatalogKey {
        parent_id,
        node_name: name_to_units(name),
    };
    let mut bytes = Vec::new();
    key.write_to(&mut bytes);
    if bytes.len() % 2 != 0 {
        bytes.push(0);
    }
    record.write_to(&mut bytes);
    bytes
}

fn catalog_index_record(parent_id: u32, name: &str, child: u32) -> Vec<u8> {
    let key = CatalogKey {
        parent_id,
        node_name: name_to_units(name),
    };
    let mut bytes = Vec::new();
    key.write_to(&mut bytes);
    if bytes.len() % 2 != 0 {
        bytes.push(0);
    }
    bytes.extend_from_slice(&child.to_be_bytes());
    bytes
}

fn file_record(file_id: u32, logical_size: u64, extents: &[(u32, u32)]) -> CatalogRecord {
    let total_blocks: u32 = extents.iter().map(|&(_, count)| count).sum();
    let mut fork = ForkData {
        logical_size,
        clump_size: BLOCK_SIZE,
        total_blocks,
        ..Default::default()
    };
    for (slot, &(start, count)) in fork.extents.iter_mut().zip(extents) {
        *slot = ExtentDescriptor {
            start_block: start,
            block_count: count,
        };
    }
    CatalogRecord::File(CatalogFile {
        flags: 0x0002,
        file_id,
        create_date: 3_600_000_000,
        content_mod_date: 3_600_000_100,
        attribute_mod_date: 3_600_000_100,
        access_date: 3_600_000_200,
        bsd_info: BsdInfo {
            owner_id: 501,
            group_id: 20,
            file_mode: 0o100644,
            ..Default::default()
        },
        data_fork: fork,
        ..Default::default()
    })
}

fn folder_record(folder_id: u32, valence: u32) -> CatalogRecord {
    CatalogRecord::Folder(CatalogFolder {
        valence,
        folder_id,
        create_date: 3_600_000_000,
        content_mod_date: 3_600_000_100,
        bsd_info: BsdInfo {
            owner_id: 501,
            group_id: 20,
            file_mode: 0o040755,
            ..Default::default()
        },
        folder_count: 0,
        ..Default::default()
    })
}

fn thread_record(folder: bool, parent_id: u32, name: &str) -> CatalogRecord {
    let thread = CatalogThread {
        reserved: 0,
        parent_id,
        node_name: name_to_units(name),
    };
    if folder {
        CatalogRecord::FolderThread(thread)
    } else {
        CatalogRecord::FileThread(thread)
    }
}

pub(crate) fn catalog_tree_header() -> BTreeHeader {
    BTreeHeader {
        tree_depth: 2,
        root_node: 1,
        leaf_records: CATALOG_NAMES.len() as u32,
        first_leaf_node: 2,
        last_leaf_node: 3,
        node_size: NODE_SIZE,
        max_key_length: 516,
        total_nodes: 4,
        free_nodes: 0,
        clump_size: 4096,
        btree_type: 0,
        key_compare_type: KEY_COMPARE_CASE_FOLDING,
        attributes: ATTR_BIG_KEYS | ATTR_VARIABLE_INDEX_KEYS,
    }
}

fn catalog_file_bytes() -> Vec<u8> {
    let node_size = NODE_SIZE as usize;

    let leaf2 = build_node(
        node_size,
        &leaf_descriptor(3, 0, 5),
        &[
            catalog_leaf_record(1, "MyVol", &folder_record(2, 3)),
            catalog_leaf_record(2, "", &thread_record(true, 1, "MyVol")),
            catalog_leaf_record(2, "alpha.txt", &file_record(16, ALPHA_CONTENT.len() as u64, &[(40, 1)])),
            catalog_leaf_record(2, "beta", &folder_record(17, 1)),
            catalog_leaf_record(
                2,
                "gamma.txt",
                &file_record(18, GAMMA_SIZE as u64, &[(44, 1), (46, 1), (47, 1)]),
            ),
        ],
    );

    let leaf3 = build_node(
        node_size,
        &leaf_descriptor(0, 2, 5),
        &[
            catalog_leaf_record(16, "", &thread_record(false, 2, "alpha.txt")),
            catalog_leaf_record(17, "", &thread_record(true, 2, "beta")),
            catalog_leaf_record(17, "nested.txt", &file_record(19, 4, &[(42, 1)])),
            catalog_leaf_record(18, "", &thread_record(false, 2, "gamma.txt")),
            catalog_leaf_record(19, "", &thread_record(false, 17, "nested.txt")),
        ],
    );

    let index = build_node(
        node_size,
        &NodeDescriptor {
            forward_link: 0,
            backward_link: 0,
            kind: NodeKind::Index,
            height: 2,
            num_records: 2,
            reserved: 0,
        },
        &[
            catalog_index_record(1, "MyVol", 2),
            catalog_index_record(16, "", 3),
        ],
    );

    let mut file = header_node(node_size, &catalog_tree_header());
    file.extend_from_slice(&index);
    file.extend_from_slice(&leaf2);
    file.extend_from_slice(&leaf3);
    file
}

fn empty_extents_tree_bytes() -> Vec<u8> {
    let header = BTreeHeader {
        tree_depth: 0,
        root_node: 0,
        leaf_records: 0,
        first_leaf_node: 0,
        last_leaf_node: 0,
        node_size: NODE_SIZE,
        max_key_length: 10,
        total_nodes: 2,
        free_nodes: 1,
        clump_size: 2048,
        btree_type: 0,
        key_compare_type: KEY_COMPARE_BINARY,
        attributes: ATTR_BIG_KEYS,
    };
    let mut file = header_node(NODE_SIZE as usize, &header);
    file.resize(2 * NODE_SIZE as usize, 0);
    file
}

fn volume_header() -> VolumeHeader {
    let fork = |logical_size: u64, total: u32, start: u32| {
        let mut data = ForkData {
            logical_size,
            clump_size: logical_size as u32,
            total_blocks: total,
            ..Default::default()
        };
        data.extents[0] = ExtentDescriptor {
            start_block: start,
            block_count: total,
        };
        data
    };

    VolumeHeader {
        signature: HFS_PLUS_SIGNATURE,
        version: 4,
        attributes: 0,
        last_mounted_version: u32::from_be_bytes(*b"10.0"),
        journal_info_block: 0,
        create_date: 3_600_000_000,
        modify_date: 3_600_000_100,
        backup_date: 0,
        checked_date: 3_600_000_000,
        file_count: 3,
        folder_count: 2,
        block_size: BLOCK_SIZE,
        total_blocks: TOTAL_BLOCKS,
        free_blocks: 16,
        next_allocation: 49,
        rsrc_clump_size: 4096,
        data_clump_size: 4096,
        next_catalog_id: 20,
        write_count: 1,
        encodings_bitmap: 1,
        finder_info: [0u8; 32],
        allocation_file: fork(512, 1, 4),
        extents_file: fork(2048, 4, 16),
        catalog_file: fork(4096, 8, 8),
        attributes_file: ForkData::default(),
        startup_file: ForkData::default(),
    }
}

/// A complete single-partition HFS+ image.
pub(crate) fn small_volume() -> Vec<u8> {
    let mut image = vec![0u8; TOTAL_BLOCKS as usize * BLOCK_SIZE as usize];

    let mut header = Vec::new();
    volume_header().write_to(&mut header);
    put(&mut image, 1024, &header);

    // Allocation bitmap: blocks 0..=47 in use.
    put(&mut image, 4 * 512, &[0xFF; 6]);

    put(&mut image, 8 * 512, &catalog_file_bytes());
    put(&mut image, 16 * 512, &empty_extents_tree_bytes());

    put(&mut image, 40 * 512, ALPHA_CONTENT);
    put(&mut image, 42 * 512, b"deep");
    put(&mut image, 44 * 512, b"GAM0");
    put(&mut image, 46 * 512, b"GAM1");
    put(&mut image, 47 * 512, b"GAM2");

    image
}

/// The small volume embedded in an HFS Standard wrapper.
pub(crate) fn wrapped_volume() -> Vec<u8> {
    let inner = small_volume();
    let mut image = vec![0u8; WRAPPER_EMBED_OFFSET as usize + inner.len()];

    let mdb = MasterDirectoryBlock {
        sig_word: HFS_SIGNATURE,
        alloc_block_size: 1024,
        alloc_block_start: 4,
        embed_sig_word: HFS_PLUS_SIGNATURE,
        embed_start_block: 3,
        embed_block_count: 32,
    };
    let mut encoded = Vec::new();
    mdb.write_to(&mut encoded);
    put(&mut image, 1024, &encoded);
    put(&mut image, WRAPPER_EMBED_OFFSET as usize, &inner);
    image
}

/// An HFS Standard image with no embedded HFS+ volume.
pub(crate) fn bare_hfs_volume() -> Vec<u8> {
    let mut image = vec![0u8; 4096];
    let mdb = MasterDirectoryBlock {
        sig_word: HFS_SIGNATURE,
        alloc_block_size: 512,
        alloc_block_start: 4,
        embed_sig_word: 0,
        embed_start_block: 0,
        embed_block_count: 0,
    };
    let mut encoded = Vec::new();
    mdb.write_to(&mut encoded);
    put(&mut image, 1024, &encoded);
    image
}

/// A standalone extents overflow tree holding two records for CNID 77:
/// eight one-block runs at 200, 202, ... and one four-block run at 300.
pub(crate) fn extents_tree_fixture() -> Fork<Cursor<Vec<u8>>> {
    let node_size = 512usize;

    let header = BTreeHeader {
        tree_depth: 1,
        root_node: 1,
        leaf_records: 2,
        first_leaf_node: 1,
        last_leaf_node: 1,
        node_size: node_size as u16,
        max_key_length: 10,
        total_nodes: 2,
        free_nodes: 0,
        clump_size: 1024,
        btree_type: 0,
        key_compare_type: KEY_COMPARE_BINARY,
        attributes: ATTR_BIG_KEYS,
    };

    let record = |start_block: u32, extents: &[(u32, u32)]| {
        let key = ExtentKey {
            fork_type: 0,
            file_id: 77,
            start_block,
        };
        let mut bytes = Vec::new();
        key.write_to(&mut bytes);
        let mut slots = [(0u32, 0u32); 8];
        slots[..extents.len()].copy_from_slice(extents);
        for (start, count) in slots {
            bytes.extend_from_slice(&start.to_be_bytes());
            bytes.extend_from_slice(&count.to_be_bytes());
        }
        bytes
    };

    let runs: Vec<(u32, u32)> = (0..8u32).map(|i| (200 + 2 * i, 1)).collect();
    let leaf = build_node(
        node_size,
        &leaf_descriptor(0, 0, 2),
        &[record(8, &runs), record(16, &[(300, 4)])],
    );

    let mut file = header_node(node_size, &header);
    file.extend_from_slice(&leaf);

    let fork_data = ForkData {
        logical_size: file.len() as u64,
        clump_size: 512,
        total_blocks: 2,
        extents: {
            let mut extents = [ExtentDescriptor::default(); 8];
            extents[0] = ExtentDescriptor {
                start_block: 0,
                block_count: 2,
            };
            extents
        },
    };

    Fork::from_fork_data(
        &Source::new(Cursor::new(file)),
        512,
        &fork_data,
        ForkKind::Data,
        CNID_FIXTURE_EXTENTS,
        None,
    )
    .unwrap()
}

const CNID_FIXTURE_EXTENTS: u32 = 3;

/// A reader that logs every `(offset, length)` it serves.
pub(crate) struct RecordingReader<R> {
    inner: R,
    log: Rc<RefCell<Vec<(u64, usize)>>>,
    position: u64,
}

impl<R: Read + Seek> Read for RecordingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.log.borrow_mut().push((self.position, n));
        }
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for RecordingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = self.inner.seek(pos)?;
        Ok(self.position)
    }
}

/// A fork of three fragmented runs — 10 blocks at 100, 5 at 500, 3 at
/// 200 — over an instrumented device whose every block is filled with its
/// own index modulo 256.
#[allow(clippy::type_complexity)]
pub(crate) fn fragmented_fork() -> (
    Fork<RecordingReader<Cursor<Vec<u8>>>>,
    Rc<RefCell<Vec<(u64, usize)>>>,
) {
    let blocks = 520usize;
    let mut device = vec![0u8; blocks * 512];
    for block in 0..blocks {
        device[block * 512..(block + 1) * 512].fill((block % 256) as u8);
    }

    let log = Rc::new(RefCell::new(Vec::new()));
    let reader = RecordingReader {
        inner: Cursor::new(device),
        log: Rc::clone(&log),
        position: 0,
    };

    let mut fork_data = ForkData {
        logical_size: 18 * 512,
        clump_size: 512,
        total_blocks: 18,
        ..Default::default()
    };
    fork_data.extents[0] = ExtentDescriptor { start_block: 100, block_count: 10 };
    fork_data.extents[1] = ExtentDescriptor { start_block: 500, block_count: 5 };
    fork_data.extents[2] = ExtentDescriptor { start_block: 200, block_count: 3 };

    let fork = Fork::from_fork_data(
        &Source::new(reader),
        512,
        &fork_data,
        ForkKind::Data,
        99,
        None,
    )
    .unwrap();

    (fork, log)
}
