//! B-tree reading: nodes, the header record, search, and leaf iteration.
//!
//! Every special-file B-tree (catalog, extents overflow, attributes)
//! shares one node format: a 14-byte node descriptor, packed records, and
//! a table of 16-bit record offsets growing backwards from the node's end.
//! Nodes decode into immutable [`Node`] values; records are interpreted
//! lazily, per tree kind, from the decoded node.

use std::cmp::Ordering;
use std::io::{Cursor as IoCursor, Read, Seek};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{HfsError, Result};
use crate::fork::Fork;

/// Upper bound on index-node hops per search; real trees are shallow.
const MAX_TREE_DEPTH: u16 = 16;

/// Header attribute bit: key lengths are 16-bit.
pub const ATTR_BIG_KEYS: u32 = 0x0000_0002;

/// Header attribute bit: index-node keys are variable length.
pub const ATTR_VARIABLE_INDEX_KEYS: u32 = 0x0000_0004;

/// Key comparison styles declared in the header record.
pub const KEY_COMPARE_CASE_FOLDING: u8 = 0xCF;
pub const KEY_COMPARE_BINARY: u8 = 0xBC;

/// Which special file a tree belongs to; selects record interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Catalog,
    Extents,
    Attributes,
}

/// B-tree node kinds, from the signed kind byte of the node descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Index,
    Header,
    Map,
}

impl NodeKind {
    pub fn from_raw(raw: i8) -> Result<Self> {
        match raw {
            -1 => Ok(NodeKind::Leaf),
            0 => Ok(NodeKind::Index),
            1 => Ok(NodeKind::Header),
            2 => Ok(NodeKind::Map),
            other => Err(HfsError::Malformed(format!("unknown node kind {other}"))),
        }
    }

    pub fn to_raw(self) -> i8 {
        match self {
            NodeKind::Leaf => -1,
            NodeKind::Index => 0,
            NodeKind::Header => 1,
            NodeKind::Map => 2,
        }
    }
}

/// The 14-byte descriptor at the start of every node.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: NodeKind,
    pub height: u8,
    pub num_records: u16,
    pub reserved: u16,
}

impl NodeDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 14 {
            return Err(HfsError::Malformed("node descriptor too short".into()));
        }
        let mut cursor = IoCursor::new(buf);
        Ok(NodeDescriptor {
            forward_link: cursor.read_u32::<BigEndian>()?,
            backward_link: cursor.read_u32::<BigEndian>()?,
            kind: NodeKind::from_raw(cursor.read_i8()?)?,
            height: cursor.read_u8()?,
            num_records: cursor.read_u16::<BigEndian>()?,
            reserved: cursor.read_u16::<BigEndian>()?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u32::<BigEndian>(self.forward_link).unwrap();
        out.write_u32::<BigEndian>(self.backward_link).unwrap();
        out.write_i8(self.kind.to_raw()).unwrap();
        out.write_u8(self.height).unwrap();
        out.write_u16::<BigEndian>(self.num_records).unwrap();
        out.write_u16::<BigEndian>(self.reserved).unwrap();
    }
}

/// The 106-byte header record, record 0 of the header node.
#[derive(Debug, Clone)]
pub struct BTreeHeader {
    pub tree_depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
    pub clump_size: u32,
    pub btree_type: u8,
    pub key_compare_type: u8,
    pub attributes: u32,
}

impl BTreeHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 106 {
            return Err(HfsError::Malformed("B-tree header record too short".into()));
        }
        let mut cursor = IoCursor::new(buf);
        let tree_depth = cursor.read_u16::<BigEndian>()?;
        let root_node = cursor.read_u32::<BigEndian>()?;
        let leaf_records = cursor.read_u32::<BigEndian>()?;
        let first_leaf_node = cursor.read_u32::<BigEndian>()?;
        let last_leaf_node = cursor.read_u32::<BigEndian>()?;
        let node_size = cursor.read_u16::<BigEndian>()?;
        let max_key_length = cursor.read_u16::<BigEndian>()?;
        let total_nodes = cursor.read_u32::<BigEndian>()?;
        let free_nodes = cursor.read_u32::<BigEndian>()?;
        let _reserved1 = cursor.read_u16::<BigEndian>()?;
        let clump_size = cursor.read_u32::<BigEndian>()?;
        let btree_type = cursor.read_u8()?;
        let key_compare_type = cursor.read_u8()?;
        let attributes = cursor.read_u32::<BigEndian>()?;
        // 64 reserved bytes follow.

        Ok(BTreeHeader {
            tree_depth,
            root_node,
            leaf_records,
            first_leaf_node,
            last_leaf_node,
            node_size,
            max_key_length,
            total_nodes,
            free_nodes,
            clump_size,
            btree_type,
            key_compare_type,
            attributes,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(self.tree_depth).unwrap();
        out.write_u32::<BigEndian>(self.root_node).unwrap();
        out.write_u32::<BigEndian>(self.leaf_records).unwrap();
        out.write_u32::<BigEndian>(self.first_leaf_node).unwrap();
        out.write_u32::<BigEndian>(self.last_leaf_node).unwrap();
        out.write_u16::<BigEndian>(self.node_size).unwrap();
        out.write_u16::<BigEndian>(self.max_key_length).unwrap();
        out.write_u32::<BigEndian>(self.total_nodes).unwrap();
        out.write_u32::<BigEndian>(self.free_nodes).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        out.write_u32::<BigEndian>(self.clump_size).unwrap();
        out.write_u8(self.btree_type).unwrap();
        out.write_u8(self.key_compare_type).unwrap();
        out.write_u32::<BigEndian>(self.attributes).unwrap();
        out.resize(out.len() + 64, 0);
    }

    /// Whether record keys carry a 16-bit length prefix.
    pub fn big_keys(&self) -> bool {
        self.attributes & ATTR_BIG_KEYS != 0
    }
}

/// A decoded B-tree node: descriptor, raw buffer, and the record offset
/// table. Immutable once decoded.
#[derive(Debug)]
pub struct Node {
    pub descriptor: NodeDescriptor,
    data: Vec<u8>,
    offsets: Vec<u16>,
    big_keys: bool,
}

impl Node {
    fn parse(data: Vec<u8>, big_keys: bool) -> Result<Self> {
        let descriptor = NodeDescriptor::parse(&data)?;
        let num = descriptor.num_records as usize;
        let size = data.len();

        // num_records + 1 table slots; the extra one marks free space.
        if 14 + (num + 1) * 2 > size {
            return Err(HfsError::Malformed(format!(
                "node descriptor reports {num} records, more than a {size}-byte node can hold"
            )));
        }

        let mut offsets = Vec::with_capacity(num + 1);
        for i in 0..=num {
            let at = size - (i + 1) * 2;
            offsets.push(u16::from_be_bytes([data[at], data[at + 1]]));
        }

        Ok(Node {
            descriptor,
            data,
            offsets,
            big_keys,
        })
    }

    pub fn num_records(&self) -> usize {
        self.descriptor.num_records as usize
    }

    /// Raw node buffer (map nodes expose their bitmap this way).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Raw bytes of record `index`.
    pub fn record(&self, index: usize) -> Result<&[u8]> {
        if index >= self.num_records() {
            return Err(HfsError::InvalidArgument("record index out of range"));
        }
        let start = self.offsets[index] as usize;
        let end = self.offsets[index + 1] as usize;
        let table_start = self.data.len() - (self.num_records() + 1) * 2;
        if start < 14 || start > end || end > table_start {
            return Err(HfsError::Malformed(format!(
                "record {index} offsets {start}..{end} fall outside the node"
            )));
        }
        Ok(&self.data[start..end])
    }

    /// Split record `index` into its key (including the length prefix) and
    /// payload. The payload begins after the key, rounded up to an even
    /// offset.
    pub fn record_parts(&self, index: usize) -> Result<(&[u8], &[u8])> {
        let record = self.record(index)?;
        let (key_len, prefix) = if self.big_keys {
            if record.len() < 2 {
                return Err(HfsError::Malformed("record too short for its key".into()));
            }
            (u16::from_be_bytes([record[0], record[1]]) as usize, 2)
        } else {
            if record.is_empty() {
                return Err(HfsError::Malformed("record too short for its key".into()));
            }
            (record[0] as usize, 1)
        };

        let key_end = prefix + key_len;
        let payload_start = key_end + (key_end & 1);
        if payload_start > record.len() {
            return Err(HfsError::Malformed(format!(
                "record {index} key length {key_len} exceeds the record"
            )));
        }
        Ok((&record[..key_end], &record[payload_start..]))
    }

    /// Child node index carried by an index-node record.
    pub fn index_child(&self, index: usize) -> Result<u32> {
        let (_, payload) = self.record_parts(index)?;
        if payload.len() < 4 {
            return Err(HfsError::Malformed(
                "index record too short for a child pointer".into(),
            ));
        }
        Ok(u32::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]))
    }
}

/// Where a search ended up: a leaf position, exact or insertion point.
#[derive(Debug)]
pub struct LeafHit {
    pub node: Node,
    pub node_index: u32,
    pub record_index: usize,
    pub found: bool,
}

/// A read-only B-tree over a fork.
#[derive(Debug)]
pub struct BTree<R> {
    fork: Fork<R>,
    kind: TreeKind,
    header: BTreeHeader,
}

impl<R: Read + Seek> BTree<R> {
    /// Open the B-tree stored in `fork`: read the head of node 0 (always
    /// the header node) and decode the header record.
    pub fn open(fork: Fork<R>, kind: TreeKind) -> Result<Self> {
        let mut head = [0u8; 120];
        let n = fork.read_range(&mut head, 0)?;
        if n < head.len() {
            return Err(HfsError::Malformed(
                "B-tree file too short for a header node".into(),
            ));
        }

        let descriptor = NodeDescriptor::parse(&head)?;
        if descriptor.kind != NodeKind::Header {
            return Err(HfsError::Malformed(format!(
                "node 0 is a {:?} node, expected the header node",
                descriptor.kind
            )));
        }

        let header = BTreeHeader::parse(&head[14..])?;
        if !header.node_size.is_power_of_two() || header.node_size < 512 {
            return Err(HfsError::Malformed(format!(
                "implausible B-tree node size {}",
                header.node_size
            )));
        }

        Ok(BTree { fork, kind, header })
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    pub fn header(&self) -> &BTreeHeader {
        &self.header
    }

    pub fn fork(&self) -> &Fork<R> {
        &self.fork
    }

    /// Whether keys compare case-sensitively (binary compare).
    pub fn case_sensitive(&self) -> bool {
        self.header.key_compare_type == KEY_COMPARE_BINARY
    }

    /// Read and decode node `index`.
    pub fn node(&self, index: u32) -> Result<Node> {
        if self.header.total_nodes != 0 && index >= self.header.total_nodes {
            return Err(HfsError::Malformed(format!(
                "node index {index} beyond the tree's {} nodes",
                self.header.total_nodes
            )));
        }
        let size = self.header.node_size as usize;
        let mut data = vec![0u8; size];
        let n = self.fork.read_range(&mut data, index as u64 * size as u64)?;
        if n < size {
            return Err(HfsError::Malformed(format!("node {index} read truncated")));
        }
        Node::parse(data, self.header.big_keys())
    }

    /// Descend from the root to the leaf position for a target key.
    ///
    /// `cmp` evaluates a record's key bytes (length prefix included)
    /// against the target: `Less` means the record key sorts first.
    /// Returns `None` only for an empty tree; otherwise the leaf and the
    /// matching record index, or the insertion point with `found == false`.
    pub fn search_with<F>(&self, cmp: &F) -> Result<Option<LeafHit>>
    where
        F: Fn(&[u8]) -> Ordering,
    {
        if self.header.root_node == 0 {
            return Ok(None);
        }

        let mut node_index = self.header.root_node;
        let mut hops = 0u16;

        loop {
            hops += 1;
            if hops > MAX_TREE_DEPTH {
                return Err(HfsError::Malformed(
                    "index chain deeper than any valid B-tree".into(),
                ));
            }

            let node = self.node(node_index)?;
            match node.descriptor.kind {
                NodeKind::Leaf => {
                    let (index, found) = Self::leaf_position(&node, cmp)?;
                    return Ok(Some(LeafHit {
                        node,
                        node_index,
                        record_index: index,
                        found,
                    }));
                }
                NodeKind::Index => {
                    if node.num_records() == 0 {
                        return Ok(None);
                    }
                    // Greatest record with key <= target; when every key
                    // compares greater, descend leftmost so range scans
                    // still land at their lower bound.
                    let mut lo = 0usize;
                    let mut hi = node.num_records();
                    while lo < hi {
                        let mid = (lo + hi) / 2;
                        let (key, _) = node.record_parts(mid)?;
                        if cmp(key) == Ordering::Greater {
                            hi = mid;
                        } else {
                            lo = mid + 1;
                        }
                    }
                    let pick = lo.saturating_sub(1);
                    node_index = node.index_child(pick)?;
                }
                other => {
                    return Err(HfsError::Malformed(format!(
                        "{other:?} node in the search path"
                    )));
                }
            }
        }
    }

    /// Binary-search one leaf. Returns the record index and whether it is
    /// an exact match (otherwise it is the insertion point).
    fn leaf_position<F>(node: &Node, cmp: &F) -> Result<(usize, bool)>
    where
        F: Fn(&[u8]) -> Ordering,
    {
        let mut lo = 0usize;
        let mut hi = node.num_records();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let (key, _) = node.record_parts(mid)?;
            match cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok((mid, true)),
            }
        }
        Ok((lo, false))
    }

    /// A cursor over the tree's leaf records.
    pub fn cursor(&self) -> Cursor<'_, R> {
        Cursor {
            tree: self,
            node: None,
            record_index: 0,
        }
    }
}

/// Cursor over leaf records, in key order, crossing leaves via their
/// forward links.
pub struct Cursor<'t, R> {
    tree: &'t BTree<R>,
    node: Option<Node>,
    record_index: usize,
}

impl<R: Read + Seek> Cursor<'_, R> {
    /// Position at the first leaf record. Returns false for an empty tree.
    pub fn seek_first(&mut self) -> Result<bool> {
        let first = self.tree.header().first_leaf_node;
        if first == 0 {
            self.node = None;
            return Ok(false);
        }
        self.load(first)?;
        self.skip_empty_nodes()?;
        Ok(self.node.is_some())
    }

    /// Position at the first record whose key is >= the comparator's
    /// target (its lower bound). Returns whether the key matched exactly.
    pub fn seek_with<F>(&mut self, cmp: &F) -> Result<bool>
    where
        F: Fn(&[u8]) -> Ordering,
    {
        match self.tree.search_with(cmp)? {
            None => {
                self.node = None;
                Ok(false)
            }
            Some(hit) => {
                let found = hit.found;
                self.record_index = hit.record_index;
                self.node = Some(hit.node);
                self.skip_empty_nodes()?;
                Ok(found)
            }
        }
    }

    /// The record under the cursor, split into key and payload.
    pub fn current(&self) -> Result<Option<(&[u8], &[u8])>> {
        match &self.node {
            Some(node) if self.record_index < node.num_records() => {
                node.record_parts(self.record_index).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Advance one record. Returns false once the leaves are exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if self.node.is_none() {
            return Ok(false);
        }
        self.record_index += 1;
        self.skip_empty_nodes()?;
        Ok(self.node.is_some())
    }

    fn load(&mut self, node_index: u32) -> Result<()> {
        let node = self.tree.node(node_index)?;
        if node.descriptor.kind != NodeKind::Leaf {
            return Err(HfsError::Malformed(format!(
                "leaf chain reached a {:?} node",
                node.descriptor.kind
            )));
        }
        self.node = Some(node);
        self.record_index = 0;
        Ok(())
    }

    /// Follow forward links until the cursor rests on a real record.
    fn skip_empty_nodes(&mut self) -> Result<()> {
        let mut hops = 0u32;
        while let Some(node) = &self.node {
            if self.record_index < node.num_records() {
                return Ok(());
            }
            hops += 1;
            if hops > 1 << 20 {
                return Err(HfsError::Stuck("leaf chain does not terminate".into()));
            }
            let next = node.descriptor.forward_link;
            if next == 0 {
                self.node = None;
                return Ok(());
            }
            self.load(next)?;
        }
        Ok(())
    }
}
