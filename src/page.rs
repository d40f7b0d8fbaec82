use std::ops::Range;

use crate::constants::{NodeFlags, PageFlags, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::midl::Pgno;

/// Page header: pgno u64, flags u16, node count u16, overflow run length u32.
pub(crate) const PAGE_HEADER_SIZE: usize = 16;
const SLOT_SIZE: usize = 2;
const LEAF_NODE_HEADER: usize = 8;
const BRANCH_NODE_HEADER: usize = 10;

/// Largest encoded node; any two of them share a page.
pub(crate) const NODE_MAX: usize = (PAGE_SIZE - PAGE_HEADER_SIZE) / 2 - SLOT_SIZE;

/// Largest inline duplicate list before it moves to a sub-tree.
pub(crate) const DUP_INLINE_MAX: usize = 1024;

/// Pages using fewer bytes than this are merged into a neighbour.
const FILL_THRESHOLD: usize = PAGE_SIZE / 4;

pub(crate) fn write_header(buf: &mut [u8], pgno: Pgno, flags: PageFlags, count: u16, overflow: u32) {
    buf[0..8].copy_from_slice(&pgno.to_le_bytes());
    buf[8..10].copy_from_slice(&flags.bits().to_le_bytes());
    buf[10..12].copy_from_slice(&count.to_le_bytes());
    buf[12..16].copy_from_slice(&overflow.to_le_bytes());
}

fn u16_at(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn u32_at(b: &[u8], off: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&b[off..off + 4]);
    u32::from_le_bytes(raw)
}

fn u64_at(b: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(raw)
}

/// Read-only view over one encoded page.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageView<'a> {
    buf: &'a [u8],
}

/// A leaf node borrowed from a page.
///
/// For `BIGDATA` nodes `data` holds the 8-byte overflow page number and
/// `dsize` the real value length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeafRef<'a> {
    pub flags: NodeFlags,
    pub key: &'a [u8],
    pub data: &'a [u8],
    pub dsize: usize,
}

impl LeafRef<'_> {
    pub fn overflow_pgno(&self) -> Option<Pgno> {
        if self.flags.contains(NodeFlags::BIGDATA) {
            Some(u64_at(self.data, 0))
        } else {
            None
        }
    }

    pub fn to_owned(&self) -> LeafNode {
        LeafNode {
            flags: self.flags,
            key: self.key.to_vec(),
            data: self.data.to_vec(),
            dsize: self.dsize,
        }
    }
}

impl<'a> PageView<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        PageView { buf }
    }

    pub fn pgno(&self) -> Pgno {
        u64_at(self.buf, 0)
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(u16_at(self.buf, 8))
    }

    pub fn count(&self) -> usize {
        u16_at(self.buf, 10) as usize
    }

    /// Number of pages in an overflow run, 0 for other pages.
    pub fn overflow(&self) -> usize {
        u32_at(self.buf, 12) as usize
    }

    pub fn is_leaf(&self) -> bool {
        self.flags().contains(PageFlags::LEAF)
    }

    pub fn is_branch(&self) -> bool {
        self.flags().contains(PageFlags::BRANCH)
    }

    /// Check the page holds tree nodes and its slot array is in bounds.
    pub fn tree_page(self, pgno: Pgno) -> Result<Self> {
        if self.pgno() != pgno {
            return Err(Error::corrupted(pgno, "page number mismatch"));
        }
        if self.is_leaf() == self.is_branch() {
            return Err(Error::corrupted(pgno, "not a tree page"));
        }
        if PAGE_HEADER_SIZE + self.count() * SLOT_SIZE > self.buf.len() {
            return Err(Error::corrupted(pgno, "node count out of range"));
        }
        Ok(self)
    }

    fn node_offset(&self, i: usize) -> Result<usize> {
        if i >= self.count() {
            return Err(Error::corrupted(self.pgno(), "node index out of range"));
        }
        Ok(u16_at(self.buf, PAGE_HEADER_SIZE + i * SLOT_SIZE) as usize)
    }

    fn span(&self, off: usize, len: usize) -> Result<&'a [u8]> {
        self.buf
            .get(off..off + len)
            .ok_or_else(|| Error::corrupted(self.pgno(), "node overruns page"))
    }

    pub fn leaf(&self, i: usize) -> Result<LeafRef<'a>> {
        let off = self.node_offset(i)?;
        let head = self.span(off, LEAF_NODE_HEADER)?;
        let flags = NodeFlags::from_bits_truncate(u16_at(head, 0));
        let ksize = u16_at(head, 2) as usize;
        let dsize = u32_at(head, 4) as usize;
        let stored = if flags.contains(NodeFlags::BIGDATA) {
            8
        } else {
            dsize
        };
        let key = self.span(off + LEAF_NODE_HEADER, ksize)?;
        let data = self.span(off + LEAF_NODE_HEADER + ksize, stored)?;
        Ok(LeafRef {
            flags,
            key,
            data,
            dsize,
        })
    }

    pub fn leaf_key(&self, i: usize) -> Result<&'a [u8]> {
        Ok(self.leaf(i)?.key)
    }

    /// Key and child page of branch node `i`. The key of node 0 is ignored.
    pub fn branch(&self, i: usize) -> Result<(&'a [u8], Pgno)> {
        let off = self.node_offset(i)?;
        let head = self.span(off, BRANCH_NODE_HEADER)?;
        let child = u64_at(head, 0);
        let ksize = u16_at(head, 8) as usize;
        let key = self.span(off + BRANCH_NODE_HEADER, ksize)?;
        Ok((key, child))
    }

    pub fn branch_child(&self, i: usize) -> Result<Pgno> {
        Ok(self.branch(i)?.1)
    }

    /// Bytes used by the header, slot array and nodes.
    pub fn fill(&self) -> Result<usize> {
        let mut used = PAGE_HEADER_SIZE + self.count() * SLOT_SIZE;
        for i in 0..self.count() {
            used += if self.is_leaf() {
                let node = self.leaf(i)?;
                LEAF_NODE_HEADER + node.key.len() + node.data.len()
            } else {
                BRANCH_NODE_HEADER + self.branch(i)?.0.len()
            };
        }
        Ok(used)
    }

    pub fn leaf_nodes(&self) -> Result<Vec<LeafNode>> {
        (0..self.count()).map(|i| Ok(self.leaf(i)?.to_owned())).collect()
    }

    pub fn branch_nodes(&self) -> Result<Vec<BranchNode>> {
        (0..self.count())
            .map(|i| {
                let (key, child) = self.branch(i)?;
                Ok(BranchNode {
                    key: if i == 0 { Vec::new() } else { key.to_vec() },
                    child,
                })
            })
            .collect()
    }
}

/// Owned leaf node, the unit of leaf page rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeafNode {
    pub flags: NodeFlags,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub dsize: usize,
}

impl LeafNode {
    pub fn new(flags: NodeFlags, key: &[u8], data: &[u8]) -> Self {
        LeafNode {
            flags,
            key: key.to_vec(),
            data: data.to_vec(),
            dsize: data.len(),
        }
    }

    /// Node whose value lives in the overflow run starting at `pgno`.
    pub fn big(key: &[u8], pgno: Pgno, len: usize) -> Self {
        LeafNode {
            flags: NodeFlags::BIGDATA,
            key: key.to_vec(),
            data: pgno.to_le_bytes().to_vec(),
            dsize: len,
        }
    }

    pub fn overflow_pgno(&self) -> Option<Pgno> {
        if self.flags.contains(NodeFlags::BIGDATA) {
            Some(u64_at(&self.data, 0))
        } else {
            None
        }
    }

    pub fn encoded_size(&self) -> usize {
        LEAF_NODE_HEADER + self.key.len() + self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BranchNode {
    pub key: Vec<u8>,
    pub child: Pgno,
}

impl BranchNode {
    pub fn encoded_size(&self) -> usize {
        BRANCH_NODE_HEADER + self.key.len()
    }
}

/// Whether a key/value pair can be stored inside a leaf node.
pub(crate) fn fits_inline(key_len: usize, data_len: usize) -> bool {
    LEAF_NODE_HEADER + key_len + data_len <= NODE_MAX
}

fn blank_page() -> Box<[u8]> {
    vec![0u8; PAGE_SIZE].into_boxed_slice()
}

fn put_slot(buf: &mut [u8], i: usize, off: usize) {
    let at = PAGE_HEADER_SIZE + i * SLOT_SIZE;
    buf[at..at + SLOT_SIZE].copy_from_slice(&(off as u16).to_le_bytes());
}

pub(crate) fn encode_leaf(pgno: Pgno, nodes: &[LeafNode]) -> Box<[u8]> {
    let mut buf = blank_page();
    write_header(&mut buf, pgno, PageFlags::LEAF, nodes.len() as u16, 0);
    let mut off = PAGE_HEADER_SIZE + nodes.len() * SLOT_SIZE;
    for (i, node) in nodes.iter().enumerate() {
        put_slot(&mut buf, i, off);
        buf[off..off + 2].copy_from_slice(&node.flags.bits().to_le_bytes());
        buf[off + 2..off + 4].copy_from_slice(&(node.key.len() as u16).to_le_bytes());
        buf[off + 4..off + 8].copy_from_slice(&(node.dsize as u32).to_le_bytes());
        let k = off + LEAF_NODE_HEADER;
        buf[k..k + node.key.len()].copy_from_slice(&node.key);
        let d = k + node.key.len();
        buf[d..d + node.data.len()].copy_from_slice(&node.data);
        off = d + node.data.len();
    }
    buf
}

pub(crate) fn encode_branch(pgno: Pgno, nodes: &[BranchNode]) -> Box<[u8]> {
    let mut buf = blank_page();
    write_header(&mut buf, pgno, PageFlags::BRANCH, nodes.len() as u16, 0);
    let mut off = PAGE_HEADER_SIZE + nodes.len() * SLOT_SIZE;
    for (i, node) in nodes.iter().enumerate() {
        let key: &[u8] = if i == 0 { &[] } else { &node.key };
        put_slot(&mut buf, i, off);
        buf[off..off + 8].copy_from_slice(&node.child.to_le_bytes());
        buf[off + 8..off + 10].copy_from_slice(&(key.len() as u16).to_le_bytes());
        let k = off + BRANCH_NODE_HEADER;
        buf[k..k + key.len()].copy_from_slice(key);
        off = k + key.len();
    }
    buf
}

/// Bytes a page holding nodes of the given encoded sizes would use.
pub(crate) fn page_fill(sizes: impl Iterator<Item = usize>) -> usize {
    PAGE_HEADER_SIZE + sizes.map(|s| s + SLOT_SIZE).sum::<usize>()
}

pub(crate) fn is_underfull(fill: usize) -> bool {
    fill < FILL_THRESHOLD
}

/// Partition nodes into page-sized runs, halving by bytes until each fits.
pub(crate) fn split_ranges(sizes: &[usize]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    split_into(sizes, 0..sizes.len(), &mut out);
    out
}

fn split_into(sizes: &[usize], range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let fill = page_fill(sizes[range.clone()].iter().copied());
    if fill <= PAGE_SIZE || range.len() <= 1 {
        out.push(range);
        return;
    }
    let half = (fill - PAGE_HEADER_SIZE) / 2;
    let mut acc = 0;
    let mut mid = range.end - 1;
    for i in range.clone() {
        acc += sizes[i] + SLOT_SIZE;
        if acc >= half {
            mid = i + 1;
            break;
        }
    }
    let mid = mid.clamp(range.start + 1, range.end - 1);
    split_into(sizes, range.start..mid, out);
    split_into(sizes, mid..range.end, out);
}

/// Pages needed for an overflow run holding `len` bytes.
pub(crate) fn overflow_pages(len: usize) -> usize {
    (PAGE_HEADER_SIZE + len).div_ceil(PAGE_SIZE)
}

pub(crate) fn encode_overflow(pgno: Pgno, pages: usize, data: &[u8]) -> Box<[u8]> {
    let mut buf = vec![0u8; pages * PAGE_SIZE].into_boxed_slice();
    write_header(&mut buf, pgno, PageFlags::OVERFLOW, 0, pages as u32);
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + data.len()].copy_from_slice(data);
    buf
}

/// Split an inline duplicate list: u16 count, then u16 length + bytes per value.
pub(crate) fn decode_dups(data: &[u8]) -> Result<Vec<&[u8]>> {
    let bad = || Error::Corrupted("malformed inline duplicate list".into());
    let count = u16::from_le_bytes([*data.first().ok_or_else(bad)?, *data.get(1).ok_or_else(bad)?]);
    let mut values = Vec::with_capacity(count as usize);
    let mut off = 2;
    for _ in 0..count {
        let len = data.get(off..off + 2).ok_or_else(bad)?;
        let len = u16::from_le_bytes([len[0], len[1]]) as usize;
        values.push(data.get(off + 2..off + 2 + len).ok_or_else(bad)?);
        off += 2 + len;
    }
    if off != data.len() {
        return Err(bad());
    }
    Ok(values)
}

pub(crate) fn dups_size<T: AsRef<[u8]>>(values: &[T]) -> usize {
    2 + values.iter().map(|v| 2 + v.as_ref().len()).sum::<usize>()
}

pub(crate) fn encode_dups<T: AsRef<[u8]>>(values: &[T]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(dups_size(values));
    buf.extend_from_slice(&(values.len() as u16).to_le_bytes());
    for v in values {
        let v = v.as_ref();
        buf.extend_from_slice(&(v.len() as u16).to_le_bytes());
        buf.extend_from_slice(v);
    }
    buf
}
