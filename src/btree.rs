//! Copy-on-write B+tree algorithms.
//!
//! Every tree (a database, the free-page database, or the duplicates of one
//! key) is addressed by a [`DbRecord`]. Writes decode the pages on the path to
//! the target leaf into owned nodes, edit them, and write the result to pages
//! owned by the current write transaction; untouched pages stay shared with
//! older snapshots.

use std::cmp::Ordering;

use crate::constants::{
    DbFlags, NodeFlags, WriteFlags, MAIN_DBI, MAX_KEY_SIZE, PAGE_SIZE, P_INVALID,
};
use crate::database::{DupLayout, KeyCmp, TreeLayout};
use crate::error::{Error, Result};
use crate::meta::DbRecord;
use crate::midl::{IdList, Pgno};
use crate::page::{
    decode_dups, dups_size, encode_branch, encode_dups, encode_leaf, encode_overflow, fits_inline,
    is_underfull, overflow_pages, page_fill, split_ranges, BranchNode, LeafNode, LeafRef,
    PageView, DUP_INLINE_MAX, PAGE_HEADER_SIZE,
};
use crate::transaction::Transaction;
use crate::types::Stat;

/// What a leaf edit does with the node stored under its key.
pub(crate) enum Edit {
    Keep,
    Set(LeafNode),
    Remove,
}

/// Result of rewriting one page: the pages that now stand in its place.
enum Update {
    Unchanged,
    Replaced(Vec<BranchNode>),
}

/// Index of the first node not less than `key`, and whether it matched.
pub(crate) fn leaf_search(page: &PageView<'_>, cmp: KeyCmp, key: &[u8]) -> Result<(usize, bool)> {
    let (mut lo, mut hi) = (0, page.count());
    while lo < hi {
        let mid = (lo + hi) / 2;
        match cmp.compare(page.leaf_key(mid)?, key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Equal => return Ok((mid, true)),
            Ordering::Greater => hi = mid,
        }
    }
    Ok((lo, false))
}

/// Index of the branch node whose subtree can hold `key`.
pub(crate) fn branch_search(page: &PageView<'_>, cmp: KeyCmp, key: &[u8]) -> Result<usize> {
    let (mut lo, mut hi) = (1, page.count());
    while lo < hi {
        let mid = (lo + hi) / 2;
        if cmp.compare(page.branch(mid)?.0, key) == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo - 1)
}

/// Root-to-leaf path of page positions within one tree.
#[derive(Debug, Clone)]
pub(crate) struct TreeCursor {
    root: Pgno,
    stack: Vec<(Pgno, usize)>,
}

impl TreeCursor {
    pub fn new(root: Pgno) -> Self {
        TreeCursor {
            root,
            stack: Vec::new(),
        }
    }

    fn descend(&mut self, txn: &Transaction<'_>, mut pgno: Pgno, last: bool) -> Result<()> {
        loop {
            let page = txn.page(pgno)?;
            let count = page.count();
            if count == 0 {
                return Err(Error::corrupted(pgno, "empty tree page"));
            }
            let idx = if last { count - 1 } else { 0 };
            self.stack.push((pgno, idx));
            if page.is_leaf() {
                return Ok(());
            }
            pgno = page.branch_child(idx)?;
        }
    }

    pub fn first(&mut self, txn: &Transaction<'_>) -> Result<bool> {
        self.stack.clear();
        if self.root == P_INVALID {
            return Ok(false);
        }
        self.descend(txn, self.root, false)?;
        Ok(true)
    }

    pub fn last(&mut self, txn: &Transaction<'_>) -> Result<bool> {
        self.stack.clear();
        if self.root == P_INVALID {
            return Ok(false);
        }
        self.descend(txn, self.root, true)?;
        Ok(true)
    }

    /// Move to the adjacent leaf node. The position is kept when there is none.
    pub fn step(&mut self, txn: &Transaction<'_>, forward: bool) -> Result<bool> {
        let mut depth = self.stack.len();
        while depth > 0 {
            let (pgno, idx) = self.stack[depth - 1];
            let page = txn.page(pgno)?;
            let target = if forward {
                (idx + 1 < page.count()).then_some(idx + 1)
            } else {
                idx.checked_sub(1)
            };
            if let Some(next) = target {
                self.stack.truncate(depth);
                self.stack[depth - 1].1 = next;
                if page.is_branch() {
                    let child = page.branch_child(next)?;
                    self.descend(txn, child, !forward)?;
                }
                return Ok(true);
            }
            depth -= 1;
        }
        Ok(false)
    }

    /// Position at the first key not less than `key`.
    ///
    /// Returns `Some(exact)` when positioned, `None` when every key is smaller.
    pub fn seek(&mut self, txn: &Transaction<'_>, cmp: KeyCmp, key: &[u8]) -> Result<Option<bool>> {
        self.stack.clear();
        if self.root == P_INVALID {
            return Ok(None);
        }
        let mut pgno = self.root;
        loop {
            let page = txn.page(pgno)?;
            if page.count() == 0 {
                return Err(Error::corrupted(pgno, "empty tree page"));
            }
            if page.is_leaf() {
                let (idx, exact) = leaf_search(&page, cmp, key)?;
                if idx < page.count() {
                    self.stack.push((pgno, idx));
                    return Ok(Some(exact));
                }
                // Past this leaf's last key: the answer starts the next leaf.
                self.stack.push((pgno, idx - 1));
                if self.step(txn, true)? {
                    return Ok(Some(false));
                }
                self.stack.clear();
                return Ok(None);
            }
            let idx = branch_search(&page, cmp, key)?;
            self.stack.push((pgno, idx));
            pgno = page.branch_child(idx)?;
        }
    }

    pub fn leaf<'t>(&self, txn: &'t Transaction<'_>) -> Result<LeafRef<'t>> {
        let &(pgno, idx) = self.stack.last().ok_or(Error::CursorNotPositioned)?;
        txn.page(pgno)?.leaf(idx)
    }
}

/// The values stored under one key of a duplicate-sorted database.
pub(crate) enum DupSet<'t> {
    Single(&'t [u8]),
    Inline(Vec<&'t [u8]>),
    Tree(DbRecord),
}

impl DupSet<'_> {
    pub fn count(&self) -> usize {
        match self {
            DupSet::Single(_) => 1,
            DupSet::Inline(values) => values.len(),
            DupSet::Tree(sub) => sub.entries as usize,
        }
    }
}

impl<'env> Transaction<'env> {
    /// The value bytes of a leaf node, following overflow pages.
    pub(crate) fn node_value<'t>(&'t self, node: &LeafRef<'t>) -> Result<&'t [u8]> {
        match node.overflow_pgno() {
            Some(pgno) => self.overflow_data(pgno, node.dsize),
            None => Ok(node.data),
        }
    }

    pub(crate) fn dup_set<'t>(&'t self, node: &LeafRef<'t>) -> Result<DupSet<'t>> {
        if node.flags.contains(NodeFlags::SUBDATA) {
            Ok(DupSet::Tree(DbRecord::decode(node.data)?))
        } else if node.flags.contains(NodeFlags::DUPDATA) {
            Ok(DupSet::Inline(decode_dups(node.data)?))
        } else {
            Ok(DupSet::Single(self.node_value(node)?))
        }
    }

    /// Every value stored under a duplicate-sorted node, in order.
    pub(crate) fn dup_values<'t>(&'t self, node: &LeafRef<'t>) -> Result<Vec<&'t [u8]>> {
        match self.dup_set(node)? {
            DupSet::Single(value) => Ok(vec![value]),
            DupSet::Inline(values) => Ok(values),
            DupSet::Tree(sub) => {
                let mut values = Vec::with_capacity(sub.entries as usize);
                let mut tc = TreeCursor::new(sub.root);
                let mut more = tc.first(self)?;
                while more {
                    values.push(tc.leaf(self)?.key);
                    more = tc.step(self, true)?;
                }
                Ok(values)
            }
        }
    }

    /// First or last key of a tree.
    pub(crate) fn tree_edge_key<'t>(&'t self, rec: &DbRecord, last: bool) -> Result<Option<&'t [u8]>> {
        let mut tc = TreeCursor::new(rec.root);
        let found = if last { tc.last(self)? } else { tc.first(self)? };
        if !found {
            return Ok(None);
        }
        Ok(Some(tc.leaf(self)?.key))
    }

    /// Value stored under `key`; the first duplicate for duplicate-sorted trees.
    pub(crate) fn tree_get<'t>(&'t self, rec: &DbRecord, key: &[u8]) -> Result<Option<&'t [u8]>> {
        let layout = TreeLayout::from_flags(rec.flags);
        let mut tc = TreeCursor::new(rec.root);
        if tc.seek(self, layout.key_cmp, key)? != Some(true) {
            return Ok(None);
        }
        let node = tc.leaf(self)?;
        if layout.dup.is_none() {
            return self.node_value(&node).map(Some);
        }
        match self.dup_set(&node)? {
            DupSet::Single(value) => Ok(Some(value)),
            DupSet::Inline(values) => Ok(values.first().copied()),
            DupSet::Tree(sub) => self.tree_edge_key(&sub, false),
        }
    }

    /// Record of a named database in the catalog held by the main database.
    pub(crate) fn catalog_get(&self, name: &str) -> Result<Option<DbRecord>> {
        let main = self.record(MAIN_DBI as usize)?;
        let mut tc = TreeCursor::new(main.root);
        if tc.seek(self, KeyCmp::for_keys(main.flags), name.as_bytes())? != Some(true) {
            return Ok(None);
        }
        let node = tc.leaf(self)?;
        if !node.flags.contains(NodeFlags::SUBDATA) {
            return Err(Error::Incompatible);
        }
        Ok(Some(DbRecord::decode(node.data)?))
    }

    pub(crate) fn catalog_put(&mut self, main: &mut DbRecord, name: &str, record: &DbRecord) -> Result<()> {
        let cmp = KeyCmp::for_keys(main.flags);
        let key = name.as_bytes();
        let mut added = false;
        self.tree_update(main, cmp, key, |_, existing| match existing {
            Some(node) if !node.flags.contains(NodeFlags::SUBDATA) => Err(Error::Incompatible),
            found => {
                added = found.is_none();
                Ok(Edit::Set(LeafNode::new(NodeFlags::SUBDATA, key, &record.encode())))
            }
        })?;
        if added {
            main.entries += 1;
        }
        Ok(())
    }

    /// Free-page record with the smallest txn id not below `start`.
    pub(crate) fn free_record_from(&self, free: &DbRecord, start: u64) -> Result<Option<(u64, IdList)>> {
        let mut tc = TreeCursor::new(free.root);
        if tc.seek(self, KeyCmp::Integer, &start.to_ne_bytes())?.is_none() {
            return Ok(None);
        }
        let node = tc.leaf(self)?;
        let key: [u8; 8] = node
            .key
            .try_into()
            .map_err(|_| Error::Corrupted("free list key is not a txn id".into()))?;
        let ids = IdList::decode(self.node_value(&node)?)?;
        Ok(Some((u64::from_ne_bytes(key), ids)))
    }

    /// Total number of pages listed in the free-page database.
    pub(crate) fn free_page_total(&self, free: &DbRecord) -> Result<usize> {
        let mut total = 0;
        let mut tc = TreeCursor::new(free.root);
        let mut more = tc.first(self)?;
        while more {
            let node = tc.leaf(self)?;
            total += IdList::decode(self.node_value(&node)?)?.len();
            more = tc.step(self, true)?;
        }
        Ok(total)
    }

    pub(crate) fn tree_put(&mut self, rec: &mut DbRecord, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        let layout = TreeLayout::from_flags(rec.flags);
        if key.is_empty() || key.len() > MAX_KEY_SIZE || data.len() > u32::MAX as usize {
            return Err(Error::BadValSize);
        }
        layout.key_cmp.check(key)?;
        if flags.contains(WriteFlags::APPEND) {
            if let Some(last) = self.tree_edge_key(rec, true)? {
                let ord = layout.key_cmp.compare(key, last);
                if ord == Ordering::Less || (ord == Ordering::Equal && layout.dup.is_none()) {
                    return Err(Error::KeyExist);
                }
            }
        }
        match layout.dup {
            None => self.put_single(rec, layout.key_cmp, key, data, flags),
            Some(dup) => {
                if data.len() > MAX_KEY_SIZE {
                    return Err(Error::BadValSize);
                }
                dup.cmp.check(data)?;
                self.put_dup(rec, layout.key_cmp, dup, key, data, flags)
            }
        }
    }

    fn put_single(&mut self, rec: &mut DbRecord, cmp: KeyCmp, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        let mut added = false;
        self.tree_update(rec, cmp, key, |txn, existing| match existing {
            Some(node) if node.flags.contains(NodeFlags::SUBDATA) => Err(Error::Incompatible),
            Some(_) if flags.contains(WriteFlags::NOOVERWRITE) => Err(Error::KeyExist),
            Some(node) => Ok(Edit::Set(txn.value_node(key, data, Some(node))?)),
            None => {
                added = true;
                Ok(Edit::Set(txn.value_node(key, data, None)?))
            }
        })?;
        if added {
            rec.entries += 1;
        }
        Ok(())
    }

    /// Leaf node for a plain value, moving large values to an overflow run.
    fn value_node(&mut self, key: &[u8], data: &[u8], old: Option<&LeafNode>) -> Result<LeafNode> {
        if fits_inline(key.len(), data.len()) {
            return Ok(LeafNode::new(NodeFlags::empty(), key, data));
        }
        if let Some(pgno) = old.and_then(LeafNode::overflow_pgno) {
            if let Some(buf) = self.dirty_buf_mut(pgno) {
                if buf.len() - PAGE_HEADER_SIZE >= data.len() {
                    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + data.len()].copy_from_slice(data);
                    return Ok(LeafNode::big(key, pgno, data.len()));
                }
            }
        }
        let mut pages = overflow_pages(data.len());
        if self.is_saving() {
            // Room for the free list to grow while it is being written.
            pages += pages / 64 + 1;
        }
        let pgno = self.alloc(pages)?;
        self.put_dirty(pgno, encode_overflow(pgno, pages, data));
        Ok(LeafNode::big(key, pgno, data.len()))
    }

    fn put_dup(
        &mut self,
        rec: &mut DbRecord,
        cmp: KeyCmp,
        dup: DupLayout,
        key: &[u8],
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<()> {
        let mut added = false;
        self.tree_update(rec, cmp, key, |txn, existing| {
            let node = match existing {
                None => {
                    added = true;
                    return Ok(Edit::Set(LeafNode::new(NodeFlags::empty(), key, data)));
                }
                Some(node) => node,
            };
            if flags.contains(WriteFlags::NOOVERWRITE) {
                return Err(Error::KeyExist);
            }
            if node.flags.contains(NodeFlags::SUBDATA) {
                let mut sub = DbRecord::decode(&node.data)?;
                if let Some(first) = txn.tree_edge_key(&sub, false)? {
                    if dup.fixed && first.len() != data.len() {
                        return Err(Error::BadValSize);
                    }
                }
                if flags.contains(WriteFlags::APPENDDUP) {
                    if let Some(last) = txn.tree_edge_key(&sub, true)? {
                        if dup.cmp.compare(data, last) != Ordering::Greater {
                            return Err(Error::KeyExist);
                        }
                    }
                }
                let mut inserted = false;
                txn.tree_update(&mut sub, dup.cmp, data, |_, found| match found {
                    Some(_) if flags.contains(WriteFlags::NODUPDATA) => Err(Error::KeyExist),
                    Some(_) => Ok(Edit::Keep),
                    None => {
                        inserted = true;
                        Ok(Edit::Set(LeafNode::new(NodeFlags::empty(), data, &[])))
                    }
                })?;
                if !inserted {
                    return Ok(Edit::Keep);
                }
                sub.entries += 1;
                added = true;
                return Ok(Edit::Set(LeafNode::new(NodeFlags::SUBDATA, key, &sub.encode())));
            }

            let mut values: Vec<Vec<u8>> = if node.flags.contains(NodeFlags::DUPDATA) {
                decode_dups(&node.data)?.into_iter().map(<[u8]>::to_vec).collect()
            } else {
                vec![node.data.clone()]
            };
            if dup.fixed && values.first().is_some_and(|v| v.len() != data.len()) {
                return Err(Error::BadValSize);
            }
            let pos = match values.binary_search_by(|v| dup.cmp.compare(v, data)) {
                Ok(_) if flags.contains(WriteFlags::NODUPDATA) => return Err(Error::KeyExist),
                Ok(_) => return Ok(Edit::Keep),
                Err(pos) => pos,
            };
            if flags.contains(WriteFlags::APPENDDUP) && pos != values.len() {
                return Err(Error::KeyExist);
            }
            values.insert(pos, data.to_vec());
            added = true;
            if dups_size(&values) <= DUP_INLINE_MAX {
                return Ok(Edit::Set(LeafNode::new(NodeFlags::DUPDATA, key, &encode_dups(&values))));
            }
            let sub = txn.build_dup_tree(dup.cmp, &values)?;
            Ok(Edit::Set(LeafNode::new(NodeFlags::SUBDATA, key, &sub.encode())))
        })?;
        if added {
            rec.entries += 1;
        }
        Ok(())
    }

    fn build_dup_tree(&mut self, cmp: KeyCmp, values: &[Vec<u8>]) -> Result<DbRecord> {
        let mut sub = DbRecord::empty(DbFlags::empty());
        for value in values {
            self.tree_update(&mut sub, cmp, value, |_, _| {
                Ok(Edit::Set(LeafNode::new(NodeFlags::empty(), value, &[])))
            })?;
        }
        sub.entries = values.len() as u64;
        Ok(sub)
    }

    /// Delete `key`, or with `data` a single duplicate of it. Returns whether anything was removed.
    ///
    /// Catalog entries of named databases can only be removed when `catalog` is set.
    pub(crate) fn tree_del(&mut self, rec: &mut DbRecord, key: &[u8], data: Option<&[u8]>, catalog: bool) -> Result<bool> {
        let layout = TreeLayout::from_flags(rec.flags);
        let mut removed = 0u64;
        match (layout.dup, data) {
            (Some(dup), Some(value)) => {
                self.tree_update(rec, layout.key_cmp, key, |txn, existing| {
                    let Some(node) = existing else {
                        return Ok(Edit::Keep);
                    };
                    if node.flags.contains(NodeFlags::SUBDATA) {
                        let mut sub = DbRecord::decode(&node.data)?;
                        let mut hit = false;
                        txn.tree_update(&mut sub, dup.cmp, value, |_, found| {
                            hit = found.is_some();
                            Ok(if hit { Edit::Remove } else { Edit::Keep })
                        })?;
                        if !hit {
                            return Ok(Edit::Keep);
                        }
                        removed = 1;
                        sub.entries = sub.entries.saturating_sub(1);
                        if sub.entries > 1 {
                            return Ok(Edit::Set(LeafNode::new(NodeFlags::SUBDATA, key, &sub.encode())));
                        }
                        // A single survivor goes back to a plain node.
                        let rest = txn.tree_edge_key(&sub, false)?.map(<[u8]>::to_vec);
                        txn.tree_free(&sub)?;
                        return Ok(match rest {
                            Some(v) => Edit::Set(LeafNode::new(NodeFlags::empty(), key, &v)),
                            None => Edit::Remove,
                        });
                    }
                    let mut values: Vec<&[u8]> = if node.flags.contains(NodeFlags::DUPDATA) {
                        decode_dups(&node.data)?
                    } else {
                        vec![&node.data[..]]
                    };
                    let Some(pos) = values
                        .iter()
                        .position(|v| dup.cmp.compare(v, value) == Ordering::Equal)
                    else {
                        return Ok(Edit::Keep);
                    };
                    removed = 1;
                    values.remove(pos);
                    Ok(match values.as_slice() {
                        [] => Edit::Remove,
                        [only] => Edit::Set(LeafNode::new(NodeFlags::empty(), key, only)),
                        rest => Edit::Set(LeafNode::new(NodeFlags::DUPDATA, key, &encode_dups(rest))),
                    })
                })?;
            }
            (dup, _) => {
                self.tree_update(rec, layout.key_cmp, key, |txn, existing| {
                    let Some(node) = existing else {
                        return Ok(Edit::Keep);
                    };
                    removed = if node.flags.contains(NodeFlags::SUBDATA) {
                        let sub = DbRecord::decode(&node.data)?;
                        if dup.is_some() {
                            txn.tree_free(&sub)?;
                            sub.entries
                        } else if catalog {
                            1
                        } else {
                            return Err(Error::Incompatible);
                        }
                    } else if node.flags.contains(NodeFlags::DUPDATA) {
                        decode_dups(&node.data)?.len() as u64
                    } else {
                        1
                    };
                    Ok(Edit::Remove)
                })?;
            }
        }
        rec.entries = rec.entries.saturating_sub(removed);
        Ok(removed > 0)
    }

    /// Apply `edit` to the leaf slot of `key`, rewriting the path to the root.
    /// Returns whether the tree changed.
    pub(crate) fn tree_update<F>(&mut self, rec: &mut DbRecord, cmp: KeyCmp, key: &[u8], edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Self, Option<&LeafNode>) -> Result<Edit>,
    {
        if rec.root == P_INVALID {
            return match edit(self, None)? {
                Edit::Set(node) => {
                    let pgno = self.alloc(1)?;
                    self.put_dirty(pgno, encode_leaf(pgno, &[node]));
                    rec.root = pgno;
                    rec.depth = 1;
                    Ok(true)
                }
                Edit::Keep | Edit::Remove => Ok(false),
            };
        }
        match self.update_page(rec.root, cmp, key, edit)? {
            Update::Unchanged => Ok(false),
            Update::Replaced(pages) => {
                self.replace_root(rec, pages)?;
                Ok(true)
            }
        }
    }

    fn update_page<F>(&mut self, pgno: Pgno, cmp: KeyCmp, key: &[u8], edit: F) -> Result<Update>
    where
        F: FnOnce(&mut Self, Option<&LeafNode>) -> Result<Edit>,
    {
        let page = self.page(pgno)?;
        if page.is_branch() {
            let idx = branch_search(&page, cmp, key)?;
            let child = page.branch_child(idx)?;
            let mut nodes = page.branch_nodes()?;
            return match self.update_page(child, cmp, key, edit)? {
                Update::Unchanged => Ok(Update::Unchanged),
                Update::Replaced(pages) => {
                    self.splice_child(&mut nodes, idx, pages)?;
                    Ok(Update::Replaced(self.write_branches(Some(pgno), nodes)?))
                }
            };
        }

        let (idx, exact) = leaf_search(&page, cmp, key)?;
        let mut nodes = page.leaf_nodes()?;
        let action = edit(self, if exact { Some(&nodes[idx]) } else { None })?;
        match action {
            Edit::Keep => return Ok(Update::Unchanged),
            Edit::Set(node) if exact => {
                let old = std::mem::replace(&mut nodes[idx], node);
                if old.overflow_pgno() != nodes[idx].overflow_pgno() {
                    self.release_overflow(&old)?;
                }
            }
            Edit::Set(node) => nodes.insert(idx, node),
            Edit::Remove if exact => {
                let old = nodes.remove(idx);
                self.release_overflow(&old)?;
            }
            Edit::Remove => return Ok(Update::Unchanged),
        }
        Ok(Update::Replaced(self.write_leaves(pgno, nodes)?))
    }

    fn release_overflow(&mut self, node: &LeafNode) -> Result<()> {
        if let Some(pgno) = node.overflow_pgno() {
            let pages = self.overflow_run(pgno)?;
            self.free_page(pgno, pages);
        }
        Ok(())
    }

    /// Put the pages that replaced child `idx` into its parent's node list.
    fn splice_child(&mut self, nodes: &mut Vec<BranchNode>, idx: usize, mut pages: Vec<BranchNode>) -> Result<()> {
        if pages.is_empty() {
            nodes.remove(idx);
            return Ok(());
        }
        let single = pages.len() == 1;
        pages[0].key = std::mem::take(&mut nodes[idx].key);
        nodes.splice(idx..=idx, pages);
        if single && nodes.len() > 1 {
            self.merge_if_underfull(nodes, idx)?;
        }
        Ok(())
    }

    fn merge_if_underfull(&mut self, nodes: &mut Vec<BranchNode>, idx: usize) -> Result<()> {
        let fill = self.page(nodes[idx].child)?.fill()?;
        if !is_underfull(fill) {
            return Ok(());
        }
        let (left, right) = if idx > 0 { (idx - 1, idx) } else { (idx, idx + 1) };
        let separator = nodes[right].key.clone();
        if let Some(pgno) = self.merge_pages(nodes[left].child, nodes[right].child, &separator)? {
            nodes[left].child = pgno;
            nodes.remove(right);
        }
        Ok(())
    }

    /// Combine two sibling pages into the left one if the result fits a page.
    fn merge_pages(&mut self, left: Pgno, right: Pgno, separator: &[u8]) -> Result<Option<Pgno>> {
        let lview = self.page(left)?;
        let rview = self.page(right)?;
        if lview.is_leaf() != rview.is_leaf() {
            return Err(Error::corrupted(right, "siblings at different levels"));
        }
        if lview.is_leaf() {
            let mut merged = lview.leaf_nodes()?;
            merged.extend(rview.leaf_nodes()?);
            if page_fill(merged.iter().map(LeafNode::encoded_size)) > PAGE_SIZE {
                return Ok(None);
            }
            let pgno = self.cow_pgno(left)?;
            self.put_dirty(pgno, encode_leaf(pgno, &merged));
            self.free_page(right, 1);
            return Ok(Some(pgno));
        }
        let mut merged = lview.branch_nodes()?;
        let mut tail = rview.branch_nodes()?;
        match tail.first_mut() {
            Some(first) => first.key = separator.to_vec(),
            None => return Err(Error::corrupted(right, "empty tree page")),
        }
        merged.extend(tail);
        if page_fill(merged.iter().map(BranchNode::encoded_size)) > PAGE_SIZE {
            return Ok(None);
        }
        let pgno = self.cow_pgno(left)?;
        self.put_dirty(pgno, encode_branch(pgno, &merged));
        self.free_page(right, 1);
        Ok(Some(pgno))
    }

    fn write_leaves(&mut self, old: Pgno, nodes: Vec<LeafNode>) -> Result<Vec<BranchNode>> {
        if nodes.is_empty() {
            self.free_page(old, 1);
            return Ok(Vec::new());
        }
        let sizes: Vec<usize> = nodes.iter().map(LeafNode::encoded_size).collect();
        let mut out = Vec::new();
        for (i, range) in split_ranges(&sizes).into_iter().enumerate() {
            let pgno = if i == 0 { self.cow_pgno(old)? } else { self.alloc(1)? };
            let chunk = &nodes[range];
            self.put_dirty(pgno, encode_leaf(pgno, chunk));
            out.push(BranchNode {
                key: chunk[0].key.clone(),
                child: pgno,
            });
        }
        Ok(out)
    }

    fn write_branches(&mut self, old: Option<Pgno>, nodes: Vec<BranchNode>) -> Result<Vec<BranchNode>> {
        if nodes.is_empty() {
            if let Some(pgno) = old {
                self.free_page(pgno, 1);
            }
            return Ok(Vec::new());
        }
        let sizes: Vec<usize> = nodes.iter().map(BranchNode::encoded_size).collect();
        let mut out = Vec::new();
        for (i, range) in split_ranges(&sizes).into_iter().enumerate() {
            let pgno = match (i, old) {
                (0, Some(old)) => self.cow_pgno(old)?,
                _ => self.alloc(1)?,
            };
            let chunk = &nodes[range];
            self.put_dirty(pgno, encode_branch(pgno, chunk));
            out.push(BranchNode {
                key: chunk[0].key.clone(),
                child: pgno,
            });
        }
        Ok(out)
    }

    /// Install the pages that replaced the root, growing or shrinking the tree.
    fn replace_root(&mut self, rec: &mut DbRecord, mut pages: Vec<BranchNode>) -> Result<()> {
        if pages.is_empty() {
            rec.root = P_INVALID;
            rec.depth = 0;
            return Ok(());
        }
        while pages.len() > 1 {
            pages = self.write_branches(None, pages)?;
            rec.depth += 1;
        }
        rec.root = pages[0].child;
        loop {
            let only_child = {
                let page = self.page(rec.root)?;
                if page.is_branch() && page.count() == 1 {
                    Some(page.branch_child(0)?)
                } else {
                    None
                }
            };
            let Some(child) = only_child else {
                break;
            };
            self.free_page(rec.root, 1);
            rec.root = child;
            rec.depth = rec.depth.saturating_sub(1);
        }
        Ok(())
    }

    /// Release every page of a tree, including overflow runs and nested trees.
    pub(crate) fn tree_free(&mut self, rec: &DbRecord) -> Result<()> {
        if rec.root == P_INVALID {
            return Ok(());
        }
        self.free_subtree(rec.root)
    }

    fn free_subtree(&mut self, pgno: Pgno) -> Result<()> {
        let page = self.page(pgno)?;
        if page.is_branch() {
            let children = (0..page.count())
                .map(|i| page.branch_child(i))
                .collect::<Result<Vec<_>>>()?;
            for child in children {
                self.free_subtree(child)?;
            }
        } else {
            for node in page.leaf_nodes()? {
                self.release_overflow(&node)?;
                if node.flags.contains(NodeFlags::SUBDATA) {
                    self.tree_free(&DbRecord::decode(&node.data)?)?;
                }
            }
        }
        self.free_page(pgno, 1);
        Ok(())
    }

    pub(crate) fn tree_stat(&self, rec: &DbRecord) -> Result<Stat> {
        let mut stat = Stat {
            psize: PAGE_SIZE as u32,
            depth: rec.depth as u32,
            entries: rec.entries as usize,
            ..Default::default()
        };
        if !rec.is_empty() {
            self.stat_walk(rec.root, rec.flags.contains(DbFlags::DUPSORT), &mut stat)?;
        }
        Ok(stat)
    }

    fn stat_walk(&self, pgno: Pgno, dups: bool, stat: &mut Stat) -> Result<()> {
        let page = self.page(pgno)?;
        if page.is_branch() {
            stat.branch_pages += 1;
            for i in 0..page.count() {
                self.stat_walk(page.branch_child(i)?, dups, stat)?;
            }
            return Ok(());
        }
        stat.leaf_pages += 1;
        for i in 0..page.count() {
            let node = page.leaf(i)?;
            if let Some(run) = node.overflow_pgno() {
                stat.overflow_pages += self.overflow_run(run)?;
            }
            if dups && node.flags.contains(NodeFlags::SUBDATA) {
                let sub = DbRecord::decode(node.data)?;
                if !sub.is_empty() {
                    self.stat_walk(sub.root, false, stat)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_page(keys: &[&[u8]]) -> Box<[u8]> {
        let nodes: Vec<LeafNode> = keys
            .iter()
            .map(|k| LeafNode::new(NodeFlags::empty(), k, b""))
            .collect();
        encode_leaf(5, &nodes)
    }

    #[test]
    fn leaf_search_finds_lower_bound() {
        let page = leaf_page(&[b"b", b"d", b"f"]);
        let view = PageView::new(&page).tree_page(5).unwrap();
        let cmp = KeyCmp::Lexical;
        assert_eq!(leaf_search(&view, cmp, b"d").unwrap(), (1, true));
        assert_eq!(leaf_search(&view, cmp, b"a").unwrap(), (0, false));
        assert_eq!(leaf_search(&view, cmp, b"e").unwrap(), (2, false));
        assert_eq!(leaf_search(&view, cmp, b"g").unwrap(), (3, false));
    }

    #[test]
    fn branch_search_picks_covering_child() {
        let nodes: Vec<BranchNode> = [&b""[..], b"g", b"p"]
            .iter()
            .enumerate()
            .map(|(i, k)| BranchNode {
                key: k.to_vec(),
                child: 10 + i as Pgno,
            })
            .collect();
        let page = encode_branch(6, &nodes);
        let view = PageView::new(&page).tree_page(6).unwrap();
        let cmp = KeyCmp::Lexical;
        assert_eq!(branch_search(&view, cmp, b"a").unwrap(), 0);
        assert_eq!(branch_search(&view, cmp, b"g").unwrap(), 1);
        assert_eq!(branch_search(&view, cmp, b"o").unwrap(), 1);
        assert_eq!(branch_search(&view, cmp, b"z").unwrap(), 2);
    }

    #[test]
    fn merging_an_empty_branch_page_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let env = crate::env::Environment::open(dir.path(), &crate::env::EnvOptions::new()).unwrap();
        let mut txn = env.begin_txn().unwrap();
        let left = txn.alloc(1).unwrap();
        let right = txn.alloc(1).unwrap();
        let child = BranchNode {
            key: Vec::new(),
            child: 40,
        };
        txn.put_dirty(left, encode_branch(left, &[child]));
        txn.put_dirty(right, encode_branch(right, &[]));
        assert!(matches!(
            txn.merge_pages(left, right, b"m"),
            Err(Error::Corrupted(_))
        ));
    }
}
