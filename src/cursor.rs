use std::cmp::Ordering;

use crate::btree::{DupSet, TreeCursor};
use crate::constants::WriteFlags;
use crate::database::{Database, KeyCmp, TreeLayout};
use crate::error::{Error, Result};
use crate::meta::DbRecord;
use crate::page::decode_dups;
use crate::transaction::Transaction;
use crate::types::CursorOp;
use crate::value::{decode_boolean, decode_number, decode_str, Key, UnsafeView};

/// A key/value pair borrowed from a transaction.
pub type Entry<'t> = (&'t [u8], &'t [u8]);

/// Position inside the values of the current key.
#[derive(Debug, Clone)]
enum DupPos {
    Single,
    Inline { idx: usize, count: usize },
    Tree(TreeCursor),
}

#[derive(Debug, Clone)]
struct Position {
    tree: TreeCursor,
    dup: DupPos,
}

/// Cursor state shared by [`Cursor`] and [`RwCursor`].
///
/// Every operation takes the transaction explicitly; the database record is
/// looked up again each time so the cursor follows writes made through it.
#[derive(Debug, Clone)]
struct CursorCore {
    db: Database,
    pos: Option<Position>,
}

impl CursorCore {
    fn new(db: Database) -> Self {
        CursorCore { db, pos: None }
    }

    fn record(&self, txn: &Transaction<'_>) -> Result<DbRecord> {
        txn.db_record(self.db)
    }

    fn is_dup(&self, txn: &Transaction<'_>) -> Result<bool> {
        Ok(TreeLayout::from_flags(self.record(txn)?.flags).dup.is_some())
    }

    fn position(&self) -> Result<&Position> {
        self.pos.as_ref().ok_or(Error::CursorNotPositioned)
    }

    /// Position on the first or last value of the key under `tree`.
    fn land(&self, txn: &Transaction<'_>, tree: TreeCursor, last: bool) -> Result<Position> {
        if !self.is_dup(txn)? {
            return Ok(Position {
                tree,
                dup: DupPos::Single,
            });
        }
        let node = tree.leaf(txn)?;
        let dup = match txn.dup_set(&node)? {
            DupSet::Single(_) => DupPos::Single,
            DupSet::Inline(values) => {
                if values.is_empty() {
                    return Err(Error::Corrupted("empty duplicate list".into()));
                }
                DupPos::Inline {
                    idx: if last { values.len() - 1 } else { 0 },
                    count: values.len(),
                }
            }
            DupSet::Tree(sub) => {
                let mut tc = TreeCursor::new(sub.root);
                let found = if last { tc.last(txn)? } else { tc.first(txn)? };
                if !found {
                    return Err(Error::Corrupted("empty duplicate tree".into()));
                }
                DupPos::Tree(tc)
            }
        };
        Ok(Position { tree, dup })
    }

    fn current<'t>(&self, txn: &'t Transaction<'_>) -> Result<Entry<'t>> {
        let pos = self.position()?;
        let node = pos.tree.leaf(txn)?;
        let value = match &pos.dup {
            DupPos::Single if self.is_dup(txn)? => match txn.dup_set(&node)? {
                DupSet::Single(value) => value,
                _ => return Err(Error::Corrupted("duplicate set changed under cursor".into())),
            },
            DupPos::Single => txn.node_value(&node)?,
            DupPos::Inline { idx, .. } => *decode_dups(node.data)?
                .get(*idx)
                .ok_or(Error::CursorNotPositioned)?,
            DupPos::Tree(tc) => tc.leaf(txn)?.key,
        };
        Ok((node.key, value))
    }

    fn settle<'t>(&mut self, txn: &'t Transaction<'_>, pos: Option<Position>) -> Result<Option<Entry<'t>>> {
        self.pos = pos;
        match self.pos {
            Some(_) => self.current(txn).map(Some),
            None => Ok(None),
        }
    }

    fn edge<'t>(&mut self, txn: &'t Transaction<'_>, last: bool) -> Result<Option<Entry<'t>>> {
        let mut tree = TreeCursor::new(self.record(txn)?.root);
        let found = if last { tree.last(txn)? } else { tree.first(txn)? };
        let pos = if found {
            Some(self.land(txn, tree, last)?)
        } else {
            None
        };
        self.settle(txn, pos)
    }

    /// Move to the adjacent key; the position is kept when there is none.
    fn step_key<'t>(&mut self, txn: &'t Transaction<'_>, forward: bool) -> Result<Option<Entry<'t>>> {
        let Some(pos) = &self.pos else {
            return self.edge(txn, !forward);
        };
        let mut tree = pos.tree.clone();
        if !tree.step(txn, forward)? {
            return Ok(None);
        }
        let pos = self.land(txn, tree, !forward)?;
        self.settle(txn, Some(pos))
    }

    /// Move within the values of the current key.
    fn step_dup<'t>(&mut self, txn: &'t Transaction<'_>, forward: bool) -> Result<Option<Entry<'t>>> {
        let pos = self.pos.as_mut().ok_or(Error::CursorNotPositioned)?;
        let moved = match &mut pos.dup {
            DupPos::Single => false,
            DupPos::Inline { idx, count } => {
                if forward && *idx + 1 < *count {
                    *idx += 1;
                    true
                } else if !forward && *idx > 0 {
                    *idx -= 1;
                    true
                } else {
                    false
                }
            }
            DupPos::Tree(tc) => tc.step(txn, forward)?,
        };
        if !moved {
            return Ok(None);
        }
        self.current(txn).map(Some)
    }

    fn step<'t>(&mut self, txn: &'t Transaction<'_>, forward: bool) -> Result<Option<Entry<'t>>> {
        if self.pos.is_some() {
            if let Some(entry) = self.step_dup(txn, forward)? {
                return Ok(Some(entry));
            }
        }
        self.step_key(txn, forward)
    }

    fn dup_edge<'t>(&mut self, txn: &'t Transaction<'_>, last: bool) -> Result<Option<Entry<'t>>> {
        let tree = self.position()?.tree.clone();
        let pos = self.land(txn, tree, last)?;
        self.settle(txn, Some(pos))
    }

    fn seek<'t>(&mut self, txn: &'t Transaction<'_>, key: &[u8], exact: bool) -> Result<Option<Entry<'t>>> {
        let record = self.record(txn)?;
        let mut tree = TreeCursor::new(record.root);
        let pos = match tree.seek(txn, KeyCmp::for_keys(record.flags), key)? {
            Some(hit) if hit || !exact => Some(self.land(txn, tree, false)?),
            _ => None,
        };
        self.settle(txn, pos)
    }

    /// Position on the value `data` of `key`, or with `range` the first value not less than it.
    fn seek_value<'t>(
        &mut self,
        txn: &'t Transaction<'_>,
        key: &[u8],
        data: &[u8],
        range: bool,
    ) -> Result<Option<Entry<'t>>> {
        if self.seek(txn, key, true)?.is_none() {
            return Ok(None);
        }
        let layout = TreeLayout::from_flags(self.record(txn)?.flags);
        let cmp = layout.dup.map_or(KeyCmp::Lexical, |d| d.cmp);
        let accept = |ord: Ordering| ord == Ordering::Equal || (range && ord == Ordering::Greater);
        let pos = self.position()?.clone();
        let node = pos.tree.leaf(txn)?;
        let dup = if layout.dup.is_none() {
            let value = txn.node_value(&node)?;
            accept(cmp.compare(value, data)).then_some(DupPos::Single)
        } else {
            match txn.dup_set(&node)? {
                DupSet::Single(value) => accept(cmp.compare(value, data)).then_some(DupPos::Single),
                DupSet::Inline(values) => values
                    .iter()
                    .position(|v| accept(cmp.compare(v, data)))
                    .map(|idx| DupPos::Inline {
                        idx,
                        count: values.len(),
                    }),
                DupSet::Tree(sub) => {
                    let mut tc = TreeCursor::new(sub.root);
                    match tc.seek(txn, cmp, data)? {
                        Some(hit) if hit || range => Some(DupPos::Tree(tc)),
                        _ => None,
                    }
                }
            }
        };
        let pos = dup.map(|dup| Position {
            tree: pos.tree,
            dup,
        });
        self.settle(txn, pos)
    }

    fn count(&self, txn: &Transaction<'_>) -> Result<usize> {
        let pos = self.position()?;
        if !self.is_dup(txn)? {
            return Ok(1);
        }
        let node = pos.tree.leaf(txn)?;
        Ok(txn.dup_set(&node)?.count())
    }

    /// Whether the current key holds `value`; the position is left unchanged.
    fn exists(&mut self, txn: &Transaction<'_>, value: &[u8]) -> Result<bool> {
        let saved = self.pos.clone();
        let key = self.current(txn)?.0.to_vec();
        let found = self.seek_value(txn, &key, value, false)?.is_some();
        self.pos = saved;
        Ok(found)
    }

    fn get<'t>(
        &mut self,
        txn: &'t Transaction<'_>,
        op: CursorOp,
        key: Option<&[u8]>,
        data: Option<&[u8]>,
    ) -> Result<Option<Entry<'t>>> {
        let key = || key.ok_or(Error::BadValSize);
        let data = || data.ok_or(Error::BadValSize);
        match op {
            CursorOp::First => self.edge(txn, false),
            CursorOp::Last => self.edge(txn, true),
            CursorOp::Next => self.step(txn, true),
            CursorOp::Prev => self.step(txn, false),
            CursorOp::NextNoDup => self.step_key(txn, true),
            CursorOp::PrevNoDup => self.step_key(txn, false),
            CursorOp::FirstDup => self.dup_edge(txn, false),
            CursorOp::LastDup => self.dup_edge(txn, true),
            CursorOp::NextDup => self.step_dup(txn, true),
            CursorOp::PrevDup => self.step_dup(txn, false),
            CursorOp::GetCurrent => self.current(txn).map(Some),
            CursorOp::Set => self.seek(txn, key()?, true),
            CursorOp::SetRange => self.seek(txn, key()?, false),
            CursorOp::GetBoth => self.seek_value(txn, key()?, data()?, false),
            CursorOp::GetBothRange => self.seek_value(txn, key()?, data()?, true),
        }
    }
}

/// Read cursor over one database.
///
/// Relative moves on an unpositioned cursor start from the first (or last)
/// entry. A failed seek leaves the cursor unpositioned; a failed relative
/// move keeps the current position.
#[derive(Debug)]
pub struct Cursor<'txn, 'env> {
    txn: &'txn Transaction<'env>,
    core: CursorCore,
}

impl<'txn, 'env> Cursor<'txn, 'env> {
    pub(crate) fn new(txn: &'txn Transaction<'env>, db: Database) -> Result<Self> {
        txn.db_record(db)?;
        Ok(Cursor {
            txn,
            core: CursorCore::new(db),
        })
    }

    pub fn database(&self) -> Database {
        self.core.db
    }

    pub fn is_positioned(&self) -> bool {
        self.core.pos.is_some()
    }

    pub fn first(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.edge(self.txn, false)
    }

    pub fn last(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.edge(self.txn, true)
    }

    pub fn next(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.step(self.txn, true)
    }

    pub fn prev(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.step(self.txn, false)
    }

    /// First value of the next key.
    pub fn next_nodup(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.step_key(self.txn, true)
    }

    /// Last value of the previous key.
    pub fn prev_nodup(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.step_key(self.txn, false)
    }

    pub fn first_dup(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.dup_edge(self.txn, false)
    }

    pub fn last_dup(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.dup_edge(self.txn, true)
    }

    pub fn next_dup(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.step_dup(self.txn, true)
    }

    pub fn prev_dup(&mut self) -> Result<Option<Entry<'txn>>> {
        self.core.step_dup(self.txn, false)
    }

    /// Position at `key` exactly.
    pub fn set(&mut self, key: &[u8]) -> Result<Option<Entry<'txn>>> {
        self.core.seek(self.txn, key, true)
    }

    /// Position at the first key not less than `key`.
    pub fn set_range(&mut self, key: &[u8]) -> Result<Option<Entry<'txn>>> {
        self.core.seek(self.txn, key, false)
    }

    pub fn get_both(&mut self, key: &[u8], data: &[u8]) -> Result<Option<Entry<'txn>>> {
        self.core.seek_value(self.txn, key, data, false)
    }

    /// Position at `key` and its first value not less than `data`.
    pub fn get_both_range(&mut self, key: &[u8], data: &[u8]) -> Result<Option<Entry<'txn>>> {
        self.core.seek_value(self.txn, key, data, true)
    }

    pub fn get_current(&self) -> Result<Entry<'txn>> {
        self.core.current(self.txn)
    }

    /// Run `op`; `key` and `data` are ignored by operations that take none.
    pub fn get(&mut self, op: CursorOp, key: Option<&[u8]>, data: Option<&[u8]>) -> Result<Option<Entry<'txn>>> {
        self.core.get(self.txn, op, key, data)
    }

    /// Number of values stored under the current key.
    pub fn count(&self) -> Result<usize> {
        self.core.count(self.txn)
    }

    pub fn exists(&mut self, value: &[u8]) -> Result<bool> {
        self.core.exists(self.txn, value)
    }

    pub fn current_key(&self) -> Result<Key> {
        Key::decode(self.core.db.key_type(), self.get_current()?.0)
    }

    pub fn current_binary(&self) -> Result<Vec<u8>> {
        Ok(self.get_current()?.1.to_vec())
    }

    pub fn current_string(&self) -> Result<String> {
        Ok(decode_str(self.get_current()?.1)?.to_owned())
    }

    pub fn current_number(&self) -> Result<f64> {
        decode_number(self.get_current()?.1)
    }

    pub fn current_boolean(&self) -> Result<bool> {
        decode_boolean(self.get_current()?.1)
    }

    /// Zero-copy view of the current value; see [`UnsafeView`].
    pub fn current_unsafe(&self) -> Result<UnsafeView> {
        Ok(UnsafeView::new(self.get_current()?.1))
    }

    /// Iterate over every entry from the first one.
    pub fn iter(&mut self) -> Iter<'_, 'txn, 'env> {
        Iter {
            cursor: self,
            start: Start::First,
        }
    }

    /// Iterate from the first key not less than `key`.
    pub fn iter_from(&mut self, key: &[u8]) -> Iter<'_, 'txn, 'env> {
        Iter {
            cursor: self,
            start: Start::From(key.to_vec()),
        }
    }
}

enum Start {
    First,
    From(Vec<u8>),
    Started,
    Finished,
}

/// Iterator over the entries of a [`Cursor`], duplicates included.
pub struct Iter<'c, 'txn, 'env> {
    cursor: &'c mut Cursor<'txn, 'env>,
    start: Start,
}

impl<'txn> Iterator for Iter<'_, 'txn, '_> {
    type Item = Result<Entry<'txn>>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match std::mem::replace(&mut self.start, Start::Started) {
            Start::First => self.cursor.first(),
            Start::From(key) => self.cursor.set_range(&key),
            Start::Started => self.cursor.next(),
            Start::Finished => {
                self.start = Start::Finished;
                return None;
            }
        };
        match step {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.start = Start::Finished;
                None
            }
            Err(e) => {
                self.start = Start::Finished;
                Some(Err(e))
            }
        }
    }
}

/// Cursor of a write transaction; it can also write at its position.
#[derive(Debug)]
pub struct RwCursor<'txn, 'env> {
    txn: &'txn mut Transaction<'env>,
    core: CursorCore,
}

impl<'txn, 'env> RwCursor<'txn, 'env> {
    pub(crate) fn new(txn: &'txn mut Transaction<'env>, db: Database) -> Result<Self> {
        txn.check_write()?;
        txn.db_record(db)?;
        Ok(RwCursor {
            txn,
            core: CursorCore::new(db),
        })
    }

    pub fn database(&self) -> Database {
        self.core.db
    }

    pub fn is_positioned(&self) -> bool {
        self.core.pos.is_some()
    }

    pub fn first(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.edge(self.txn, false)
    }

    pub fn last(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.edge(self.txn, true)
    }

    pub fn next(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.step(self.txn, true)
    }

    pub fn prev(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.step(self.txn, false)
    }

    pub fn next_nodup(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.step_key(self.txn, true)
    }

    pub fn prev_nodup(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.step_key(self.txn, false)
    }

    pub fn first_dup(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.dup_edge(self.txn, false)
    }

    pub fn last_dup(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.dup_edge(self.txn, true)
    }

    pub fn next_dup(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.step_dup(self.txn, true)
    }

    pub fn prev_dup(&mut self) -> Result<Option<Entry<'_>>> {
        self.core.step_dup(self.txn, false)
    }

    pub fn set(&mut self, key: &[u8]) -> Result<Option<Entry<'_>>> {
        self.core.seek(self.txn, key, true)
    }

    pub fn set_range(&mut self, key: &[u8]) -> Result<Option<Entry<'_>>> {
        self.core.seek(self.txn, key, false)
    }

    pub fn get_both(&mut self, key: &[u8], data: &[u8]) -> Result<Option<Entry<'_>>> {
        self.core.seek_value(self.txn, key, data, false)
    }

    pub fn get_both_range(&mut self, key: &[u8], data: &[u8]) -> Result<Option<Entry<'_>>> {
        self.core.seek_value(self.txn, key, data, true)
    }

    pub fn get_current(&self) -> Result<Entry<'_>> {
        self.core.current(self.txn)
    }

    pub fn get(&mut self, op: CursorOp, key: Option<&[u8]>, data: Option<&[u8]>) -> Result<Option<Entry<'_>>> {
        self.core.get(self.txn, op, key, data)
    }

    pub fn count(&self) -> Result<usize> {
        self.core.count(self.txn)
    }

    pub fn exists(&mut self, value: &[u8]) -> Result<bool> {
        self.core.exists(self.txn, value)
    }

    pub fn current_unsafe(&self) -> Result<UnsafeView> {
        Ok(UnsafeView::new(self.get_current()?.1))
    }

    /// Store a pair and position the cursor on it.
    ///
    /// With `CURRENT` the value at the cursor is replaced and `key` is
    /// ignored in favour of the current key.
    pub fn put(&mut self, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        let db = self.core.db;
        let dup = self.core.is_dup(self.txn)?;
        let key = if flags.contains(WriteFlags::CURRENT) {
            let (current_key, old) = self.core.current(self.txn)?;
            let (current_key, old) = (current_key.to_vec(), old.to_vec());
            let flags = flags - WriteFlags::CURRENT;
            if !dup {
                self.txn.put(db, &current_key, data, flags)?;
            } else if old != data {
                // Add the new value first so a rejected put leaves the old one.
                self.txn.put(db, &current_key, data, flags)?;
                self.txn.del(db, &current_key, Some(&old))?;
            }
            current_key
        } else {
            self.txn.put(db, key, data, flags)?;
            key.to_vec()
        };
        if dup {
            self.core.seek_value(self.txn, &key, data, false)?;
        } else {
            self.core.seek(self.txn, &key, true)?;
        }
        Ok(())
    }

    /// Delete the value at the cursor, or with `NODUPDATA` every value of the
    /// current key. The cursor is unpositioned afterwards.
    pub fn del(&mut self, flags: WriteFlags) -> Result<()> {
        let db = self.core.db;
        let (key, value) = {
            let (key, value) = self.core.current(self.txn)?;
            (key.to_vec(), value.to_vec())
        };
        let single = self.core.is_dup(self.txn)? && !flags.contains(WriteFlags::NODUPDATA);
        self.core.pos = None;
        self.txn
            .del(db, &key, if single { Some(&value) } else { None })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DbFlags, NodeFlags, MAIN_DBI};
    use crate::database::DbOptions;
    use crate::env::{EnvOptions, Environment};
    use crate::page::{encode_dups, encode_leaf, LeafNode};

    #[test]
    fn empty_inline_duplicate_list_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(dir.path(), &EnvOptions::new()).unwrap();
        let mut txn = env.begin_txn().unwrap();
        let db = txn.open_db(None, &DbOptions::new().dup_sort(true)).unwrap();

        let pgno = txn.alloc(1).unwrap();
        let none: [&[u8]; 0] = [];
        let node = LeafNode::new(NodeFlags::DUPDATA, b"k", &encode_dups(&none));
        txn.put_dirty(pgno, encode_leaf(pgno, &[node]));
        let mut record = DbRecord::empty(DbFlags::DUPSORT);
        record.root = pgno;
        record.depth = 1;
        record.entries = 1;
        txn.store_record(MAIN_DBI as usize, record).unwrap();

        let mut cursor = txn.cursor(db).unwrap();
        assert!(matches!(cursor.first(), Err(Error::Corrupted(_))));
        assert!(matches!(cursor.last(), Err(Error::Corrupted(_))));
    }
}
