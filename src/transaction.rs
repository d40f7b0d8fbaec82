use std::collections::HashMap;
use std::sync::{PoisonError, RwLockReadGuard};

use log::{debug, trace, warn};

use crate::constants::{
    DbFlags, EnvFlags, WriteFlags, CORE_DBS, FREE_DBI, MAIN_DBI, MAX_KEY_SIZE, PAGE_SIZE,
};
use crate::cursor::{Cursor, RwCursor};
use crate::database::{DbOptions, DbSlot, Database};
use crate::env::{EnvInner, Mapping};
use crate::error::{Error, Result};
use crate::lock::{lock, WritePermit};
use crate::meta::{DbRecord, Meta};
use crate::midl::{IdList, Pgno};
use crate::page::{PageView, PAGE_HEADER_SIZE};
use crate::types::Stat;
use crate::value::{decode_boolean, decode_number, decode_str, KeyType, UnsafeView, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    /// Read-only transaction that released its snapshot.
    Reset,
    /// Write transaction that hit an error it cannot recover from.
    Failed,
    Done,
}

/// Per-transaction view of one database.
#[derive(Debug, Clone)]
enum DbCache {
    Unloaded,
    Loaded(DbEntry),
    /// Deleted in this transaction; the handle closes on commit.
    Dropped,
}

#[derive(Debug, Clone)]
struct DbEntry {
    name: Option<String>,
    record: DbRecord,
    /// Record differs from the catalog entry.
    dirty: bool,
}

/// State owned by the single write transaction.
#[derive(Debug)]
struct WriteState<'env> {
    _permit: Option<WritePermit<'env>>,
    /// Pages written by this transaction, keyed by first page number.
    dirty: HashMap<Pgno, Box<[u8]>>,
    /// Pages of the base snapshot released by this transaction.
    free_pgs: IdList,
    /// Pages allocated and released again by this transaction.
    loose: IdList,
    /// Pages taken from the free-page database and not yet reused.
    reclaimed: IdList,
    /// Newest free-page record consumed.
    last_reclaimed: Option<u64>,
    next_pgno: Pgno,
    /// The free list is being written; allocation must not consult it.
    saving: bool,
    closed: Vec<u32>,
}

/// A read-only or read-write transaction.
///
/// Read-only transactions see the snapshot committed when they began (or were
/// last renewed). The single write transaction works on private copies of the
/// pages it touches and publishes them atomically on [`commit`](Self::commit).
/// Dropping a transaction without committing aborts it.
#[derive(Debug)]
pub struct Transaction<'env> {
    env: &'env EnvInner,
    map: RwLockReadGuard<'env, Mapping>,
    meta: Meta,
    txnid: u64,
    state: TxnState,
    reader: Option<usize>,
    dbs: Vec<DbCache>,
    write: Option<WriteState<'env>>,
}

impl<'env> Transaction<'env> {
    pub(crate) fn begin(env: &'env EnvInner, read_only: bool, block: bool) -> Result<Self> {
        if env.is_fatal() {
            return Err(Error::Panic);
        }
        let flags = env.flags();
        if !read_only && flags.contains(EnvFlags::RDONLY) {
            return Err(Error::EnvReadOnly);
        }
        let unlocked = flags.contains(EnvFlags::NOLOCK);
        let permit = if read_only || unlocked {
            None
        } else {
            Some(env.writer.acquire(block)?)
        };
        let map = env.map.read().unwrap_or_else(PoisonError::into_inner);
        let (meta, reader) = {
            let mut shared = lock(&env.state);
            let meta = shared.meta;
            let reader = if read_only && !unlocked {
                Some(shared.readers.register(meta.txnid)?)
            } else {
                None
            };
            (meta, reader)
        };
        let write = (!read_only).then(|| WriteState {
            _permit: permit,
            dirty: HashMap::new(),
            free_pgs: IdList::new(),
            loose: IdList::new(),
            reclaimed: IdList::new(),
            last_reclaimed: None,
            next_pgno: meta.last_pgno + 1,
            saving: false,
            closed: Vec::new(),
        });
        let mut txn = Transaction {
            env,
            map,
            meta,
            txnid: if read_only { meta.txnid } else { meta.txnid + 1 },
            state: TxnState::Active,
            reader,
            dbs: Vec::new(),
            write,
        };
        txn.load_dbs()?;
        trace!(
            "began {} txn {}",
            if read_only { "read" } else { "write" },
            txn.txnid
        );
        Ok(txn)
    }

    fn load_dbs(&mut self) -> Result<()> {
        self.dbs = self
            .meta
            .dbs
            .iter()
            .map(|rec| {
                DbCache::Loaded(DbEntry {
                    name: None,
                    record: *rec,
                    dirty: false,
                })
            })
            .collect();
        for (dbi, slot) in self.env.db_slots().into_iter().enumerate().skip(CORE_DBS) {
            let Some(DbSlot {
                name: Some(name), ..
            }) = slot
            else {
                continue;
            };
            if let Some(record) = self.catalog_get(&name)? {
                self.set_cache(
                    dbi,
                    DbCache::Loaded(DbEntry {
                        name: Some(name),
                        record,
                        dirty: false,
                    }),
                );
            }
        }
        Ok(())
    }

    fn set_cache(&mut self, dbi: usize, cache: DbCache) {
        if self.dbs.len() <= dbi {
            self.dbs.resize(dbi + 1, DbCache::Unloaded);
        }
        self.dbs[dbi] = cache;
    }

    /// The transaction's current record of database `dbi`.
    pub(crate) fn record(&self, dbi: usize) -> Result<DbRecord> {
        match self.dbs.get(dbi) {
            Some(DbCache::Loaded(entry)) => return Ok(entry.record),
            Some(DbCache::Dropped) => return Err(Error::BadDbi),
            _ => {}
        }
        // Opened by another transaction after this one began.
        let name = self
            .env
            .db_slot(dbi)
            .and_then(|slot| slot.name)
            .ok_or(Error::BadDbi)?;
        self.catalog_get(&name)?.ok_or(Error::BadDbi)
    }

    pub(crate) fn store_record(&mut self, dbi: usize, record: DbRecord) -> Result<()> {
        if let Some(DbCache::Loaded(entry)) = self.dbs.get_mut(dbi) {
            if entry.record != record {
                entry.record = record;
                entry.dirty = true;
            }
            return Ok(());
        }
        let slot = self.env.db_slot(dbi).ok_or(Error::BadDbi)?;
        self.set_cache(
            dbi,
            DbCache::Loaded(DbEntry {
                name: slot.name,
                record,
                dirty: true,
            }),
        );
        Ok(())
    }

    /// Run `f` on a copy of the record of `dbi`, keeping the result only on success.
    fn with_db<T>(&mut self, dbi: usize, f: impl FnOnce(&mut Self, &mut DbRecord) -> Result<T>) -> Result<T> {
        let mut record = self.record(dbi)?;
        let out = f(self, &mut record)?;
        self.store_record(dbi, record)?;
        Ok(out)
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            _ => Err(Error::BadTxn),
        }
    }

    pub(crate) fn check_write(&self) -> Result<()> {
        self.check_live()?;
        if self.write.is_none() {
            return Err(Error::TxnReadOnly);
        }
        Ok(())
    }

    /// Run a mutation, failing the transaction on errors that may have left it half-applied.
    pub(crate) fn run_write<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.check_write()?;
        let result = f(self);
        if let Err(e) = &result {
            if e.poisons_txn() {
                warn!("write txn {} failed: {}", self.txnid, e);
                self.state = TxnState::Failed;
            }
        }
        result
    }

    fn write_state(&mut self) -> Result<&mut WriteState<'env>> {
        self.write.as_mut().ok_or(Error::TxnReadOnly)
    }

    pub fn id(&self) -> u64 {
        self.txnid
    }

    pub fn is_read_only(&self) -> bool {
        self.write.is_none()
    }

    pub(crate) fn meta(&self) -> &Meta {
        &self.meta
    }

    pub(crate) fn mapping(&self) -> &Mapping {
        &self.map
    }

    // Page access

    fn raw_page(&self, pgno: Pgno) -> Result<&[u8]> {
        if let Some(buf) = self.write.as_ref().and_then(|w| w.dirty.get(&pgno)) {
            return Ok(&buf[..PAGE_SIZE]);
        }
        if pgno > self.meta.last_pgno {
            return Err(Error::PageNotFound(pgno));
        }
        self.map.page(pgno)
    }

    /// A branch or leaf page as seen by this transaction.
    pub(crate) fn page(&self, pgno: Pgno) -> Result<PageView<'_>> {
        PageView::new(self.raw_page(pgno)?).tree_page(pgno)
    }

    /// Length in pages of the overflow run starting at `pgno`.
    pub(crate) fn overflow_run(&self, pgno: Pgno) -> Result<usize> {
        let view = PageView::new(self.raw_page(pgno)?);
        if view.pgno() != pgno || view.overflow() == 0 {
            return Err(Error::corrupted(pgno, "not an overflow page"));
        }
        Ok(view.overflow())
    }

    pub(crate) fn overflow_data(&self, pgno: Pgno, len: usize) -> Result<&[u8]> {
        let pages = self.overflow_run(pgno)?;
        if PAGE_HEADER_SIZE + len > pages * PAGE_SIZE {
            return Err(Error::corrupted(pgno, "value overruns its overflow pages"));
        }
        if let Some(buf) = self.write.as_ref().and_then(|w| w.dirty.get(&pgno)) {
            return Ok(&buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + len]);
        }
        if pgno + pages as u64 - 1 > self.meta.last_pgno {
            return Err(Error::PageNotFound(pgno + pages as u64 - 1));
        }
        self.map
            .range(pgno as usize * PAGE_SIZE + PAGE_HEADER_SIZE, len)
    }

    pub(crate) fn put_dirty(&mut self, pgno: Pgno, buf: Box<[u8]>) {
        if let Some(w) = self.write.as_mut() {
            w.dirty.insert(pgno, buf);
        }
    }

    pub(crate) fn dirty_buf_mut(&mut self, pgno: Pgno) -> Option<&mut [u8]> {
        self.write
            .as_mut()
            .and_then(|w| w.dirty.get_mut(&pgno))
            .map(|buf| &mut buf[..])
    }

    pub(crate) fn is_saving(&self) -> bool {
        self.write.as_ref().is_some_and(|w| w.saving)
    }

    /// Allocate `n` consecutive pages.
    ///
    /// Pages released earlier in this transaction come first, then pages
    /// from the free-page database no reader can still see, then new pages
    /// at the end of the file.
    pub(crate) fn alloc(&mut self, n: usize) -> Result<Pgno> {
        let map_pages = (self.map.len() / PAGE_SIZE) as u64;
        if !self.is_saving() {
            if let Some(pgno) = self.write_state()?.loose.take_run(n) {
                return Ok(pgno);
            }
            loop {
                if let Some(pgno) = self.write_state()?.reclaimed.take_run(n) {
                    return Ok(pgno);
                }
                if !self.reclaim_next()? {
                    break;
                }
            }
        }
        let w = self.write_state()?;
        let pgno = w.next_pgno;
        if pgno + n as u64 > map_pages {
            return Err(Error::MapFull);
        }
        w.next_pgno += n as u64;
        Ok(pgno)
    }

    /// Move the next reusable free-page record into the reclaimed list.
    fn reclaim_next(&mut self) -> Result<bool> {
        let free = self.record(FREE_DBI as usize)?;
        let limit = self
            .env
            .oldest_reader()
            .map_or(self.txnid, |oldest| oldest.min(self.txnid));
        let start = self
            .write_state()?
            .last_reclaimed
            .map_or(0, |last| last + 1);
        match self.free_record_from(&free, start)? {
            Some((id, pages)) if id < limit => {
                trace!(
                    "txn {} reclaimed {} pages freed by txn {}",
                    self.txnid,
                    pages.len(),
                    id
                );
                let w = self.write_state()?;
                w.reclaimed.append_list(pages.as_slice());
                w.last_reclaimed = Some(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Release `n` pages starting at `pgno`.
    pub(crate) fn free_page(&mut self, pgno: Pgno, n: usize) {
        let Some(w) = self.write.as_mut() else {
            return;
        };
        if w.dirty.remove(&pgno).is_some() {
            if w.saving {
                w.free_pgs.insert_run(pgno, n);
            } else {
                w.loose.insert_run(pgno, n);
            }
        } else {
            w.free_pgs.insert_run(pgno, n);
        }
    }

    /// Page number a rewritten copy of `old` goes to.
    pub(crate) fn cow_pgno(&mut self, old: Pgno) -> Result<Pgno> {
        if self.write_state()?.dirty.contains_key(&old) {
            return Ok(old);
        }
        let pgno = self.alloc(1)?;
        self.free_page(old, 1);
        Ok(pgno)
    }

    // Commit

    /// Commit the transaction.
    ///
    /// A write transaction that failed earlier is aborted and `BadTxn` returned.
    pub fn commit(mut self) -> Result<()> {
        match self.state {
            TxnState::Active | TxnState::Reset => {}
            _ => return Err(Error::BadTxn),
        }
        if self.write.is_none() {
            self.state = TxnState::Done;
            return Ok(());
        }
        match self.commit_write() {
            Ok(()) => {
                self.state = TxnState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = TxnState::Failed;
                Err(e)
            }
        }
    }

    /// Abort the transaction, discarding its changes.
    pub fn abort(self) {}

    fn commit_write(&mut self) -> Result<()> {
        self.flush_catalog()?;
        let main_changed = self.record(MAIN_DBI as usize)? != self.meta.dbs[MAIN_DBI as usize];
        let w = self.write_state()?;
        if w.dirty.is_empty() && w.free_pgs.is_empty() && w.closed.is_empty() && !main_changed {
            debug!("txn {} had nothing to commit", self.txnid);
            return Ok(());
        }
        self.save_freelist()?;

        let w = self.write_state()?;
        let next_pgno = w.next_pgno;
        let closed = std::mem::take(&mut w.closed);
        let mut pages: Vec<(Pgno, Box<[u8]>)> = w.dirty.drain().collect();
        pages.sort_unstable_by_key(|(pgno, _)| *pgno);
        self.env.write_pages(&self.map, &pages, next_pgno)?;

        let meta = Meta {
            map_size: self.map.len() as u64,
            dbs: [
                self.record(FREE_DBI as usize)?,
                self.record(MAIN_DBI as usize)?,
            ],
            last_pgno: next_pgno - 1,
            txnid: self.txnid,
            ..self.meta
        };
        if let Err(e) = self.env.write_meta(&self.map, &meta) {
            log::error!("meta write of txn {} failed: {}", self.txnid, e);
            self.env.set_fatal();
            return Err(Error::Panic);
        }
        self.env.publish(meta);
        for dbi in closed {
            self.env.close_slot(dbi);
        }
        debug!(
            "committed txn {}: {} dirty pages, last page {}",
            self.txnid,
            pages.len(),
            meta.last_pgno
        );
        Ok(())
    }

    /// Write changed named-database records into the catalog.
    fn flush_catalog(&mut self) -> Result<()> {
        let pending: Vec<(usize, String, DbRecord)> = self
            .dbs
            .iter()
            .enumerate()
            .skip(CORE_DBS)
            .filter_map(|(dbi, cache)| match cache {
                DbCache::Loaded(DbEntry {
                    name: Some(name),
                    record,
                    dirty: true,
                }) => Some((dbi, name.clone(), *record)),
                _ => None,
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let mut main = self.record(MAIN_DBI as usize)?;
        for (dbi, name, record) in pending {
            self.catalog_put(&mut main, &name, &record)?;
            if let Some(DbCache::Loaded(entry)) = self.dbs.get_mut(dbi) {
                entry.dirty = false;
            }
        }
        self.store_record(MAIN_DBI as usize, main)
    }

    /// Record the pages released by this transaction in the free-page database.
    ///
    /// Writing the record can itself release pages, so it is rewritten until
    /// the stored list matches.
    fn save_freelist(&mut self) -> Result<()> {
        let mut free = self.record(FREE_DBI as usize)?;
        let w = self.write_state()?;
        w.saving = true;
        if let Some(last) = w.last_reclaimed {
            while let Some((id, _)) = self.free_record_from(&free, 0)? {
                if id > last {
                    break;
                }
                self.tree_del(&mut free, &id.to_ne_bytes(), None, false)?;
            }
        }
        let key = self.txnid.to_ne_bytes();
        let mut written: Option<IdList> = None;
        loop {
            let w = self.write_state()?;
            let mut all = w.free_pgs.clone();
            all.append_list(w.loose.as_slice());
            all.append_list(w.reclaimed.as_slice());
            if written.as_ref() == Some(&all) || (written.is_none() && all.is_empty()) {
                break;
            }
            self.tree_put(&mut free, &key, &all.encode(), WriteFlags::empty())?;
            written = Some(all);
        }
        if let Some(list) = &written {
            trace!("txn {} freed {} pages", self.txnid, list.len());
        }
        self.store_record(FREE_DBI as usize, free)
    }

    // Read-only lifecycle

    /// Release the snapshot of a read-only transaction until [`renew`](Self::renew).
    pub fn reset(&mut self) -> Result<()> {
        if self.write.is_some() || self.state != TxnState::Active {
            return Err(Error::BadTxn);
        }
        if let Some(idx) = self.reader {
            lock(&self.env.state).readers.set_txnid(idx, None);
        }
        self.state = TxnState::Reset;
        Ok(())
    }

    /// Pin the latest committed snapshot again after [`reset`](Self::reset).
    pub fn renew(&mut self) -> Result<()> {
        if self.state != TxnState::Reset {
            return Err(Error::BadTxn);
        }
        if self.env.is_fatal() {
            return Err(Error::Panic);
        }
        {
            let mut shared = lock(&self.env.state);
            self.meta = shared.meta;
            if let Some(idx) = self.reader {
                shared.readers.set_txnid(idx, Some(self.meta.txnid));
            }
        }
        self.txnid = self.meta.txnid;
        self.state = TxnState::Active;
        self.load_dbs()
    }

    // Databases

    /// Open a database; with `create` in a write transaction it is created if missing.
    pub fn open_db(&mut self, name: Option<&str>, options: &DbOptions) -> Result<Database> {
        self.check_live()?;
        let requested = options.flags.persistent();
        let Some(name) = name else {
            return self.open_main(requested, options.key_type);
        };
        if self.env.max_dbs() == 0 {
            return Err(Error::DbsFull);
        }
        if name.is_empty() || name.len() > MAX_KEY_SIZE {
            return Err(Error::BadValSize);
        }
        if self.record(MAIN_DBI as usize)?.flags.contains(DbFlags::DUPSORT) {
            return Err(Error::Incompatible);
        }

        let cached = self.env.find_db(name).and_then(|dbi| match self.dbs.get(dbi as usize) {
            Some(DbCache::Loaded(entry)) => Some(entry.record),
            _ => None,
        });
        let (record, created) = match cached.map_or_else(|| self.catalog_get(name), |r| Ok(Some(r)))? {
            Some(record) => {
                if !requested.is_empty() && requested != record.flags {
                    return Err(Error::Incompatible);
                }
                (record, false)
            }
            None if !options.flags.contains(DbFlags::CREATE) => return Err(Error::NotFound),
            None => {
                self.check_write()?;
                (DbRecord::empty(requested), true)
            }
        };
        let dbi = self.env.register_db(name, record.flags, options.key_type)?;
        self.set_cache(
            dbi as usize,
            DbCache::Loaded(DbEntry {
                name: Some(name.to_owned()),
                record,
                dirty: created,
            }),
        );
        if created {
            debug!("created database {:?} in txn {}", name, self.txnid);
        }
        Ok(Database {
            dbi,
            flags: record.flags,
            key_type: options.key_type,
        })
    }

    fn open_main(&mut self, requested: DbFlags, key_type: KeyType) -> Result<Database> {
        let mut record = self.record(MAIN_DBI as usize)?;
        if !requested.is_empty() && requested != record.flags {
            // Flags can only be chosen while the main database is still empty.
            if !record.is_empty() || !requested.contains(record.flags) {
                return Err(Error::Incompatible);
            }
            self.check_write()?;
            record.flags = requested;
            self.store_record(MAIN_DBI as usize, record)?;
        }
        self.env.set_db_slot(
            MAIN_DBI,
            DbSlot {
                name: None,
                flags: record.flags,
                key_type,
            },
        );
        Ok(Database {
            dbi: MAIN_DBI,
            flags: record.flags,
            key_type,
        })
    }

    /// Empty a database, or with `delete` remove it and close its handle.
    pub fn drop_db(&mut self, db: Database, delete: bool) -> Result<()> {
        self.run_write(|txn| {
            let dbi = db.dbi as usize;
            if dbi == FREE_DBI as usize {
                return Err(Error::Incompatible);
            }
            if dbi == MAIN_DBI as usize {
                // Named databases live inside the main tree and go with it.
                txn.flush_catalog()?;
                for cache in txn.dbs.iter_mut().skip(CORE_DBS) {
                    if matches!(cache, DbCache::Loaded(_)) {
                        *cache = DbCache::Dropped;
                    }
                }
            }
            let record = txn.record(dbi)?;
            txn.tree_free(&record)?;
            if delete && dbi >= CORE_DBS {
                let name = txn
                    .env
                    .db_slot(dbi)
                    .and_then(|slot| slot.name)
                    .ok_or(Error::BadDbi)?;
                let mut main = txn.record(MAIN_DBI as usize)?;
                txn.tree_del(&mut main, name.as_bytes(), None, true)?;
                txn.store_record(MAIN_DBI as usize, main)?;
                txn.set_cache(dbi, DbCache::Dropped);
                txn.write_state()?.closed.push(db.dbi);
                debug!("deleted database {:?} in txn {}", name, txn.txnid);
                Ok(())
            } else {
                txn.store_record(dbi, DbRecord::empty(record.flags))
            }
        })
    }

    pub fn db_stat(&self, db: Database) -> Result<Stat> {
        self.check_live()?;
        let record = self.record(db.dbi as usize)?;
        self.tree_stat(&record)
    }

    pub fn db_flags(&self, db: Database) -> Result<DbFlags> {
        self.check_live()?;
        Ok(self.record(db.dbi as usize)?.flags)
    }

    pub(crate) fn db_record(&self, db: Database) -> Result<DbRecord> {
        self.check_live()?;
        self.record(db.dbi as usize)
    }

    // Data access

    /// Value stored under `key`, the first duplicate for duplicate-sorted databases.
    pub fn get(&self, db: Database, key: &[u8]) -> Result<Option<&[u8]>> {
        let record = self.db_record(db)?;
        self.tree_get(&record, key)
    }

    pub fn get_binary(&self, db: Database, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get(db, key)?.map(<[u8]>::to_vec))
    }

    pub fn get_str(&self, db: Database, key: &[u8]) -> Result<Option<&str>> {
        self.get(db, key)?.map(decode_str).transpose()
    }

    pub fn get_string(&self, db: Database, key: &[u8]) -> Result<Option<String>> {
        Ok(self.get_str(db, key)?.map(str::to_owned))
    }

    pub fn get_number(&self, db: Database, key: &[u8]) -> Result<Option<f64>> {
        self.get(db, key)?.map(decode_number).transpose()
    }

    pub fn get_boolean(&self, db: Database, key: &[u8]) -> Result<Option<bool>> {
        self.get(db, key)?.map(decode_boolean).transpose()
    }

    /// Zero-copy view of a value; see [`UnsafeView`] for the rules on its use.
    pub fn get_unsafe(&self, db: Database, key: &[u8]) -> Result<Option<UnsafeView>> {
        Ok(self.get(db, key)?.map(UnsafeView::new))
    }

    /// Store `data` under `key`.
    ///
    /// For duplicate-sorted databases the value is added to the key's set;
    /// re-adding an existing pair is a no-op unless `NODUPDATA` is given.
    pub fn put(&mut self, db: Database, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        self.run_write(|txn| {
            txn.with_db(db.dbi as usize, |txn, record| {
                txn.tree_put(record, key, data, flags)
            })
        })
    }

    pub fn put_value(&mut self, db: Database, key: &[u8], value: Value<'_>, flags: WriteFlags) -> Result<()> {
        self.put(db, key, &value.encode(), flags)
    }

    pub fn put_string(&mut self, db: Database, key: &[u8], value: &str, flags: WriteFlags) -> Result<()> {
        self.put_value(db, key, Value::String(value), flags)
    }

    pub fn put_number(&mut self, db: Database, key: &[u8], value: f64, flags: WriteFlags) -> Result<()> {
        self.put_value(db, key, Value::Number(value), flags)
    }

    pub fn put_boolean(&mut self, db: Database, key: &[u8], value: bool, flags: WriteFlags) -> Result<()> {
        self.put_value(db, key, Value::Boolean(value), flags)
    }

    /// Delete `key`, or only its duplicate `data` in a duplicate-sorted database.
    ///
    /// Returns whether anything was deleted.
    pub fn del(&mut self, db: Database, key: &[u8], data: Option<&[u8]>) -> Result<bool> {
        self.run_write(|txn| {
            txn.with_db(db.dbi as usize, |txn, record| {
                let data = data.filter(|_| record.flags.contains(DbFlags::DUPSORT));
                txn.tree_del(record, key, data, false)
            })
        })
    }

    pub fn cursor(&self, db: Database) -> Result<Cursor<'_, 'env>> {
        Cursor::new(self, db)
    }

    pub fn rw_cursor(&mut self, db: Database) -> Result<RwCursor<'_, 'env>> {
        RwCursor::new(self, db)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.write.is_some() && self.state != TxnState::Done {
            debug!("aborted write txn {}", self.txnid);
        }
        if let Some(idx) = self.reader.take() {
            lock(&self.env.state).readers.release(idx);
        }
    }
}
