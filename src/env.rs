use lazy_static::lazy_static;
use log::{debug, info, warn};
use memmap2::{Mmap, MmapOptions, MmapRaw};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::{ptr, slice};

use crate::btree::TreeCursor;
use crate::constants::{
    DbFlags, EnvFlags, NodeFlags, WriteFlags, CORE_DBS, DATA_FILE, DEFAULT_MAP_SIZE,
    DEFAULT_MAX_DBS, DEFAULT_MAX_READERS, MAX_KEY_SIZE, META_PAGES, PAGE_SIZE,
};
use crate::database::{DbOptions, DbSlot, Database};
use crate::error::{Error, Result};
use crate::lock::{lock, ReaderTable, WriterGate};
use crate::meta::{choose_meta, DbRecord, Meta};
use crate::midl::Pgno;
use crate::transaction::Transaction;
use crate::types::{EnvInfo, ReaderInfo, Stat};
use crate::value::{KeyType, UnsafeView};

lazy_static! {
    /// Flags that may be toggled on an open environment.
    static ref CHANGEABLE: EnvFlags =
        EnvFlags::NOSYNC | EnvFlags::NOMETASYNC | EnvFlags::MAPASYNC | EnvFlags::NOMEMINIT;
}

/// Data files open in this process.
static OPEN_FILES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// The memory map of the data file.
///
/// Without `WRITEMAP` the map is read-only and commits write through the
/// file; with it, commits copy pages straight into the map.
#[derive(Debug)]
pub(crate) enum Mapping {
    ReadOnly(Mmap),
    Writable(MmapRaw),
}

impl Mapping {
    fn new(file: &File, len: usize, writable: bool) -> Result<Self> {
        // SAFETY: the file is only modified through this environment, and
        // pages visible to a snapshot are never rewritten while it is live.
        let map = unsafe {
            if writable {
                Mapping::Writable(MmapOptions::new().len(len).map_raw(file)?)
            } else {
                Mapping::ReadOnly(MmapOptions::new().len(len).map(file)?)
            }
        };
        Ok(map)
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => &m[..],
            // SAFETY: the raw map lives as long as `self` and is `len()` bytes long.
            Mapping::Writable(m) => unsafe { slice::from_raw_parts(m.as_ptr(), m.len()) },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Mapping::ReadOnly(m) => m.len(),
            Mapping::Writable(m) => m.len(),
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.bytes().as_ptr()
    }

    pub fn range(&self, off: usize, len: usize) -> Result<&[u8]> {
        self.bytes()
            .get(off..off + len)
            .ok_or(Error::PageNotFound((off / PAGE_SIZE) as Pgno))
    }

    pub fn page(&self, pgno: Pgno) -> Result<&[u8]> {
        self.range(pgno as usize * PAGE_SIZE, PAGE_SIZE)
    }

    #[cfg(unix)]
    fn advise_random(&self) -> io::Result<()> {
        match self {
            Mapping::ReadOnly(m) => m.advise(memmap2::Advice::Random),
            Mapping::Writable(m) => m.advise(memmap2::Advice::Random),
        }
    }
}

/// State shared by all transactions of one environment.
#[derive(Debug)]
pub(crate) struct SharedState {
    /// Latest committed snapshot.
    pub meta: Meta,
    pub readers: ReaderTable,
}

#[derive(Debug)]
pub(crate) struct EnvInner {
    path: PathBuf,
    data_path: PathBuf,
    registry_key: PathBuf,
    file: File,
    flags: AtomicU32,
    max_dbs: u32,
    max_readers: u32,
    pub(crate) map: RwLock<Mapping>,
    pub(crate) state: Mutex<SharedState>,
    pub(crate) writer: WriterGate,
    dbs: RwLock<Vec<Option<DbSlot>>>,
    fatal: AtomicBool,
}

impl EnvInner {
    pub fn flags(&self) -> EnvFlags {
        EnvFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    pub fn max_dbs(&self) -> u32 {
        self.max_dbs
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn set_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
    }

    pub fn oldest_reader(&self) -> Option<u64> {
        lock(&self.state).readers.oldest()
    }

    pub fn publish(&self, meta: Meta) {
        lock(&self.state).meta = meta;
    }

    fn slots(&self) -> RwLockReadGuard<'_, Vec<Option<DbSlot>>> {
        self.dbs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots_mut(&self) -> RwLockWriteGuard<'_, Vec<Option<DbSlot>>> {
        self.dbs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn db_slots(&self) -> Vec<Option<DbSlot>> {
        self.slots().clone()
    }

    pub fn db_slot(&self, dbi: usize) -> Option<DbSlot> {
        self.slots().get(dbi).cloned().flatten()
    }

    pub fn find_db(&self, name: &str) -> Option<u32> {
        self.slots()
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.name.as_deref() == Some(name)))
            .map(|dbi| dbi as u32)
    }

    /// Register a named database handle, reusing the slot of an open one.
    pub fn register_db(&self, name: &str, flags: DbFlags, key_type: KeyType) -> Result<u32> {
        let mut slots = self.slots_mut();
        let slot = DbSlot {
            name: Some(name.to_owned()),
            flags,
            key_type,
        };
        if let Some(dbi) = slots
            .iter()
            .position(|s| matches!(s, Some(s) if s.name.as_deref() == Some(name)))
        {
            slots[dbi] = Some(slot);
            return Ok(dbi as u32);
        }
        let open = slots.iter().skip(CORE_DBS).flatten().count();
        if open >= self.max_dbs as usize {
            return Err(Error::DbsFull);
        }
        match slots.iter().skip(CORE_DBS).position(Option::is_none) {
            Some(idx) => {
                slots[CORE_DBS + idx] = Some(slot);
                Ok((CORE_DBS + idx) as u32)
            }
            None => {
                slots.push(Some(slot));
                Ok((slots.len() - 1) as u32)
            }
        }
    }

    pub fn set_db_slot(&self, dbi: u32, slot: DbSlot) {
        if let Some(entry) = self.slots_mut().get_mut(dbi as usize) {
            *entry = Some(slot);
        }
    }

    pub fn close_slot(&self, dbi: u32) {
        if (dbi as usize) < CORE_DBS {
            return;
        }
        if let Some(entry) = self.slots_mut().get_mut(dbi as usize) {
            *entry = None;
        }
    }

    /// Write committed pages and make sure the file covers `next_pgno` pages.
    pub fn write_pages(&self, map: &Mapping, pages: &[(Pgno, Box<[u8]>)], next_pgno: Pgno) -> Result<()> {
        let flags = self.flags();
        match map {
            Mapping::Writable(raw) => {
                for (pgno, buf) in pages {
                    let off = *pgno as usize * PAGE_SIZE;
                    if off + buf.len() > raw.len() {
                        return Err(Error::MapFull);
                    }
                    // SAFETY: the range is inside the map and only the writer touches
                    // pages that no snapshot references.
                    unsafe {
                        ptr::copy_nonoverlapping(buf.as_ptr(), raw.as_mut_ptr().add(off), buf.len());
                    }
                }
                if !flags.contains(EnvFlags::NOSYNC) {
                    if flags.contains(EnvFlags::MAPASYNC) {
                        raw.flush_async()?;
                    } else {
                        raw.flush()?;
                    }
                }
            }
            Mapping::ReadOnly(_) => {
                for (pgno, buf) in pages {
                    self.file.write_all_at(buf, *pgno * PAGE_SIZE as u64)?;
                }
                let len = next_pgno * PAGE_SIZE as u64;
                if self.file.metadata()?.len() < len {
                    self.file.set_len(len)?;
                }
                if !flags.contains(EnvFlags::NOSYNC) {
                    self.file.sync_data()?;
                }
            }
        }
        Ok(())
    }

    /// Write `meta` into the slot its txn id selects.
    pub fn write_meta(&self, map: &Mapping, meta: &Meta) -> Result<()> {
        let flags = self.flags();
        let slot = Meta::slot_for(meta.txnid);
        let page = meta.encode(slot);
        let off = slot * PAGE_SIZE;
        let sync = !flags.intersects(EnvFlags::NOSYNC | EnvFlags::NOMETASYNC);
        match map {
            Mapping::Writable(raw) => {
                // SAFETY: meta pages are only written by the committing writer.
                unsafe {
                    ptr::copy_nonoverlapping(page.as_ptr(), raw.as_mut_ptr().add(off), PAGE_SIZE);
                }
                if sync {
                    raw.flush_range(off, PAGE_SIZE)?;
                }
            }
            Mapping::ReadOnly(_) => {
                self.file.write_all_at(&page, off as u64)?;
                if sync {
                    self.file.sync_data()?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for EnvInner {
    fn drop(&mut self) {
        lock(&OPEN_FILES).remove(&self.registry_key);
        debug!("closed environment {:?}", self.path);
    }
}

/// Options for opening an [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvOptions {
    /// Size of the memory map in bytes, rounded up to whole pages
    pub map_size: usize,
    /// Number of named databases that may be open at once
    pub max_dbs: u32,
    /// Number of concurrent read transactions
    pub max_readers: u32,
    pub flags: EnvFlags,
}

impl Default for EnvOptions {
    fn default() -> Self {
        EnvOptions {
            map_size: DEFAULT_MAP_SIZE,
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            flags: EnvFlags::empty(),
        }
    }
}

impl EnvOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_size(mut self, size: usize) -> Self {
        self.map_size = size;
        self
    }

    pub fn max_dbs(mut self, dbs: u32) -> Self {
        self.max_dbs = dbs;
        self
    }

    pub fn max_readers(mut self, readers: u32) -> Self {
        self.max_readers = readers;
        self
    }

    fn flag(mut self, flag: EnvFlags, on: bool) -> Self {
        self.flags.set(flag, on);
        self
    }

    pub fn no_subdir(self, on: bool) -> Self {
        self.flag(EnvFlags::NOSUBDIR, on)
    }

    pub fn read_only(self, on: bool) -> Self {
        self.flag(EnvFlags::RDONLY, on)
    }

    pub fn write_map(self, on: bool) -> Self {
        self.flag(EnvFlags::WRITEMAP, on)
    }

    pub fn previous_snapshot(self, on: bool) -> Self {
        self.flag(EnvFlags::PREVSNAPSHOT, on)
    }

    /// Accepted for compatibility; fresh pages are always zeroed.
    pub fn no_mem_init(self, on: bool) -> Self {
        self.flag(EnvFlags::NOMEMINIT, on)
    }

    pub fn no_read_ahead(self, on: bool) -> Self {
        self.flag(EnvFlags::NORDAHEAD, on)
    }

    pub fn no_meta_sync(self, on: bool) -> Self {
        self.flag(EnvFlags::NOMETASYNC, on)
    }

    pub fn no_sync(self, on: bool) -> Self {
        self.flag(EnvFlags::NOSYNC, on)
    }

    pub fn map_async(self, on: bool) -> Self {
        self.flag(EnvFlags::MAPASYNC, on)
    }

    /// Skip the reader table and writer serialization; the caller guarantees both.
    pub fn no_lock(self, on: bool) -> Self {
        self.flag(EnvFlags::NOLOCK, on)
    }

    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Environment> {
        Environment::open(path, self)
    }
}

/// An open data file and the databases inside it.
///
/// Cloning the handle is cheap; the file closes when the last clone and
/// every transaction borrowing it are gone.
#[derive(Debug, Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

fn round_to_pages(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

fn data_file_path(path: &Path, flags: EnvFlags) -> Result<PathBuf> {
    if flags.contains(EnvFlags::NOSUBDIR) {
        return Ok(path.to_path_buf());
    }
    if !flags.contains(EnvFlags::RDONLY) {
        fs::create_dir_all(path)?;
    }
    Ok(path.join(DATA_FILE))
}

fn read_metas(file: &File, previous: bool) -> Result<Meta> {
    let mut slots = [Err(Error::Invalid), Err(Error::Invalid)];
    for (i, slot) in slots.iter_mut().enumerate() {
        let mut buf = vec![0u8; PAGE_SIZE];
        *slot = match file.read_exact_at(&mut buf, (i * PAGE_SIZE) as u64) {
            Ok(()) => Meta::decode(&buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Invalid),
            Err(e) => Err(e.into()),
        };
    }
    choose_meta(slots, previous)
}

impl Environment {
    /// Open or create the environment at `path`.
    ///
    /// Unless `no_subdir` is set `path` is a directory holding the data file.
    pub fn open<P: AsRef<Path>>(path: P, options: &EnvOptions) -> Result<Environment> {
        let path = path.as_ref();
        let flags = options.flags;
        let read_only = flags.contains(EnvFlags::RDONLY);
        let data_path = data_file_path(path, flags)?;
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(&data_path)?;

        let registry_key = fs::canonicalize(&data_path)?;
        if !lock(&OPEN_FILES).insert(registry_key.clone()) {
            return Err(Error::EnvAlreadyOpen);
        }
        match Self::open_file(path, data_path, registry_key.clone(), file, options) {
            Ok(env) => Ok(env),
            Err(e) => {
                lock(&OPEN_FILES).remove(&registry_key);
                Err(e)
            }
        }
    }

    fn open_file(
        path: &Path,
        data_path: PathBuf,
        registry_key: PathBuf,
        file: File,
        options: &EnvOptions,
    ) -> Result<Environment> {
        let flags = options.flags;
        let read_only = flags.contains(EnvFlags::RDONLY);
        if file.metadata()?.len() == 0 {
            if read_only {
                return Err(Error::Invalid);
            }
            let meta = Meta::initial(round_to_pages(options.map_size));
            for slot in 0..META_PAGES {
                file.write_all_at(&meta.encode(slot), (slot * PAGE_SIZE) as u64)?;
            }
            file.sync_all()?;
            info!("initialized new data file {:?}", data_path);
        }
        let meta = read_metas(&file, flags.contains(EnvFlags::PREVSNAPSHOT))?;

        let used = (meta.last_pgno as usize + 1) * PAGE_SIZE;
        let map_size = round_to_pages(options.map_size.max(meta.map_size as usize).max(used));
        let write_map = flags.contains(EnvFlags::WRITEMAP) && !read_only;
        if write_map && file.metadata()?.len() < map_size as u64 {
            file.set_len(map_size as u64)?;
        }
        let map = Mapping::new(&file, map_size, write_map)?;
        #[cfg(unix)]
        if flags.contains(EnvFlags::NORDAHEAD) {
            map.advise_random()?;
        }

        let slots = vec![
            Some(DbSlot {
                name: None,
                flags: meta.free_db().flags,
                key_type: KeyType::Binary,
            }),
            Some(DbSlot {
                name: None,
                flags: meta.main_db().flags,
                key_type: KeyType::Binary,
            }),
        ];
        info!(
            "opened environment {:?} at txn {} (map {} bytes)",
            path, meta.txnid, map_size
        );
        Ok(Environment {
            inner: Arc::new(EnvInner {
                path: path.to_path_buf(),
                data_path,
                registry_key,
                file,
                flags: AtomicU32::new(flags.bits()),
                max_dbs: options.max_dbs,
                max_readers: options.max_readers,
                map: RwLock::new(map),
                state: Mutex::new(SharedState {
                    meta,
                    readers: ReaderTable::new(options.max_readers as usize),
                }),
                writer: WriterGate::default(),
                dbs: RwLock::new(slots),
                fatal: AtomicBool::new(false),
            }),
        })
    }

    /// Begin a write transaction, waiting for the current writer to finish.
    pub fn begin_txn(&self) -> Result<Transaction<'_>> {
        Transaction::begin(&self.inner, false, true)
    }

    /// Begin a write transaction, or fail with `Busy` if another one is active.
    pub fn try_begin_txn(&self) -> Result<Transaction<'_>> {
        Transaction::begin(&self.inner, false, false)
    }

    pub fn begin_ro_txn(&self) -> Result<Transaction<'_>> {
        Transaction::begin(&self.inner, true, true)
    }

    /// Open a database in its own transaction.
    ///
    /// A write transaction is used only when the open may have to create the
    /// database or set the flags of the main database.
    pub fn open_db(&self, name: Option<&str>, options: &DbOptions) -> Result<Database> {
        let needs_write = options.flags.contains(DbFlags::CREATE)
            || (name.is_none() && !options.flags.persistent().is_empty());
        if needs_write && !self.get_flags().contains(EnvFlags::RDONLY) {
            let mut txn = self.begin_txn()?;
            let db = txn.open_db(name, options)?;
            txn.commit()?;
            Ok(db)
        } else {
            let mut txn = self.begin_ro_txn()?;
            txn.open_db(name, options)
        }
    }

    /// Release a database handle. Transactions must not use it afterwards.
    pub fn close_db(&self, db: Database) {
        self.inner.close_slot(db.dbi);
    }

    /// Statistics of the main database.
    pub fn stat(&self) -> Result<Stat> {
        let txn = self.begin_ro_txn()?;
        let main = *txn.meta().main_db();
        txn.tree_stat(&main)
    }

    pub fn info(&self) -> Result<EnvInfo> {
        let map = self.inner.map.read().unwrap_or_else(PoisonError::into_inner);
        let shared = lock(&self.inner.state);
        Ok(EnvInfo {
            map_addr: map.as_ptr() as usize,
            map_size: map.len(),
            last_pgno: shared.meta.last_pgno,
            last_txnid: shared.meta.txnid,
            max_readers: self.inner.max_readers,
            num_readers: shared.readers.active() as u32,
        })
    }

    /// Human-readable dump of the reader table.
    pub fn readers(&self) -> String {
        let readers = self.reader_list();
        if readers.is_empty() {
            return "(no active readers)\n".to_string();
        }
        let mut out = String::from("    pid             thread     txnid\n");
        for r in readers {
            let txnid = r.txnid.map_or_else(|| "-".to_string(), |id| id.to_string());
            let _ = writeln!(out, "{:>7} {:>18} {:>9}", r.pid, r.thread, txnid);
        }
        out
    }

    pub fn reader_list(&self) -> Vec<ReaderInfo> {
        lock(&self.inner.state).readers.list()
    }

    /// Clear reader slots left behind by exited threads. Returns how many were cleared.
    pub fn reader_check(&self) -> Result<usize> {
        let cleared = lock(&self.inner.state).readers.clear_stale();
        if cleared > 0 {
            info!("cleared {} stale readers", cleared);
        }
        Ok(cleared)
    }

    /// Number of pages recorded in the free-page database.
    pub fn free_pages_count(&self) -> Result<usize> {
        let txn = self.begin_ro_txn()?;
        let free = *txn.meta().free_db();
        txn.free_page_total(&free)
    }

    /// Change the map size. No transaction may be active.
    pub fn resize(&self, new_size: usize) -> Result<()> {
        if self.inner.writer.is_held() {
            return Err(Error::TxnsActive);
        }
        let mut map = match self.inner.map.try_write() {
            Ok(map) => map,
            Err(TryLockError::WouldBlock) => return Err(Error::TxnsActive),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        let new_size = round_to_pages(new_size);
        let mut shared = lock(&self.inner.state);
        let used = (shared.meta.last_pgno as usize + 1) * PAGE_SIZE;
        if new_size < used {
            return Err(Error::EnvInvalidMapSize(new_size));
        }
        let write_map = matches!(*map, Mapping::Writable(_));
        if write_map && self.inner.file.metadata()?.len() < new_size as u64 {
            self.inner.file.set_len(new_size as u64)?;
        }
        *map = Mapping::new(&self.inner.file, new_size, write_map)?;
        #[cfg(unix)]
        if self.get_flags().contains(EnvFlags::NORDAHEAD) {
            map.advise_random()?;
        }
        shared.meta.map_size = new_size as u64;
        info!("resized map of {:?} to {} bytes", self.inner.path, new_size);
        Ok(())
    }

    /// Write a consistent copy of the latest snapshot to `path`.
    ///
    /// With `compact` the databases are rebuilt in key order, leaving out free
    /// pages; otherwise the used part of the file is copied as is.
    pub fn copy<P: AsRef<Path>>(&self, path: P, compact: bool) -> Result<()> {
        let flags = self.get_flags() & EnvFlags::NOSUBDIR;
        let path = path.as_ref();
        if compact {
            return self.copy_compact(path, flags);
        }
        let target = data_file_path(path, flags)?;
        let out = OpenOptions::new().write(true).create_new(true).open(&target)?;
        let txn = self.begin_ro_txn()?;
        let meta = *txn.meta();
        let data_pages = meta.last_pgno as usize + 1 - META_PAGES;
        if data_pages > 0 {
            let bytes = txn
                .mapping()
                .range(META_PAGES * PAGE_SIZE, data_pages * PAGE_SIZE)?;
            out.write_all_at(bytes, (META_PAGES * PAGE_SIZE) as u64)?;
        }
        for slot in 0..META_PAGES {
            out.write_all_at(&meta.encode(slot), (slot * PAGE_SIZE) as u64)?;
        }
        out.sync_all()?;
        info!("copied {:?} at txn {} to {:?}", self.inner.path, meta.txnid, target);
        Ok(())
    }

    fn copy_compact(&self, path: &Path, flags: EnvFlags) -> Result<()> {
        let target = data_file_path(path, flags)?;
        if target.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            )
            .into());
        }
        let src = self.begin_ro_txn()?;
        let main = *src.meta().main_db();
        let options = EnvOptions {
            map_size: src.mapping().len(),
            max_dbs: self.inner.max_dbs.max(1),
            max_readers: DEFAULT_MAX_READERS,
            flags,
        };
        let dest = Environment::open(path, &options)?;
        let mut dst = dest.begin_txn()?;

        let dst_main = dst.open_db(None, &DbOptions { flags: main.flags, key_type: KeyType::Binary })?;
        let mut named = Vec::new();
        copy_entries(&src, &main, &mut dst, dst_main, Some(&mut named))?;
        for (name, record) in named {
            let options = DbOptions {
                flags: record.flags | DbFlags::CREATE,
                key_type: KeyType::Binary,
            };
            let db = dst.open_db(Some(&name), &options)?;
            copy_entries(&src, &record, &mut dst, db, None)?;
        }
        let txnid = src.id();
        dst.commit()?;
        info!("compacted {:?} at txn {} into {:?}", self.inner.path, txnid, target);
        Ok(())
    }

    /// Flush committed data to disk. Without `force`, an environment opened
    /// with `no_sync` is left alone.
    pub fn sync(&self, force: bool) -> Result<()> {
        let flags = self.get_flags();
        if flags.contains(EnvFlags::RDONLY) {
            return Err(Error::EnvReadOnly);
        }
        if flags.contains(EnvFlags::NOSYNC) && !force {
            return Ok(());
        }
        let map = self.inner.map.read().unwrap_or_else(PoisonError::into_inner);
        match &*map {
            Mapping::Writable(raw) if flags.contains(EnvFlags::MAPASYNC) && !force => raw.flush_async()?,
            Mapping::Writable(raw) => raw.flush()?,
            Mapping::ReadOnly(_) => self.inner.file.sync_all()?,
        }
        Ok(())
    }

    /// Close this handle.
    pub fn close(self) {
        debug!("closing handle to {:?}", self.inner.path);
    }

    /// Release a zero-copy view obtained from this environment.
    pub fn detach_buffer(&self, view: UnsafeView) {
        view.detach();
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn data_file(&self) -> &Path {
        &self.inner.data_path
    }

    pub fn max_key_size(&self) -> usize {
        MAX_KEY_SIZE
    }

    pub fn max_readers(&self) -> u32 {
        self.inner.max_readers
    }

    pub fn max_dbs(&self) -> u32 {
        self.inner.max_dbs
    }

    pub fn get_flags(&self) -> EnvFlags {
        self.inner.flags()
    }

    /// Turn runtime-changeable flags on or off.
    pub fn set_flags(&self, flags: EnvFlags, on: bool) -> Result<()> {
        if !CHANGEABLE.contains(flags) {
            return Err(Error::Incompatible);
        }
        if on {
            self.inner.flags.fetch_or(flags.bits(), Ordering::SeqCst);
        } else {
            self.inner.flags.fetch_and(!flags.bits(), Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Re-insert every entry of one tree in key order.
///
/// Catalog entries of named databases found in the main tree are collected
/// into `named` instead of being copied.
fn copy_entries(
    src: &Transaction<'_>,
    record: &DbRecord,
    dst: &mut Transaction<'_>,
    db: Database,
    mut named: Option<&mut Vec<(String, DbRecord)>>,
) -> Result<()> {
    let dups = record.flags.contains(DbFlags::DUPSORT);
    let mut tc = TreeCursor::new(record.root);
    let mut more = tc.first(src)?;
    while more {
        let node = tc.leaf(src)?;
        if dups {
            for value in src.dup_values(&node)? {
                dst.put(db, node.key, value, WriteFlags::APPEND | WriteFlags::APPENDDUP)?;
            }
        } else if node.flags.contains(NodeFlags::SUBDATA) {
            let name = String::from_utf8(node.key.to_vec())
                .map_err(|_| Error::Corrupted("database name is not utf-8".into()))?;
            match named.as_deref_mut() {
                Some(list) => list.push((name, DbRecord::decode(node.data)?)),
                None => warn!("skipping nested database record {:?}", name),
            }
        } else {
            dst.put(db, node.key, src.node_value(&node)?, WriteFlags::APPEND)?;
        }
        more = tc.step(src, true)?;
    }
    Ok(())
}
