use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use crate::error::{Error, Result};
use crate::types::ReaderInfo;

/// Lock a mutex, ignoring poisoning: the protected state is only ever
/// replaced wholesale, never left half-updated.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes write transactions.
#[derive(Debug, Default)]
pub(crate) struct WriterGate {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// Proof of being the single writer; released on drop.
#[derive(Debug)]
pub(crate) struct WritePermit<'a> {
    gate: &'a WriterGate,
}

impl WriterGate {
    /// Take the writer permit, waiting for the current writer unless `block` is false.
    ///
    /// A thread that already holds the permit gets `Busy` instead of waiting on itself.
    pub fn acquire(&self, block: bool) -> Result<WritePermit<'_>> {
        let me = thread::current().id();
        let mut owner = lock(&self.owner);
        loop {
            match *owner {
                None => break,
                Some(id) if id == me => return Err(Error::Busy),
                Some(_) if !block => return Err(Error::Busy),
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        *owner = Some(me);
        Ok(WritePermit { gate: self })
    }

    pub fn is_held(&self) -> bool {
        lock(&self.owner).is_some()
    }
}

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        *lock(&self.gate.owner) = None;
        self.gate.released.notify_one();
    }
}

thread_local! {
    static THREAD_ALIVE: Arc<()> = Arc::new(());
}

#[derive(Debug)]
struct ReaderSlot {
    pid: u32,
    thread_name: String,
    alive: Weak<()>,
    txnid: Option<u64>,
}

/// In-process table of read transactions and the snapshots they pin.
#[derive(Debug)]
pub(crate) struct ReaderTable {
    slots: Vec<Option<ReaderSlot>>,
    max: usize,
}

impl ReaderTable {
    pub fn new(max: usize) -> Self {
        ReaderTable {
            slots: Vec::new(),
            max,
        }
    }

    /// Claim a slot for the calling thread pinning `txnid`.
    pub fn register(&mut self, txnid: u64) -> Result<usize> {
        let current = thread::current();
        let slot = ReaderSlot {
            pid: std::process::id(),
            thread_name: current
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{:?}", current.id())),
            alive: THREAD_ALIVE.with(Arc::downgrade),
            txnid: Some(txnid),
        };
        if let Some(idx) = self.slots.iter().position(Option::is_none) {
            self.slots[idx] = Some(slot);
            return Ok(idx);
        }
        if self.slots.len() >= self.max {
            if self.clear_stale() == 0 {
                return Err(Error::ReadersFull);
            }
            return self.register(txnid);
        }
        self.slots.push(Some(slot));
        Ok(self.slots.len() - 1)
    }

    pub fn set_txnid(&mut self, idx: usize, txnid: Option<u64>) {
        if let Some(Some(slot)) = self.slots.get_mut(idx) {
            slot.txnid = txnid;
        }
    }

    pub fn release(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = None;
        }
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }

    /// Oldest snapshot still pinned by a live reader.
    pub fn oldest(&self) -> Option<u64> {
        self.slots.iter().flatten().filter_map(|s| s.txnid).min()
    }

    pub fn active(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Drop slots whose owning thread has exited. Returns how many were cleared.
    pub fn clear_stale(&mut self) -> usize {
        let mut cleared = 0;
        for slot in self.slots.iter_mut() {
            let stale = matches!(slot, Some(s) if s.alive.strong_count() == 0);
            if stale {
                if let Some(s) = slot.take() {
                    log::warn!(
                        "clearing stale reader slot of thread {} (pid {}, txn {:?})",
                        s.thread_name,
                        s.pid,
                        s.txnid
                    );
                }
                cleared += 1;
            }
        }
        cleared
    }

    pub fn list(&self) -> Vec<ReaderInfo> {
        self.slots
            .iter()
            .flatten()
            .map(|s| ReaderInfo {
                pid: s.pid,
                thread: s.thread_name.clone(),
                txnid: s.txnid,
            })
            .collect()
    }
}
