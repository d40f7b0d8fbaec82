//! Conditional batch writes.
//!
//! A batch runs in a single write transaction. Operations are applied in
//! order and each condition is checked against the transaction as it stands,
//! so a later operation sees the effect of earlier ones in the same batch.
//! Failed conditions are reported per operation; only an error aborts the
//! batch.

use std::fmt;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use log::debug;
use once_cell::sync::Lazy;

use crate::constants::WriteFlags;
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::lock::lock;
use crate::transaction::Transaction;

/// Only one background batch runs at a time in the process.
static BATCH_WORKER: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Outcome of one batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchResult {
    Success = 0,
    ConditionNotMet = 1,
    NotFound = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAction {
    Put(Vec<u8>),
    /// Delete the key with all its values.
    Delete,
    /// Delete one value of a duplicate-sorted key.
    DeleteValue(Vec<u8>),
}

/// Guard on the value stored at the operation's key, or at another key or database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Expected value, or its prefix unless `exact` is set
    pub value: Vec<u8>,
    pub exact: bool,
    pub key: Option<Vec<u8>>,
    pub db: Option<Database>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    pub db: Database,
    pub key: Vec<u8>,
    pub action: BatchAction,
    pub condition: Option<Condition>,
}

impl BatchOperation {
    pub fn put(db: Database, key: &[u8], value: &[u8]) -> Self {
        BatchOperation {
            db,
            key: key.to_vec(),
            action: BatchAction::Put(value.to_vec()),
            condition: None,
        }
    }

    pub fn delete(db: Database, key: &[u8]) -> Self {
        BatchOperation {
            db,
            key: key.to_vec(),
            action: BatchAction::Delete,
            condition: None,
        }
    }

    pub fn delete_value(db: Database, key: &[u8], value: &[u8]) -> Self {
        BatchOperation {
            db,
            key: key.to_vec(),
            action: BatchAction::DeleteValue(value.to_vec()),
            condition: None,
        }
    }

    fn condition_mut(&mut self) -> &mut Condition {
        self.condition.get_or_insert_with(|| Condition {
            value: Vec::new(),
            exact: false,
            key: None,
            db: None,
        })
    }

    /// Apply only if the stored value starts with `prefix`.
    pub fn if_value(mut self, prefix: &[u8]) -> Self {
        self.condition_mut().value = prefix.to_vec();
        self
    }

    /// Require the stored value to equal the condition value, not just start with it.
    pub fn if_exact_match(mut self) -> Self {
        self.condition_mut().exact = true;
        self
    }

    /// Check the condition against `key` instead of the operation's key.
    pub fn if_key(mut self, key: &[u8]) -> Self {
        self.condition_mut().key = Some(key.to_vec());
        self
    }

    /// Check the condition in `db` instead of the operation's database.
    pub fn if_db(mut self, db: Database) -> Self {
        self.condition_mut().db = Some(db);
        self
    }
}

/// Options of a batch write.
#[derive(Default)]
pub struct BatchOptions {
    /// Flags for every put of the batch
    pub flags: WriteFlags,
    /// Called with the results so far after each operation
    pub progress: Option<Box<dyn FnMut(&[BatchResult]) + Send>>,
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("flags", &self.flags)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: WriteFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn progress(mut self, progress: impl FnMut(&[BatchResult]) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }
}

fn check_condition(txn: &Transaction<'_>, op: &BatchOperation) -> Result<Option<BatchResult>> {
    let Some(cond) = &op.condition else {
        return Ok(None);
    };
    let db = cond.db.unwrap_or(op.db);
    let key = cond.key.as_deref().unwrap_or(&op.key);
    let Some(stored) = txn.get(db, key)? else {
        return Ok(Some(BatchResult::NotFound));
    };
    let matched = if cond.exact {
        stored == cond.value.as_slice()
    } else {
        stored.starts_with(&cond.value)
    };
    Ok((!matched).then_some(BatchResult::ConditionNotMet))
}

/// Apply one operation inside `txn`.
pub(crate) fn apply(txn: &mut Transaction<'_>, op: &BatchOperation, flags: WriteFlags) -> Result<BatchResult> {
    if let Some(result) = check_condition(txn, op)? {
        return Ok(result);
    }
    let found = match &op.action {
        BatchAction::Put(value) => match txn.put(op.db, &op.key, value, flags) {
            Ok(()) => true,
            Err(Error::KeyExist) => return Ok(BatchResult::ConditionNotMet),
            Err(e) => return Err(e),
        },
        BatchAction::Delete => txn.del(op.db, &op.key, None)?,
        BatchAction::DeleteValue(value) => txn.del(op.db, &op.key, Some(value))?,
    };
    Ok(if found {
        BatchResult::Success
    } else {
        BatchResult::NotFound
    })
}

impl Environment {
    /// Run `ops` in one write transaction and commit it.
    ///
    /// Returns one result per operation, in order. Any error aborts the whole
    /// batch and is returned instead.
    pub fn batch_write(&self, ops: &[BatchOperation], mut options: BatchOptions) -> Result<Vec<BatchResult>> {
        let mut txn = self.begin_txn()?;
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            results.push(apply(&mut txn, op, options.flags)?);
            if let Some(progress) = options.progress.as_mut() {
                progress(&results);
            }
        }
        let txnid = txn.id();
        txn.commit()?;
        debug!(
            "batch txn {}: {} operations, {} applied",
            txnid,
            results.len(),
            results.iter().filter(|r| **r == BatchResult::Success).count()
        );
        Ok(results)
    }

    /// Run a batch on a background thread and pass its outcome to `callback`.
    ///
    /// Background batches run one at a time. The returned handle finishes
    /// after `callback` has run.
    pub fn batch_write_async<F>(&self, ops: Vec<BatchOperation>, options: BatchOptions, callback: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(Result<Vec<BatchResult>>) + Send + 'static,
    {
        let env = self.clone();
        let handle = thread::Builder::new()
            .name("batch-writer".into())
            .spawn(move || {
                let _worker = lock(&BATCH_WORKER);
                callback(env.batch_write(&ops, options));
            })?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::KeyType;

    #[test]
    fn guard_builders_share_one_condition() {
        let db = Database {
            dbi: 1,
            flags: crate::constants::DbFlags::empty(),
            key_type: KeyType::Binary,
        };
        let other = Database { dbi: 2, ..db };
        let op = BatchOperation::put(db, b"k", b"v")
            .if_value(b"pre")
            .if_exact_match()
            .if_key(b"guard")
            .if_db(other);
        assert_eq!(
            op.condition,
            Some(Condition {
                value: b"pre".to_vec(),
                exact: true,
                key: Some(b"guard".to_vec()),
                db: Some(other),
            })
        );
        assert_eq!(BatchOperation::delete(db, b"k").condition, None);
        assert_eq!(BatchResult::NotFound as u8, 2);
    }
}
