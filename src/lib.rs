//! Embedded key-value store built on a copy-on-write B+tree.
//!
//! An [`Environment`] maps one data file into memory. Readers get a
//! consistent snapshot without locking; a single writer at a time builds
//! the next snapshot out of fresh pages and publishes it on commit.
//!
//! ```no_run
//! use lumokv::{DbOptions, EnvOptions, Environment, WriteFlags};
//!
//! # fn main() -> lumokv::Result<()> {
//! let env = Environment::open("/tmp/store", &EnvOptions::new())?;
//! let db = env.open_db(None, &DbOptions::new())?;
//!
//! let mut txn = env.begin_txn()?;
//! txn.put(db, b"greeting", b"hello", WriteFlags::empty())?;
//! txn.commit()?;
//!
//! let txn = env.begin_ro_txn()?;
//! assert_eq!(txn.get(db, b"greeting")?, Some(&b"hello"[..]));
//! # Ok(())
//! # }
//! ```

mod batch;
mod btree;
mod constants;
mod cursor;
mod database;
mod env;
mod error;
mod lock;
mod meta;
mod midl;
mod page;
mod transaction;
mod types;
mod value;

pub use batch::{BatchAction, BatchOperation, BatchOptions, BatchResult, Condition};
pub use constants::{DbFlags, EnvFlags, WriteFlags, MAX_KEY_SIZE, PAGE_SIZE};
pub use cursor::{Cursor, Entry, Iter, RwCursor};
pub use database::{DbOptions, Database};
pub use env::{EnvOptions, Environment};
pub use error::{Error, Result};
pub use transaction::Transaction;
pub use types::{CursorOp, EnvInfo, ReaderInfo, Stat};
pub use value::{decode_boolean, decode_number, decode_str, Key, KeyType, UnsafeView, Value};
