use std::io;
use std::result;

use thiserror::Error;

/// Custom result type for engine operations
pub type Result<T> = result::Result<T, Error>;

/// Engine error kinds
#[derive(Debug, Error)]
pub enum Error {
    /// Key/data pair already exists
    #[error("key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found
    #[error("no matching key/data pair found")]
    NotFound,
    /// Requested page not found
    #[error("requested page {0} not found")]
    PageNotFound(u64),
    /// Database file is corrupted
    #[error("database file is corrupted: {0}")]
    Corrupted(String),
    /// Update of meta page failed, the environment is unusable
    #[error("environment had a fatal error")]
    Panic,
    /// Database version mismatch
    #[error("database version mismatch: file has {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    /// File is not a valid data file
    #[error("file is not a valid data file")]
    Invalid,
    /// Environment mapsize limit reached
    #[error("environment mapsize limit reached")]
    MapFull,
    /// Environment maxdbs limit reached
    #[error("environment maxdbs limit reached")]
    DbsFull,
    /// Environment maxreaders limit reached
    #[error("environment maxreaders limit reached")]
    ReadersFull,
    /// Operation and DB incompatible
    #[error("operation and database incompatible")]
    Incompatible,
    /// Transaction must abort, is finished, or is invalid
    #[error("transaction must abort, is finished, or is invalid")]
    BadTxn,
    /// Unsupported size of key/DB name/data, or wrong DUPFIXED size
    #[error("unsupported size of key/DB name/data, or wrong DUPFIXED size")]
    BadValSize,
    /// The database handle is not valid in this transaction
    #[error("invalid database handle")]
    BadDbi,
    /// Another write transaction is active
    #[error("another write transaction is active")]
    Busy,
    /// Operation needs an environment without live transactions
    #[error("transactions are still active")]
    TxnsActive,
    /// Environment is already open in this process
    #[error("environment is already open")]
    EnvAlreadyOpen,
    /// Environment is read-only
    #[error("environment is read-only")]
    EnvReadOnly,
    /// Transaction is read-only
    #[error("transaction is read-only")]
    TxnReadOnly,
    /// Environment map size is invalid
    #[error("invalid map size {0}")]
    EnvInvalidMapSize(usize),
    /// Cursor has no current position
    #[error("cursor is not positioned")]
    CursorNotPositioned,
    /// Stored bytes don't decode as the requested type
    #[error("stored value cannot be decoded as {0}")]
    InvalidValue(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the error leaves a write transaction unusable.
    pub fn poisons_txn(&self) -> bool {
        matches!(
            self,
            Error::MapFull
                | Error::Corrupted(_)
                | Error::PageNotFound(_)
                | Error::Panic
                | Error::Io(_)
        )
    }

    /// Structural inconsistency; the environment should be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Corrupted(_) | Error::PageNotFound(_) | Error::Panic
        )
    }

    pub(crate) fn corrupted(pgno: u64, what: &str) -> Error {
        Error::Corrupted(format!("page {}: {}", pgno, what))
    }
}
