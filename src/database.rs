use std::cmp::Ordering;

use crate::constants::{DbFlags, WriteFlags};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::types::Stat;
use crate::value::KeyType;

/// Handle to a database opened in an environment.
///
/// Handles are cheap to copy and valid in any transaction of the environment
/// that opened them, until the database is closed or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Database {
    pub(crate) dbi: u32,
    pub(crate) flags: DbFlags,
    pub(crate) key_type: KeyType,
}

impl Database {
    /// Open (or with `create`, create) a database inside `txn`.
    pub fn open(txn: &mut Transaction<'_>, name: Option<&str>, options: &DbOptions) -> Result<Self> {
        txn.open_db(name, options)
    }

    pub fn dbi(&self) -> u32 {
        self.dbi
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn get<'txn>(&self, txn: &'txn Transaction<'_>, key: &[u8]) -> Result<Option<&'txn [u8]>> {
        txn.get(*self, key)
    }

    pub fn put(&self, txn: &mut Transaction<'_>, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        txn.put(*self, key, data, flags)
    }

    pub fn del(&self, txn: &mut Transaction<'_>, key: &[u8], data: Option<&[u8]>) -> Result<bool> {
        txn.del(*self, key, data)
    }

    pub fn stat(&self, txn: &Transaction<'_>) -> Result<Stat> {
        txn.db_stat(*self)
    }

    pub fn flags(&self, txn: &Transaction<'_>) -> Result<DbFlags> {
        txn.db_flags(*self)
    }
}

/// Options for opening a database.
#[derive(Debug, Clone, Default)]
pub struct DbOptions {
    pub flags: DbFlags,
    pub key_type: KeyType,
}

impl DbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(mut self, flag: DbFlags, on: bool) -> Self {
        self.flags.set(flag, on);
        self
    }

    pub fn create(self, on: bool) -> Self {
        self.set(DbFlags::CREATE, on)
    }

    pub fn reverse_key(self, on: bool) -> Self {
        self.set(DbFlags::REVERSEKEY, on)
    }

    pub fn dup_sort(self, on: bool) -> Self {
        self.set(DbFlags::DUPSORT, on)
    }

    /// Fixed-size duplicates; implies `dup_sort`.
    pub fn dup_fixed(self, on: bool) -> Self {
        let s = self.set(DbFlags::DUPFIXED, on);
        if on {
            s.set(DbFlags::DUPSORT, true)
        } else {
            s
        }
    }

    /// Order duplicates as native-endian integers; implies `dup_sort`.
    pub fn integer_dup(self, on: bool) -> Self {
        let s = self.set(DbFlags::INTEGERDUP, on);
        if on {
            s.set(DbFlags::DUPSORT, true)
        } else {
            s
        }
    }

    pub fn reverse_dup(self, on: bool) -> Self {
        let s = self.set(DbFlags::REVERSEDUP, on);
        if on {
            s.set(DbFlags::DUPSORT, true)
        } else {
            s
        }
    }

    pub fn integer_key(self, on: bool) -> Self {
        self.set(DbFlags::INTEGERKEY, on)
    }

    /// `KeyType::Uint32` also selects integer key order.
    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        if key_type == KeyType::Uint32 {
            self.flags.insert(DbFlags::INTEGERKEY);
        }
        self
    }
}

/// Byte-sequence orderings a database can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyCmp {
    Lexical,
    /// Compare from the last byte backwards.
    Reverse,
    /// Native-endian unsigned integers of 4 or 8 bytes.
    Integer,
}

impl KeyCmp {
    pub fn for_keys(flags: DbFlags) -> KeyCmp {
        if flags.contains(DbFlags::INTEGERKEY) {
            KeyCmp::Integer
        } else if flags.contains(DbFlags::REVERSEKEY) {
            KeyCmp::Reverse
        } else {
            KeyCmp::Lexical
        }
    }

    pub fn for_dups(flags: DbFlags) -> KeyCmp {
        if flags.contains(DbFlags::INTEGERDUP) {
            KeyCmp::Integer
        } else if flags.contains(DbFlags::REVERSEDUP) {
            KeyCmp::Reverse
        } else {
            KeyCmp::Lexical
        }
    }

    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyCmp::Lexical => a.cmp(b),
            KeyCmp::Reverse => a.iter().rev().cmp(b.iter().rev()),
            KeyCmp::Integer => {
                if a.len() != b.len() {
                    return a.len().cmp(&b.len());
                }
                match (<[u8; 4]>::try_from(a), <[u8; 4]>::try_from(b)) {
                    (Ok(x), Ok(y)) => u32::from_ne_bytes(x).cmp(&u32::from_ne_bytes(y)),
                    _ => match (<[u8; 8]>::try_from(a), <[u8; 8]>::try_from(b)) {
                        (Ok(x), Ok(y)) => u64::from_ne_bytes(x).cmp(&u64::from_ne_bytes(y)),
                        _ => a.cmp(b),
                    },
                }
            }
        }
    }

    /// Reject byte strings the ordering cannot handle.
    pub fn check(self, bytes: &[u8]) -> Result<()> {
        match self {
            KeyCmp::Integer if bytes.len() != 4 && bytes.len() != 8 => Err(Error::BadValSize),
            _ => Ok(()),
        }
    }
}

/// How the duplicates of one key are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DupLayout {
    pub cmp: KeyCmp,
    pub fixed: bool,
}

/// Orderings of one database, derived from its persistent flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TreeLayout {
    pub key_cmp: KeyCmp,
    pub dup: Option<DupLayout>,
}

impl TreeLayout {
    pub fn from_flags(flags: DbFlags) -> Self {
        TreeLayout {
            key_cmp: KeyCmp::for_keys(flags),
            dup: flags.contains(DbFlags::DUPSORT).then(|| DupLayout {
                cmp: KeyCmp::for_dups(flags),
                fixed: flags.contains(DbFlags::DUPFIXED),
            }),
        }
    }
}

/// Environment-wide registration of an open database handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DbSlot {
    pub name: Option<String>,
    pub flags: DbFlags,
    pub key_type: KeyType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_carry_no_flags() {
        let options = DbOptions::default();
        assert!(options.flags.is_empty());
        assert_eq!(options.key_type, KeyType::Binary);
        assert_eq!(DbOptions::new().dup_sort(true).flags, DbFlags::DUPSORT);
    }

    #[test]
    fn reverse_order_compares_suffixes() {
        let cmp = KeyCmp::Reverse;
        assert_eq!(cmp.compare(b"ba", b"ab"), Ordering::Less);
        assert_eq!(cmp.compare(b"a", b"ba"), Ordering::Less);
        assert_eq!(cmp.compare(b"ab", b"ab"), Ordering::Equal);
    }

    #[test]
    fn integer_order_is_numeric() {
        let cmp = KeyCmp::Integer;
        let two = 2u32.to_ne_bytes();
        let big = 256u32.to_ne_bytes();
        assert_eq!(cmp.compare(&two, &big), Ordering::Less);
        assert_eq!(cmp.compare(&two, &7u64.to_ne_bytes()), Ordering::Less);
        assert!(matches!(cmp.check(b"abc"), Err(Error::BadValSize)));
    }

    #[test]
    fn dup_options_imply_dup_sort() {
        let opts = DbOptions::new().dup_fixed(true);
        assert!(opts.flags.contains(DbFlags::DUPSORT | DbFlags::DUPFIXED));
        let opts = DbOptions::new().key_type(KeyType::Uint32);
        assert!(opts.flags.contains(DbFlags::INTEGERKEY));
        let layout = TreeLayout::from_flags(DbFlags::DUPSORT | DbFlags::REVERSEDUP);
        assert_eq!(layout.dup.map(|d| d.cmp), Some(KeyCmp::Reverse));
    }
}
