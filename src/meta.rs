use crate::constants::{
    DbFlags, PageFlags, CORE_DBS, DATA_VERSION, FREE_DBI, MAIN_DBI, MDB_MAGIC, META_PAGES,
    PAGE_SIZE, P_INVALID,
};
use crate::error::{Error, Result};
use crate::page::{self, PAGE_HEADER_SIZE};

/// Persisted per-database record: the root of one B+tree.
///
/// Also the value of a named-database catalog entry and of a duplicate
/// sub-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DbRecord {
    /// Database flags
    pub flags: DbFlags,
    /// Depth of B-tree, 0 when empty
    pub depth: u16,
    /// Number of data entries
    pub entries: u64,
    /// Root page number
    pub root: u64,
}

pub(crate) const DB_RECORD_SIZE: usize = 24;

impl DbRecord {
    pub fn empty(flags: DbFlags) -> Self {
        DbRecord {
            flags: flags.persistent(),
            depth: 0,
            entries: 0,
            root: P_INVALID,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root == P_INVALID
    }

    pub fn encode(&self) -> [u8; DB_RECORD_SIZE] {
        let mut buf = [0u8; DB_RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[4..6].copy_from_slice(&self.depth.to_le_bytes());
        buf[8..16].copy_from_slice(&self.entries.to_le_bytes());
        buf[16..24].copy_from_slice(&self.root.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DB_RECORD_SIZE {
            return Err(Error::Corrupted(format!(
                "database record of {} bytes",
                bytes.len()
            )));
        }
        Ok(DbRecord {
            flags: DbFlags::from_bits_truncate(read_u32(bytes, 0)),
            depth: u16::from_le_bytes([bytes[4], bytes[5]]),
            entries: read_u64(bytes, 8),
            root: read_u64(bytes, 16),
        })
    }
}

/// Meta page contents: the root record of one committed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Meta {
    /// Magic number identifying the file
    pub magic: u32,
    /// Version number
    pub version: u32,
    /// Page size for this file
    pub page_size: u32,
    /// Size of mmap region
    pub map_size: u64,
    /// First is free space, 2nd is main db
    pub dbs: [DbRecord; CORE_DBS],
    /// Last used page in the datafile
    pub last_pgno: u64,
    /// txnid that committed this page
    pub txnid: u64,
}

const META_BODY_END: usize = PAGE_HEADER_SIZE + 88;

impl Meta {
    pub fn initial(map_size: usize) -> Self {
        Meta {
            magic: MDB_MAGIC,
            version: DATA_VERSION,
            page_size: PAGE_SIZE as u32,
            map_size: map_size as u64,
            dbs: [
                DbRecord::empty(DbFlags::INTEGERKEY),
                DbRecord::empty(DbFlags::empty()),
            ],
            last_pgno: META_PAGES as u64 - 1,
            txnid: 0,
        }
    }

    pub fn free_db(&self) -> &DbRecord {
        &self.dbs[FREE_DBI as usize]
    }

    pub fn main_db(&self) -> &DbRecord {
        &self.dbs[MAIN_DBI as usize]
    }

    /// Meta slot a transaction commits into: never the one holding its base snapshot.
    pub fn slot_for(txnid: u64) -> usize {
        (txnid % META_PAGES as u64) as usize
    }

    /// Serialize into a full page for the given slot; the checksum goes last.
    pub fn encode(&self, slot: usize) -> Box<[u8]> {
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        page::write_header(&mut buf, slot as u64, PageFlags::META, 0, 0);
        let b = &mut buf[PAGE_HEADER_SIZE..];
        b[0..4].copy_from_slice(&self.magic.to_le_bytes());
        b[4..8].copy_from_slice(&self.version.to_le_bytes());
        b[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        b[16..24].copy_from_slice(&self.map_size.to_le_bytes());
        b[24..48].copy_from_slice(&self.dbs[0].encode());
        b[48..72].copy_from_slice(&self.dbs[1].encode());
        b[72..80].copy_from_slice(&self.last_pgno.to_le_bytes());
        b[80..88].copy_from_slice(&self.txnid.to_le_bytes());
        let crc = crc32fast::hash(&buf[PAGE_HEADER_SIZE..META_BODY_END]);
        buf[META_BODY_END..META_BODY_END + 4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < META_BODY_END + 4 {
            return Err(Error::Invalid);
        }
        let view = page::PageView::new(bytes);
        if !view.flags().contains(PageFlags::META) {
            return Err(Error::Invalid);
        }
        let b = &bytes[PAGE_HEADER_SIZE..];
        let magic = read_u32(b, 0);
        if magic != MDB_MAGIC {
            return Err(Error::Invalid);
        }
        let version = read_u32(b, 4);
        if version != DATA_VERSION {
            return Err(Error::VersionMismatch {
                found: version,
                expected: DATA_VERSION,
            });
        }
        let stored = read_u32(bytes, META_BODY_END);
        if crc32fast::hash(&bytes[PAGE_HEADER_SIZE..META_BODY_END]) != stored {
            return Err(Error::Corrupted(format!(
                "meta page {} checksum mismatch",
                view.pgno()
            )));
        }
        let meta = Meta {
            magic,
            version,
            page_size: read_u32(b, 8),
            map_size: read_u64(b, 16),
            dbs: [DbRecord::decode(&b[24..48])?, DbRecord::decode(&b[48..72])?],
            last_pgno: read_u64(b, 72),
            txnid: read_u64(b, 80),
        };
        if meta.page_size as usize != PAGE_SIZE {
            return Err(Error::Incompatible);
        }
        Ok(meta)
    }
}

/// Pick the snapshot to open from the two meta slots.
///
/// A slot that fails validation is skipped so a torn meta write falls back to
/// the other slot; `previous` selects the older of two valid slots.
pub(crate) fn choose_meta(slots: [Result<Meta>; META_PAGES], previous: bool) -> Result<Meta> {
    let [a, b] = slots;
    match (a, b) {
        (Ok(a), Ok(b)) => {
            let (newer, older) = if a.txnid >= b.txnid { (a, b) } else { (b, a) };
            Ok(if previous { older } else { newer })
        }
        (Ok(m), Err(e)) | (Err(e), Ok(m)) => {
            log::warn!("ignoring unreadable meta page: {}", e);
            Ok(m)
        }
        (Err(e), Err(_)) => Err(e),
    }
}

fn read_u32(b: &[u8], off: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&b[off..off + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(b: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_survives_encoding_and_detects_torn_writes() {
        let mut meta = Meta::initial(1 << 20);
        meta.txnid = 42;
        meta.last_pgno = 17;
        meta.dbs[1].entries = 3;
        let mut page = meta.encode(Meta::slot_for(meta.txnid));
        assert_eq!(Meta::decode(&page).unwrap(), meta);

        page[PAGE_HEADER_SIZE + 72] ^= 0xff;
        assert!(matches!(Meta::decode(&page), Err(Error::Corrupted(_))));
    }

    #[test]
    fn newest_valid_meta_wins_unless_previous_requested() {
        let mut old = Meta::initial(1 << 20);
        old.txnid = 4;
        let mut new = old;
        new.txnid = 5;
        let pick = choose_meta([Ok(old), Ok(new)], false).unwrap();
        assert_eq!(pick.txnid, 5);
        let pick = choose_meta([Ok(old), Ok(new)], true).unwrap();
        assert_eq!(pick.txnid, 4);
        let pick = choose_meta([Ok(old), Err(Error::Invalid)], false).unwrap();
        assert_eq!(pick.txnid, 4);
    }
}
