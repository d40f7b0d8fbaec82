use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnvFlags: u32 {
        /// The path names the data file itself rather than a directory.
        const NOSUBDIR = 0x4000;
        /// Don't fsync after commit.
        const NOSYNC = 0x10000;
        /// Open the environment read-only.
        const RDONLY = 0x20000;
        /// Flush data pages on commit but not the meta page.
        const NOMETASYNC = 0x40000;
        /// Write committed pages through the memory map instead of the file.
        const WRITEMAP = 0x80000;
        /// With WRITEMAP, flush the map asynchronously.
        const MAPASYNC = 0x100000;
        /// Caller guarantees external serialisation; no reader table, no writer gate.
        const NOLOCK = 0x400000;
        /// Advise the OS that access to the map is random.
        const NORDAHEAD = 0x800000;
        /// Don't zero fresh page buffers.
        const NOMEMINIT = 0x1000000;
        /// Open on the previous snapshot instead of the latest one.
        const PREVSNAPSHOT = 0x2000000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DbFlags: u32 {
        const REVERSEKEY = 0x02;
        const DUPSORT = 0x04;
        const INTEGERKEY = 0x08;
        const DUPFIXED = 0x10;
        const INTEGERDUP = 0x20;
        const REVERSEDUP = 0x40;
        const CREATE = 0x40000;
    }
}

impl DbFlags {
    /// Flags stored with the database record; fixed for the life of the database.
    pub fn persistent(self) -> DbFlags {
        self & !DbFlags::CREATE
    }
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: u32 {
        const NOOVERWRITE = 0x10;
        const NODUPDATA = 0x20;
        const CURRENT = 0x40;
        const APPEND = 0x20000;
        const APPENDDUP = 0x40000;
    }
}

// Leaf node flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u16 {
        /// Value lives in an overflow page run.
        const BIGDATA = 0x01;
        /// Value is a database record (named database or duplicate sub-tree).
        const SUBDATA = 0x02;
        /// Value is an inline list of duplicates.
        const DUPDATA = 0x04;
    }
}

// Page flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        const BRANCH = 0x01;
        const LEAF = 0x02;
        const OVERFLOW = 0x04;
        const META = 0x08;
    }
}

// Page and version constants
pub const PAGE_SIZE: usize = 4096;
/// Magic number for data files
pub const MDB_MAGIC: u32 = 0xBEEF_C0DE;
/// On-disk format version
pub const DATA_VERSION: u32 = 1;
/// Core database identifiers reserved by the engine
pub const CORE_DBS: usize = 2;
/// Free-page database
pub const FREE_DBI: u32 = 0;
/// Unnamed (main) database, also the catalog of named databases
pub const MAIN_DBI: u32 = 1;
/// Internal constants
pub const META_PAGES: usize = 2;
/// Page number meaning "no page"
pub const P_INVALID: u64 = u64::MAX;

pub const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_READERS: u32 = 126;
pub const DEFAULT_MAX_DBS: u32 = 0;
pub const MAX_KEY_SIZE: usize = 511;

pub const DATA_FILE: &str = "data.mdb";
