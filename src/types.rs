/// Cursor positioning operations, see [`Cursor::get`](crate::Cursor::get).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    First,
    FirstDup,
    GetBoth,
    GetBothRange,
    GetCurrent,
    Last,
    LastDup,
    Next,
    NextDup,
    NextNoDup,
    Prev,
    PrevDup,
    PrevNoDup,
    Set,
    SetRange,
}

/// B-tree statistics for one database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Size of a database page
    pub psize: u32,
    /// Depth (height) of the B-tree
    pub depth: u32,
    /// Number of internal (non-leaf) pages
    pub branch_pages: usize,
    /// Number of leaf pages
    pub leaf_pages: usize,
    /// Number of overflow pages
    pub overflow_pages: usize,
    /// Number of data entries
    pub entries: usize,
}

/// Environment information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInfo {
    /// Address of the memory map
    pub map_addr: usize,
    pub map_size: usize,
    /// ID of the last used page
    pub last_pgno: u64,
    /// ID of the last committed transaction
    pub last_txnid: u64,
    pub max_readers: u32,
    /// Reader slots currently in use
    pub num_readers: u32,
}

/// One entry of the reader table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderInfo {
    pub pid: u32,
    pub thread: String,
    /// Snapshot pinned by the reader, `None` while reset
    pub txnid: Option<u64>,
}
