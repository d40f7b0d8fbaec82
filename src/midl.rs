use crate::error::{Error, Result};

/// A page number
pub type Pgno = u64;

/// ID List - a sorted set of page numbers in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IdList {
    ids: Vec<Pgno>,
}

impl IdList {
    pub fn new() -> Self {
        IdList { ids: Vec::new() }
    }

    /// Get number of elements in the list
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[Pgno] {
        &self.ids
    }

    /// Insert an ID, keeping the list sorted. Returns false if already present.
    pub fn insert(&mut self, id: Pgno) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Insert a run of `n` consecutive IDs starting at `first`.
    pub fn insert_run(&mut self, first: Pgno, n: usize) {
        for id in first..first + n as Pgno {
            self.insert(id);
        }
    }

    /// Merge another list into this one
    pub fn append_list(&mut self, other: &[Pgno]) {
        if other.is_empty() {
            return;
        }
        self.ids.extend_from_slice(other);
        self.ids.sort_unstable();
        self.ids.dedup();
    }

    /// Remove and return the first ID of `n` consecutive IDs, if any run is long enough.
    ///
    /// Single pages come from the high end so runs at the low end stay intact.
    pub fn take_run(&mut self, n: usize) -> Option<Pgno> {
        if n == 0 || self.ids.len() < n {
            return None;
        }
        if n == 1 {
            return self.ids.pop();
        }
        let mut start = 0;
        for i in 1..self.ids.len() {
            if self.ids[i] != self.ids[i - 1] + 1 {
                start = i;
            }
            if i + 1 - start == n {
                let first = self.ids[start];
                self.ids.drain(start..=i);
                return Some(first);
            }
        }
        None
    }

    /// Serialize as a flat array of little-endian u64
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.ids.len() * 8);
        for id in &self.ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<IdList> {
        if bytes.len() % 8 != 0 {
            return Err(Error::Corrupted(format!(
                "free page list of {} bytes",
                bytes.len()
            )));
        }
        let mut ids: Vec<Pgno> = bytes
            .chunks_exact(8)
            .map(|c| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(c);
                Pgno::from_le_bytes(raw)
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(IdList { ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_run_finds_consecutive_pages() {
        let mut list = IdList::new();
        for id in [3, 4, 9, 10, 11, 20] {
            list.insert(id);
        }
        assert_eq!(list.take_run(3), Some(9));
        assert_eq!(list.as_slice(), &[3, 4, 20]);
        assert_eq!(list.take_run(3), None);
        assert_eq!(list.take_run(1), Some(20));
        assert_eq!(list.take_run(2), Some(3));
        assert!(list.is_empty());
    }

    #[test]
    fn encoded_list_decodes_sorted() {
        let mut list = IdList::new();
        list.insert_run(7, 3);
        list.insert(2);
        let back = IdList::decode(&list.encode()).unwrap();
        assert_eq!(back.as_slice(), &[2, 7, 8, 9]);
        assert!(IdList::decode(&[1, 2, 3]).is_err());
    }
}
