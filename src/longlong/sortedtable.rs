use crate::longlong::appendstore::AppendStore;
use crate::longlong::{chunk_of, MISSING};
use crate::utils::{Error, Result};

/// Keys and values stored in two parallel columns, in write order. A small
/// in-memory index records where each 256-key chunk starts, so a lookup only
/// binary searches the keys of one chunk.
pub struct SortedTable {
    keys: AppendStore,
    values: AppendStore,
    chunks: Vec<(i64, usize)>,
    last_key: Option<i64>,
}

impl SortedTable {
    pub fn new(keys: AppendStore, values: AppendStore) -> SortedTable {
        SortedTable {
            keys,
            values,
            chunks: Vec::new(),
            last_key: None,
        }
    }

    pub fn put(&mut self, key: i64, value: i64) -> Result<()> {
        if let Some(lk) = self.last_key {
            if key < lk {
                return Err(Error::OutOfOrder(lk, key));
            }
            if key == lk {
                return Ok(());
            }
        }
        let c = chunk_of(key);
        if self.chunks.last().map(|(lc, _)| *lc) != Some(c) {
            self.chunks.push((c, self.keys.len()));
        }
        self.keys.append(key)?;
        self.values.append(value)?;
        self.last_key = Some(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn get(&self, key: i64) -> Result<i64> {
        let c = chunk_of(key);
        let idx = match self.chunks.binary_search_by_key(&c, |(ch, _)| *ch) {
            Ok(i) => i,
            Err(_) => return Ok(MISSING),
        };
        let mut lo = self.chunks[idx].1;
        let mut hi = match self.chunks.get(idx + 1) {
            Some((_, s)) => *s,
            None => self.keys.len(),
        };
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let k = self.keys.get(mid)?;
            if k == key {
                return self.values.get(mid);
            } else if k < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(MISSING)
    }
}
