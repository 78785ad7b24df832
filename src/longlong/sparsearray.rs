use crate::longlong::appendstore::AppendStore;
use crate::longlong::{chunk_of, CHUNK_SHIFT, MISSING};
use crate::utils::{Error, Result};

struct ChunkSpan {
    chunk: i64,
    start: usize,
    len: usize,
}

/// One value slot for every offset within a chunk up to the last key
/// written, with the gaps filled by [`MISSING`]. Only the chunks which
/// contain at least one key take any space.
pub struct SparseArray {
    values: AppendStore,
    chunks: Vec<ChunkSpan>,
    last_key: Option<i64>,
}

impl SparseArray {
    pub fn new(values: AppendStore) -> SparseArray {
        SparseArray {
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
        let slot = (key - (c << CHUNK_SHIFT)) as usize;

        if self.chunks.last().map(|s| s.chunk) != Some(c) {
            self.chunks.push(ChunkSpan {
                chunk: c,
                start: self.values.len(),
                len: 0,
            });
        }
        let span = match self.chunks.last_mut() {
            Some(s) => s,
            None => return Err(Error::InvalidData(String::from("no chunk"))),
        };
        while span.len < slot {
            self.values.append(MISSING)?;
            span.len += 1;
        }
        self.values.append(value)?;
        span.len += 1;
        self.last_key = Some(key);
        Ok(())
    }

    /// Number of slots, including the gaps.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn get(&self, key: i64) -> Result<i64> {
        let c = chunk_of(key);
        let span = match self.chunks.binary_search_by_key(&c, |s| s.chunk) {
            Ok(i) => &self.chunks[i],
            Err(_) => return Ok(MISSING),
        };
        let slot = (key - (c << CHUNK_SHIFT)) as usize;
        if slot >= span.len {
            return Ok(MISSING);
        }
        self.values.get(span.start + slot)
    }
}
