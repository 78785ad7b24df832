use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::extsort::SortableEntry;
use crate::utils::Result;

pub type EntrySource = Box<dyn Iterator<Item = Result<SortableEntry>> + Send>;

/// K-way merge of sorted sources using a min-heap of `(key, source)`. The
/// first error from any source is returned and ends the merge.
pub struct MergeIter {
    sources: Vec<EntrySource>,
    heads: Vec<Option<SortableEntry>>,
    heap: BinaryHeap<Reverse<(i64, usize)>>,
    pending_error: Option<crate::utils::Error>,
    failed: bool,
}

impl MergeIter {
    pub fn new(mut sources: Vec<EntrySource>) -> MergeIter {
        let mut heads = Vec::with_capacity(sources.len());
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut pending_error = None;
        for (i, s) in sources.iter_mut().enumerate() {
            match s.next() {
                Some(Ok(e)) => {
                    heap.push(Reverse((e.key, i)));
                    heads.push(Some(e));
                }
                Some(Err(e)) => {
                    if pending_error.is_none() {
                        pending_error = Some(e);
                    }
                    heads.push(None);
                }
                None => heads.push(None),
            }
        }
        MergeIter {
            sources,
            heads,
            heap,
            pending_error,
            failed: false,
        }
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }
}

impl Iterator for MergeIter {
    type Item = Result<SortableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }
        let Reverse((_, i)) = self.heap.pop()?;
        let entry = self.heads[i].take()?;
        match self.sources[i].next() {
            Some(Ok(e)) => {
                self.heap.push(Reverse((e.key, i)));
                self.heads[i] = Some(e);
            }
            Some(Err(e)) => {
                self.pending_error = Some(e);
            }
            None => {}
        }
        Some(Ok(entry))
    }
}
