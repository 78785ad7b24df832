//! Sorting more `(key, value)` entries than fit in memory: entries are
//! collected into chunks, each chunk is sorted and written to a scratch file,
//! and the sorted stream is read back with a k-way merge.

pub mod chunk;
pub mod merge;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::extsort::chunk::{spill_chunk, Chunk, ChunkReader, SpilledChunk};
use crate::extsort::merge::{EntrySource, MergeIter};
use crate::longlong::appendstore::scratch_prefix;
use crate::pipeline::queue::{lock, BatchedQueue, QueueSink};
use crate::pipeline::WorkerPool;
use crate::utils::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortableEntry {
    pub key: i64,
    pub value: Vec<u8>,
}

impl SortableEntry {
    pub fn new(key: i64, value: Vec<u8>) -> SortableEntry {
        SortableEntry { key, value }
    }
}

#[derive(Debug, Clone)]
pub struct ExternalSortConfig {
    /// Estimated size at which an in-memory chunk is sorted and spilled.
    pub chunk_bytes: usize,
    pub compress: bool,
    /// Sort each chunk with rayon.
    pub parallel_sort: bool,
    /// Threads merging groups of chunks when reading; 0 or 1 merges on the
    /// calling thread.
    pub read_threads: usize,
    pub tempdir: PathBuf,
}

impl ExternalSortConfig {
    pub fn new(tempdir: PathBuf) -> ExternalSortConfig {
        ExternalSortConfig {
            chunk_bytes: 256 * 1024 * 1024,
            compress: false,
            parallel_sort: true,
            read_threads: 1,
            tempdir,
        }
    }
}

struct SortShared {
    config: ExternalSortConfig,
    prefix: String,
    current: Mutex<Chunk>,
    spilled: Mutex<Vec<SpilledChunk>>,
    next_chunk: AtomicUsize,
    sorted: AtomicBool,
    open_writers: AtomicUsize,
    len: AtomicU64,
    bytes_spilled: AtomicU64,
    error: Mutex<Option<Error>>,
}

impl SortShared {
    fn spill(&self, chunk: Chunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let idx = self.next_chunk.fetch_add(1, Ordering::SeqCst);
        let path = self.config.tempdir.join(format!("{}-chunk-{:05}.bin", self.prefix, idx));
        let sc = spill_chunk(chunk, &path, self.config.compress, self.config.parallel_sort)?;
        self.bytes_spilled.fetch_add(sc.bytes, Ordering::Relaxed);
        lock(&self.spilled).push(sc);
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.sorted.load(Ordering::SeqCst) {
            return Err(Error::AddAfterSort);
        }
        Ok(())
    }
}

/// Accumulates entries from any number of threads. After [`sort`] the
/// entries can be read back in ascending key order; the order of entries
/// with equal keys is unspecified.
///
/// [`sort`]: ExternalMergeSort::sort
pub struct ExternalMergeSort {
    shared: Arc<SortShared>,
    memory_run: Arc<Vec<SortableEntry>>,
}

impl ExternalMergeSort {
    pub fn new(config: ExternalSortConfig) -> ExternalMergeSort {
        ExternalMergeSort {
            shared: Arc::new(SortShared {
                config,
                prefix: scratch_prefix("extsort"),
                current: Mutex::new(Chunk::new()),
                spilled: Mutex::new(Vec::new()),
                next_chunk: AtomicUsize::new(0),
                sorted: AtomicBool::new(false),
                open_writers: AtomicUsize::new(0),
                len: AtomicU64::new(0),
                bytes_spilled: AtomicU64::new(0),
                error: Mutex::new(None),
            }),
            memory_run: Arc::new(Vec::new()),
        }
    }

    /// Adds to the shared chunk. When the chunk fills, the calling thread
    /// spills it while other threads carry on with a new one.
    pub fn add(&self, entry: SortableEntry) -> Result<()> {
        self.shared.check_open()?;
        self.shared.len.fetch_add(1, Ordering::Relaxed);
        let full = {
            let mut cc = lock(&self.shared.current);
            cc.add(entry);
            if cc.bytes >= self.shared.config.chunk_bytes {
                Some(cc.take())
            } else {
                None
            }
        };
        match full {
            Some(c) => self.shared.spill(c),
            None => Ok(()),
        }
    }

    /// Returns a handle with its own chunk, for a producer thread.
    pub fn writer(&self) -> SortWriter {
        self.shared.open_writers.fetch_add(1, Ordering::SeqCst);
        SortWriter {
            shared: self.shared.clone(),
            chunk: Chunk::new(),
            finished: false,
        }
    }

    /// Flushes the remaining entries and ends the adding phase. Every
    /// [`SortWriter`] must have been finished or dropped.
    pub fn sort(&mut self) -> Result<()> {
        if let Some(e) = lock(&self.shared.error).take() {
            return Err(e);
        }
        let open = self.shared.open_writers.load(Ordering::SeqCst);
        if open > 0 {
            return Err(Error::InvalidInput(format!("{} sort writers still open", open)));
        }
        if self.shared.sorted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut last = lock(&self.shared.current).take();
        if self.num_chunks() == 0 {
            last.sort(self.shared.config.parallel_sort);
            self.memory_run = Arc::new(last.entries);
        } else {
            self.shared.spill(last)?;
        }
        Ok(())
    }

    pub fn is_sorted(&self) -> bool {
        self.shared.sorted.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> u64 {
        self.shared.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of chunks written to disk.
    pub fn num_chunks(&self) -> usize {
        lock(&self.shared.spilled).len()
    }

    pub fn bytes_spilled(&self) -> u64 {
        self.shared.bytes_spilled.load(Ordering::Relaxed)
    }

    fn sources(&self) -> Result<Vec<EntrySource>> {
        if !self.is_sorted() {
            return Err(Error::NotSorted);
        }
        let mut sources: Vec<EntrySource> = Vec::new();
        for sc in lock(&self.shared.spilled).iter() {
            sources.push(Box::new(ChunkReader::open(sc)?));
        }
        if !self.memory_run.is_empty() {
            let run = self.memory_run.clone();
            sources.push(Box::new((0..run.len()).map(move |i| Ok::<SortableEntry, Error>(run[i].clone()))));
        }
        Ok(sources)
    }

    /// Merges every chunk on the calling thread.
    pub fn iter(&self) -> Result<SortedIter<'_>> {
        Ok(SortedIter {
            merge: MergeIter::new(self.sources()?),
            queues: Vec::new(),
            _pool: None,
            _sort: std::marker::PhantomData,
        })
    }

    /// Splits the chunks between `read_threads` threads, each merging its
    /// share into a queue, and merges the queues on the calling thread.
    pub fn iter_parallel(&self) -> Result<SortedIter<'_>> {
        let mut sources = self.sources()?;
        let nt = usize::min(self.shared.config.read_threads, sources.len());
        if nt < 2 {
            return self.iter();
        }

        let mut groups: Vec<Vec<EntrySource>> = (0..nt).map(|_| Vec::new()).collect();
        for (i, s) in sources.drain(..).enumerate() {
            groups[i % nt].push(s);
        }
        let groups: Vec<Mutex<Option<Vec<EntrySource>>>> = groups.into_iter().map(|g| Mutex::new(Some(g))).collect();

        let queues: Vec<BatchedQueue<Result<SortableEntry>>> = (0..nt)
            .map(|i| BatchedQueue::new(&format!("{}-merge-{}", self.shared.prefix, i), 16384, 256))
            .collect();

        let qs = queues.clone();
        let pool = WorkerPool::start("extsort-read", nt, move |i| {
            let group = match lock(&groups[i]).take() {
                Some(g) => g,
                None => return Ok(()),
            };
            let mut w = qs[i].writer();
            let res = (|| -> Result<()> {
                for e in MergeIter::new(group) {
                    let stop = e.is_err();
                    w.accept(e)?;
                    if stop {
                        break;
                    }
                }
                w.flush()
            })();
            qs[i].close()?;
            res
        })?;

        let merged: Vec<EntrySource> = queues.iter().map(|q| Box::new(q.reader()) as EntrySource).collect();
        Ok(SortedIter {
            merge: MergeIter::new(merged),
            queues,
            _pool: Some(pool),
            _sort: std::marker::PhantomData,
        })
    }
}

impl Drop for ExternalMergeSort {
    fn drop(&mut self) {
        for sc in lock(&self.shared.spilled).iter() {
            let _ = std::fs::remove_file(&sc.path);
        }
    }
}

/// A producer's own chunk, spilled independently of the shared one.
pub struct SortWriter {
    shared: Arc<SortShared>,
    chunk: Chunk,
    finished: bool,
}

impl SortWriter {
    pub fn add(&mut self, entry: SortableEntry) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidInput(String::from("add to finished sort writer")));
        }
        self.shared.check_open()?;
        self.shared.len.fetch_add(1, Ordering::Relaxed);
        self.chunk.add(entry);
        if self.chunk.bytes >= self.shared.config.chunk_bytes {
            let c = self.chunk.take();
            self.shared.spill(c)?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.shared.open_writers.fetch_sub(1, Ordering::SeqCst);
        let c = self.chunk.take();
        if c.is_empty() {
            return Ok(());
        }
        if self.shared.sorted.load(Ordering::SeqCst) {
            return Err(Error::AddAfterSort);
        }
        self.shared.spill(c)
    }
}

impl QueueSink<SortableEntry> for SortWriter {
    fn accept(&mut self, entry: SortableEntry) -> Result<()> {
        self.add(entry)
    }
}

impl Drop for SortWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            let mut err = lock(&self.shared.error);
            if err.is_none() {
                *err = Some(e);
            }
        }
    }
}

/// Entries in ascending key order. Dropping the iterator early stops any
/// reader threads.
pub struct SortedIter<'a> {
    merge: MergeIter,
    queues: Vec<BatchedQueue<Result<SortableEntry>>>,
    _pool: Option<WorkerPool>,
    _sort: std::marker::PhantomData<&'a ExternalMergeSort>,
}

impl Iterator for SortedIter<'_> {
    type Item = Result<SortableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.merge.next()
    }
}

impl Drop for SortedIter<'_> {
    fn drop(&mut self) {
        for q in &self.queues {
            q.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn config(dir: &std::path::Path, chunk_bytes: usize, compress: bool, read_threads: usize) -> ExternalSortConfig {
        ExternalSortConfig {
            chunk_bytes,
            compress,
            parallel_sort: compress,
            read_threads,
            tempdir: PathBuf::from(dir),
        }
    }

    fn entry(k: i64) -> SortableEntry {
        SortableEntry::new(k, k.to_string().into_bytes())
    }

    fn check_sorted(it: SortedIter, expected: &[i64]) {
        let res: Vec<SortableEntry> = it.map(|e| e.unwrap()).collect();
        let keys: Vec<i64> = res.iter().map(|e| e.key).collect();
        assert_eq!(keys, expected);
        for e in res {
            assert_eq!(e.value, e.key.to_string().into_bytes());
        }
    }

    #[test]
    fn test_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ExternalMergeSort::new(config(dir.path(), 1000, false, 4));
        assert!(matches!(s.iter(), Err(Error::NotSorted)));
        s.sort().unwrap();
        assert_eq!(s.num_chunks(), 0);
        assert_eq!(s.iter().unwrap().count(), 0);
        assert_eq!(s.iter_parallel().unwrap().count(), 0);
    }

    #[test]
    fn test_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ExternalMergeSort::new(config(dir.path(), 1 << 20, false, 1));
        for k in [5, 3, 9, -1, 3] {
            s.add(entry(k)).unwrap();
        }
        s.sort().unwrap();
        assert_eq!(s.num_chunks(), 0);
        assert_eq!(s.len(), 5);
        check_sorted(s.iter().unwrap(), &[-1, 3, 3, 5, 9]);
        // can be read more than once
        check_sorted(s.iter().unwrap(), &[-1, 3, 3, 5, 9]);
        assert!(matches!(s.add(entry(1)), Err(Error::AddAfterSort)));
    }

    #[test]
    fn test_many_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        let mut keys: Vec<i64> = (0..20_000).map(|_| rng.gen_range(-1_000_000..1_000_000)).collect();

        for compress in [false, true] {
            for read_threads in [1, 3] {
                let mut s = ExternalMergeSort::new(config(dir.path(), 10_000, compress, read_threads));
                keys.shuffle(&mut rng);
                for k in &keys {
                    s.add(entry(*k)).unwrap();
                }
                s.sort().unwrap();
                assert!(s.num_chunks() > 10);
                assert!(s.bytes_spilled() > 0);

                let mut expected = keys.clone();
                expected.sort();
                check_sorted(s.iter_parallel().unwrap(), &expected);
                check_sorted(s.iter().unwrap(), &expected);
            }
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ExternalMergeSort::new(config(dir.path(), 5_000, false, 2));
        std::thread::scope(|sc| {
            for t in 0..4i64 {
                let mut w = s.writer();
                sc.spawn(move || {
                    for i in 0..2500i64 {
                        w.add(entry(i * 4 + t)).unwrap();
                    }
                    w.finish().unwrap();
                });
            }
            for _ in 0..2 {
                let s = &s;
                sc.spawn(move || {
                    for i in 0..100i64 {
                        s.add(entry(20_000 + i)).unwrap();
                    }
                });
            }
        });
        s.sort().unwrap();
        assert_eq!(s.len(), 10_200);
        let mut expected: Vec<i64> = (0..10_000).collect();
        for i in 0..100 {
            expected.push(20_000 + i);
            expected.push(20_000 + i);
        }
        expected.sort();
        check_sorted(s.iter_parallel().unwrap(), &expected);
    }

    #[test]
    fn test_open_writer_blocks_sort() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ExternalMergeSort::new(config(dir.path(), 5_000, false, 1));
        let mut w = s.writer();
        w.add(entry(1)).unwrap();
        assert!(s.sort().is_err());
        drop(w);
        s.sort().unwrap();
        check_sorted(s.iter().unwrap(), &[1]);
    }

    #[test]
    fn test_early_drop_stops_readers() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ExternalMergeSort::new(config(dir.path(), 2_000, false, 4));
        for k in 0..50_000 {
            s.add(entry(k)).unwrap();
        }
        s.sort().unwrap();
        let first: Vec<i64> = s.iter_parallel().unwrap().take(10).map(|e| e.unwrap().key).collect();
        assert_eq!(first, (0..10).collect::<Vec<_>>());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_spill_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let s = ExternalMergeSort::new(config(dir.path(), 2_000, false, 1));
        for k in 0..200 {
            s.add(entry(k)).unwrap();
        }
        assert!(s.num_chunks() > 0);

        let next = s.shared.next_chunk.load(Ordering::SeqCst);
        let bad = dir.path().join(format!("{}-chunk-{:05}.bin", s.shared.prefix, next));
        std::os::unix::fs::symlink("/dev/full", &bad).unwrap();
        let mut failed = false;
        for k in 200..400 {
            if s.add(entry(k)).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert!(std::fs::symlink_metadata(&bad).is_err());

        drop(s);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ExternalMergeSort::new(config(dir.path(), 100, false, 1));
        for k in 0..100 {
            s.add(entry(k)).unwrap();
        }
        s.sort().unwrap();
        for f in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::remove_file(f.unwrap().path()).unwrap();
        }
        assert!(s.iter().is_err());
    }
}
