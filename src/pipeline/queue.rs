use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::utils::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

/// Something which accepts items one at a time. Implemented by
/// [`QueueWriter`], and by `Vec` so that stage functions can be run without
/// any threads.
pub trait QueueSink<T>: Send {
    fn accept(&mut self, item: T) -> Result<()>;
}

impl<T: Send> QueueSink<T> for Vec<T> {
    fn accept(&mut self, item: T) -> Result<()> {
        self.push(item);
        Ok(())
    }
}

/// Approximate fill level of a queue, for progress reporting.
pub trait QueueStats: Send + Sync {
    fn name(&self) -> &str;
    fn pending(&self) -> usize;
    fn capacity(&self) -> usize;
}

struct State<T> {
    batches: VecDeque<Vec<T>>,
    closing: bool,
    closed: bool,
    aborted: bool,
}

struct Shared<T> {
    name: String,
    max_batches: usize,
    batch_size: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    pending: AtomicUsize,
    writers: Mutex<Vec<Arc<Mutex<Vec<T>>>>>,
}

/// Bounded multi-producer multi-consumer queue which moves items between
/// threads in batches. Each thread registers its own [`QueueWriter`] or
/// [`QueueReader`] handle, which buffers a batch locally.
pub struct BatchedQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BatchedQueue<T> {
    fn clone(&self) -> Self {
        BatchedQueue {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> BatchedQueue<T> {
    /// `capacity` is in items; the queue holds at most `capacity / batch_size`
    /// batches (at least one).
    pub fn new(name: &str, capacity: usize, batch_size: usize) -> BatchedQueue<T> {
        let batch_size = usize::max(1, batch_size);
        let max_batches = usize::max(1, capacity / batch_size);
        BatchedQueue {
            shared: Arc::new(Shared {
                name: String::from(name),
                max_batches,
                batch_size,
                state: Mutex::new(State {
                    batches: VecDeque::with_capacity(max_batches),
                    closing: false,
                    closed: false,
                    aborted: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                pending: AtomicUsize::new(0),
                writers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn writer(&self) -> QueueWriter<T> {
        let batch = Arc::new(Mutex::new(Vec::with_capacity(self.shared.batch_size)));
        lock(&self.shared.writers).push(batch.clone());
        QueueWriter {
            queue: self.clone(),
            batch,
        }
    }

    pub fn reader(&self) -> QueueReader<T> {
        QueueReader {
            queue: self.clone(),
            current: Vec::new().into_iter(),
        }
    }

    /// Flushes the partial batch of every registered writer, then marks the
    /// queue as closed. Readers see end-of-stream once the remaining batches
    /// are consumed.
    pub fn close(&self) -> Result<()> {
        lock(&self.shared.state).closing = true;
        let writers = lock(&self.shared.writers).clone();
        for w in writers {
            let batch = std::mem::take(&mut *lock(&w));
            self.push_batch(batch)?;
        }
        let mut state = lock(&self.shared.state);
        state.closed = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        Ok(())
    }

    /// Wakes every blocked reader and writer: writers fail with
    /// [`Error::Aborted`], readers see end-of-stream.
    pub fn abort(&self) {
        let mut state = lock(&self.shared.state);
        state.aborted = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size
    }

    /// New items are refused once `close` has started.
    fn check_accepting(&self) -> Result<()> {
        let state = lock(&self.shared.state);
        if state.aborted {
            return Err(Error::Aborted);
        }
        if state.closing || state.closed {
            return Err(Error::QueueClosed(self.shared.name.clone()));
        }
        Ok(())
    }

    fn push_batch(&self, batch: Vec<T>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = lock(&self.shared.state);
        loop {
            if state.aborted || state.closed {
                self.shared.pending.fetch_sub(batch.len(), Ordering::Relaxed);
                return Err(if state.aborted {
                    Error::Aborted
                } else {
                    Error::QueueClosed(self.shared.name.clone())
                });
            }
            if state.batches.len() < self.shared.max_batches {
                state.batches.push_back(batch);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            state = match self.shared.not_full.wait_timeout(state, POLL_INTERVAL) {
                Ok((s, _)) => s,
                Err(p) => p.into_inner().0,
            };
        }
    }

    fn pull_batch(&self) -> Option<Vec<T>> {
        let mut state = lock(&self.shared.state);
        loop {
            if state.aborted {
                return None;
            }
            if let Some(b) = state.batches.pop_front() {
                self.shared.not_full.notify_one();
                return Some(b);
            }
            if state.closed {
                return None;
            }
            state = match self.shared.not_empty.wait_timeout(state, POLL_INTERVAL) {
                Ok((s, _)) => s,
                Err(p) => p.into_inner().0,
            };
        }
    }

    fn deregister(&self, batch: &Arc<Mutex<Vec<T>>>) {
        lock(&self.shared.writers).retain(|w| !Arc::ptr_eq(w, batch));
    }
}

impl<T: Send + 'static> QueueStats for BatchedQueue<T> {
    fn name(&self) -> &str {
        &self.shared.name
    }

    /// Includes items sitting in writers' and readers' local batches.
    fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> usize {
        self.shared.max_batches * self.shared.batch_size
    }
}

pub struct QueueWriter<T: Send + 'static> {
    queue: BatchedQueue<T>,
    batch: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> QueueWriter<T> {
    pub fn flush(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut *lock(&self.batch));
        self.queue.push_batch(batch)
    }
}

impl<T: Send + 'static> QueueSink<T> for QueueWriter<T> {
    fn accept(&mut self, item: T) -> Result<()> {
        let full = {
            let mut b = lock(&self.batch);
            // checked while holding the batch, which close drains after setting closing
            self.queue.check_accepting()?;
            self.queue.shared.pending.fetch_add(1, Ordering::Relaxed);
            b.push(item);
            if b.len() >= self.queue.shared.batch_size {
                Some(std::mem::replace(&mut *b, Vec::with_capacity(self.queue.shared.batch_size)))
            } else {
                None
            }
        };
        match full {
            Some(b) => self.queue.push_batch(b),
            None => Ok(()),
        }
    }
}

impl<T: Send + 'static> Drop for QueueWriter<T> {
    fn drop(&mut self) {
        // the batch is empty unless the queue was aborted
        let _ = self.flush();
        self.queue.deregister(&self.batch);
    }
}

pub struct QueueReader<T: Send + 'static> {
    queue: BatchedQueue<T>,
    current: std::vec::IntoIter<T>,
}

impl<T: Send + 'static> Iterator for QueueReader<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(t) = self.current.next() {
                self.queue.shared.pending.fetch_sub(1, Ordering::Relaxed);
                return Some(t);
            }
            match self.queue.pull_batch() {
                Some(b) => {
                    self.current = b.into_iter();
                }
                None => {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_thread_batches() {
        let q = BatchedQueue::new("q", 100, 10);
        let mut w = q.writer();
        for i in 0..25 {
            w.accept(i).unwrap();
        }
        assert_eq!(q.pending(), 25);
        assert_eq!(q.capacity(), 100);
        q.close().unwrap();

        let r: Vec<i32> = q.reader().collect();
        assert_eq!(r, (0..25).collect::<Vec<_>>());
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn test_close_flushes_all_writers() {
        let q = BatchedQueue::new("q", 1000, 100);
        let mut a = q.writer();
        let mut b = q.writer();
        a.accept(1).unwrap();
        b.accept(2).unwrap();
        q.close().unwrap();
        let mut r: Vec<i32> = q.reader().collect();
        r.sort();
        assert_eq!(r, vec![1, 2]);
        assert!(a.flush().is_ok());
    }

    #[test]
    fn test_accept_after_close_fails() {
        let q = BatchedQueue::new("late", 100, 10);
        let mut w = q.writer();
        w.accept(1).unwrap();
        q.close().unwrap();
        assert!(matches!(w.accept(42), Err(Error::QueueClosed(n)) if n == "late"));
        drop(w);
        assert_eq!(q.pending(), 1);
        assert_eq!(q.reader().collect::<Vec<i32>>(), vec![1]);
        assert_eq!(q.pending(), 0);

        let q = BatchedQueue::<i32>::new("aborted", 100, 10);
        let mut w = q.writer();
        q.abort();
        assert!(matches!(w.accept(1), Err(Error::Aborted)));
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn test_many_producers_consumers() {
        let q = BatchedQueue::new("q", 64, 8);
        let mut producers = Vec::new();
        for p in 0..4i64 {
            let q = q.clone();
            producers.push(thread::spawn(move || {
                let mut w = q.writer();
                for i in 0..1000i64 {
                    w.accept(p * 1000 + i).unwrap();
                }
            }));
        }
        let mut consumers = Vec::new();
        for _ in 0..3 {
            let q = q.clone();
            consumers.push(thread::spawn(move || q.reader().collect::<Vec<i64>>()));
        }
        for p in producers {
            p.join().unwrap();
        }
        q.close().unwrap();

        let mut all = Vec::new();
        for c in consumers {
            all.extend(c.join().unwrap());
        }
        all.sort();
        assert_eq!(all, (0..4000).collect::<Vec<_>>());
    }

    #[test]
    fn test_abort_unblocks_writer() {
        let q = BatchedQueue::new("q", 2, 1);
        let q2 = q.clone();
        let h = thread::spawn(move || {
            let mut w = q2.writer();
            for i in 0..100 {
                w.accept(i)?;
            }
            Ok::<(), Error>(())
        });
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert!(matches!(h.join().unwrap(), Err(Error::Aborted)));
        assert_eq!(q.reader().next(), None);
    }

    #[test]
    fn test_vec_sink() {
        let mut v: Vec<i32> = Vec::new();
        {
            let s: &mut dyn QueueSink<i32> = &mut v;
            s.accept(5).unwrap();
        }
        assert_eq!(v, vec![5]);
    }
}
