use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::pipeline::queue::lock;
use crate::utils::{Error, Result};

struct CompletionState {
    running: usize,
    error: Option<Error>,
    failed: bool,
}

struct CompletionInner {
    state: Mutex<CompletionState>,
    cond: Condvar,
    cancelled: AtomicBool,
    hooks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

/// Completion signal shared by a group of threads. Succeeds once every
/// thread has returned `Ok`, fails as soon as one returns an error or panics.
/// The first failure runs the registered cancel hooks.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

impl Completion {
    pub fn new() -> Completion {
        Completion {
            inner: Arc::new(CompletionInner {
                state: Mutex::new(CompletionState {
                    running: 0,
                    error: None,
                    failed: false,
                }),
                cond: Condvar::new(),
                cancelled: AtomicBool::new(false),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn started(&self, n: usize) {
        lock(&self.inner.state).running += n;
    }

    fn finished(&self, res: Result<()>) {
        let mut cancel = false;
        {
            let mut state = lock(&self.inner.state);
            state.running -= 1;
            if let Err(e) = res {
                if !state.failed {
                    state.failed = true;
                    state.error = Some(e);
                    cancel = true;
                }
            }
            self.inner.cond.notify_all();
        }
        if cancel {
            self.cancel();
        }
    }

    /// Registers a function run (once) when the group is cancelled.
    pub fn on_cancel(&self, hook: Box<dyn Fn() + Send + Sync>) {
        let mut hooks = lock(&self.inner.hooks);
        if self.is_cancelled() {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(hook);
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            for h in lock(&self.inner.hooks).iter() {
                h();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until all threads have finished, or until the first failure.
    /// The original error is returned to the first caller only.
    pub fn await_done(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        loop {
            if state.failed {
                return match state.error.take() {
                    Some(e) => Err(e),
                    None => Err(Error::Aborted),
                };
            }
            if state.running == 0 {
                return Ok(());
            }
            state = match self.inner.cond.wait(state) {
                Ok(s) => s,
                Err(p) => p.into_inner(),
            };
        }
    }
}

fn panic_message(p: Box<dyn Any + Send>) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        String::from(*s)
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}

/// Runs `threads` copies of one task on named threads.
pub struct WorkerPool {
    name: String,
    done: Completion,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start<F>(name: &str, threads: usize, task: F) -> Result<WorkerPool>
    where
        F: Fn(usize) -> Result<()> + Send + Sync + 'static,
    {
        Self::start_in(&Completion::new(), name, threads, Arc::new(task), None)
    }

    /// Starts the threads as part of an existing completion group. `on_all_done`
    /// runs once, on whichever thread finishes last, unless the group has
    /// failed.
    pub(crate) fn start_in<F>(
        done: &Completion,
        name: &str,
        threads: usize,
        task: Arc<F>,
        on_all_done: Option<Box<dyn Fn() -> Result<()> + Send + Sync>>,
    ) -> Result<WorkerPool>
    where
        F: Fn(usize) -> Result<()> + Send + Sync + 'static,
    {
        let threads = usize::max(1, threads);
        done.started(threads);
        let remaining = Arc::new(Mutex::new(threads));
        let on_all_done = Arc::new(on_all_done);

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let task = task.clone();
            let d = done.clone();
            let remaining = remaining.clone();
            let on_all_done = on_all_done.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    let mut res = match catch_unwind(AssertUnwindSafe(|| task(i))) {
                        Ok(r) => r,
                        Err(p) => Err(Error::WorkerPanic(panic_message(p))),
                    };
                    let last = {
                        let mut r = lock(&remaining);
                        *r -= 1;
                        *r == 0
                    };
                    // a failed group is cancelled before anything downstream is closed
                    if last && res.is_ok() && !d.is_cancelled() {
                        if let Some(f) = &*on_all_done {
                            res = f();
                        }
                    }
                    d.finished(res);
                });
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => {
                    done.finished(Err(Error::Io(e)));
                    for _ in (i + 1)..threads {
                        done.finished(Ok(()));
                    }
                    break;
                }
            }
        }
        Ok(WorkerPool {
            name: String::from(name),
            done: done.clone(),
            handles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn completion(&self) -> &Completion {
        &self.done
    }

    /// Waits for every thread. On failure returns the first error straight
    /// away, leaving any sibling threads to wind down by themselves.
    pub fn await_done(self) -> Result<()> {
        self.done.await_done()?;
        for h in self.handles {
            let _ = h.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[test]
    fn test_all_succeed() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let pool = WorkerPool::start("ok", 4, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        pool.await_done().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_fail_fast() {
        let start = Instant::now();
        let pool = WorkerPool::start("fails", 3, move |i| {
            if i == 1 {
                return Err(Error::InvalidData(String::from("bad record")));
            }
            thread::sleep(Duration::from_secs(5));
            Ok(())
        })
        .unwrap();
        match pool.await_done() {
            Err(Error::InvalidData(m)) => assert_eq!(m, "bad record"),
            x => panic!("unexpected {:?}", x),
        }
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_panic_is_error() {
        let pool = WorkerPool::start("panics", 1, move |_| {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();
        match pool.await_done() {
            Err(Error::WorkerPanic(m)) => assert!(m.contains("boom")),
            x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn test_all_done_skipped_on_failure() {
        for fail in [false, true] {
            let done = Completion::new();
            let closed = Arc::new(AtomicUsize::new(0));
            let c = closed.clone();
            let pool = WorkerPool::start_in(
                &done,
                "close",
                3,
                Arc::new(move |i: usize| -> Result<()> {
                    if fail && i == 2 {
                        return Err(Error::InvalidData(String::from("stage")));
                    }
                    Ok(())
                }),
                Some(Box::new(move || -> Result<()> {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();
            assert_eq!(pool.await_done().is_err(), fail);
            thread::sleep(Duration::from_millis(50));
            assert_eq!(closed.load(Ordering::SeqCst), if fail { 0 } else { 1 });
        }
    }

    #[test]
    fn test_cancel_hook_runs_once() {
        let done = Completion::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        done.on_cancel(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let pool = WorkerPool::start_in(
            &done,
            "x",
            4,
            Arc::new(|_: usize| -> Result<()> { Err(Error::Aborted) }),
            None,
        )
        .unwrap();
        assert!(pool.await_done().is_err());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(done.await_done().is_err());
    }
}
