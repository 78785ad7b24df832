use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::message;
use crate::pipeline::queue::{lock, QueueStats};
use crate::utils::{process_cpu_secs, Result, Timer};

struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Periodically reports the fill level of a set of queues, together with the
/// wall and cpu time used so far. Stops when dropped.
pub struct ProgressLogger {
    stop: Arc<StopSignal>,
    handle: Option<thread::JoinHandle<()>>,
}

pub fn format_queue_stats(queues: &[Arc<dyn QueueStats>]) -> String {
    let mut parts = Vec::with_capacity(queues.len());
    for q in queues {
        let cap = usize::max(1, q.capacity());
        parts.push(format!(
            "{}: {} / {} ({:.0}%)",
            q.name(),
            q.pending(),
            q.capacity(),
            100.0 * (q.pending() as f64) / (cap as f64)
        ));
    }
    parts.join(", ")
}

impl ProgressLogger {
    pub fn start(name: &str, queues: Vec<Arc<dyn QueueStats>>, interval: Duration) -> Result<ProgressLogger> {
        let stop = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });
        let st = stop.clone();
        let nm = String::from(name);
        let handle = thread::Builder::new()
            .name(format!("{}-progress", name))
            .spawn(move || {
                let tm = Timer::new();
                let cpu_start = process_cpu_secs();
                let mut stopped = lock(&st.stopped);
                loop {
                    stopped = match st.cond.wait_timeout(stopped, interval) {
                        Ok((s, _)) => s,
                        Err(p) => p.into_inner().0,
                    };
                    if *stopped {
                        return;
                    }
                    message!(
                        "{} {:.1}s [cpu {:.1}s] {}",
                        nm,
                        tm.since(),
                        process_cpu_secs() - cpu_start,
                        format_queue_stats(&queues)
                    );
                }
            })?;
        Ok(ProgressLogger {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for ProgressLogger {
    fn drop(&mut self) {
        *lock(&self.stop.stopped) = true;
        self.stop.cond.notify_all();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
