use std::sync::{Arc, Mutex};

use crate::pipeline::queue::{lock, BatchedQueue, QueueSink, QueueStats};
use crate::pipeline::worker::{Completion, WorkerPool};
use crate::utils::Result;

pub type SourceFunc<T> = dyn FnOnce(&mut dyn QueueSink<T>) -> Result<()> + Send;
pub type WorkerFunc<T, U> = dyn Fn(&mut dyn Iterator<Item = T>, &mut dyn QueueSink<U>) -> Result<()> + Send + Sync;
pub type SinkFunc<T> = dyn Fn(&mut dyn Iterator<Item = T>) -> Result<()> + Send + Sync;

/// Starts a chain of stages connected by [`BatchedQueue`]s:
///
/// ```ignore
/// let pipeline = Pipeline::new("render")
///     .from_generator("read", Box::new(|out| ...))
///     .add_buffer("features", 10_000, 100)
///     .add_worker("encode", 4, Arc::new(|inp, out| ...))
///     .add_buffer("encoded", 1_000, 10)
///     .sink_to("write", 1, Arc::new(|inp| ...))?;
/// pipeline.await_done()?;
/// ```
pub struct Pipeline {
    name: String,
    done: Completion,
    queues: Vec<Arc<dyn QueueStats>>,
    pools: Vec<WorkerPool>,
}

pub struct PipelineBuilder {
    name: String,
    done: Completion,
    queues: Vec<Arc<dyn QueueStats>>,
    pools: Vec<WorkerPool>,
    error: Option<crate::utils::Error>,
}

pub struct GeneratorStage<T: Send + 'static> {
    builder: PipelineBuilder,
    name: String,
    func: Box<SourceFunc<T>>,
}

pub struct Stage<T: Send + 'static> {
    builder: PipelineBuilder,
    queue: BatchedQueue<T>,
}

pub struct WorkerStage<T: Send + 'static, U: Send + 'static> {
    builder: PipelineBuilder,
    input: BatchedQueue<T>,
    name: String,
    threads: usize,
    func: Arc<WorkerFunc<T, U>>,
}

impl Pipeline {
    pub fn new(name: &str) -> PipelineBuilder {
        PipelineBuilder {
            name: String::from(name),
            done: Completion::new(),
            queues: Vec::new(),
            pools: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queues(&self) -> Vec<Arc<dyn QueueStats>> {
        self.queues.clone()
    }

    pub fn completion(&self) -> &Completion {
        &self.done
    }

    pub fn cancel(&self) {
        self.done.cancel();
    }

    /// Waits for every stage to finish. Any failure aborts all the queues
    /// and is returned here.
    pub fn await_done(self) -> Result<()> {
        self.done.await_done()?;
        for p in self.pools {
            p.await_done()?;
        }
        Ok(())
    }
}

impl PipelineBuilder {
    fn new_queue<T: Send + 'static>(&mut self, name: &str, capacity: usize, batch_size: usize) -> BatchedQueue<T> {
        let q = BatchedQueue::new(&format!("{}_{}", self.name, name), capacity, batch_size);
        let qc = q.clone();
        self.done.on_cancel(Box::new(move || qc.abort()));
        self.queues.push(Arc::new(q.clone()));
        q
    }

    fn add_pool(&mut self, pool: Result<WorkerPool>) {
        match pool {
            Ok(p) => self.pools.push(p),
            Err(e) => {
                self.done.cancel();
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
    }

    pub fn from_generator<T: Send + 'static>(self, name: &str, func: Box<SourceFunc<T>>) -> GeneratorStage<T> {
        GeneratorStage {
            builder: self,
            name: String::from(name),
            func,
        }
    }

    /// Starts with an existing queue, filled by the caller.
    pub fn read_from_queue<T: Send + 'static>(mut self, queue: BatchedQueue<T>) -> Stage<T> {
        let qc = queue.clone();
        self.done.on_cancel(Box::new(move || qc.abort()));
        self.queues.push(Arc::new(queue.clone()));
        Stage { builder: self, queue }
    }
}

impl<T: Send + 'static> GeneratorStage<T> {
    pub fn add_buffer(self, name: &str, capacity: usize, batch_size: usize) -> Stage<T> {
        let mut builder = self.builder;
        let queue = builder.new_queue::<T>(name, capacity, batch_size);

        let func = Mutex::new(Some(self.func));
        let q = queue.clone();
        let task = Arc::new(move |_: usize| -> Result<()> {
            let f = lock(&func).take();
            match f {
                Some(f) => {
                    let mut writer = q.writer();
                    f(&mut writer)?;
                    writer.flush()
                }
                None => Ok(()),
            }
        });
        let q = queue.clone();
        let pool = WorkerPool::start_in(
            &builder.done.clone(),
            &self.name,
            1,
            task,
            Some(Box::new(move || q.close())),
        );
        builder.add_pool(pool);
        Stage { builder, queue }
    }
}

impl<T: Send + 'static> Stage<T> {
    pub fn queue(&self) -> &BatchedQueue<T> {
        &self.queue
    }

    /// Completion shared by every stage, cancelled on the first failure.
    pub fn completion(&self) -> Completion {
        self.builder.done.clone()
    }

    pub fn add_worker<U: Send + 'static>(self, name: &str, threads: usize, func: Arc<WorkerFunc<T, U>>) -> WorkerStage<T, U> {
        WorkerStage {
            builder: self.builder,
            input: self.queue,
            name: String::from(name),
            threads,
            func,
        }
    }

    pub fn sink_to(self, name: &str, threads: usize, func: Arc<SinkFunc<T>>) -> Result<Pipeline> {
        let mut builder = self.builder;
        let input = self.queue;
        let task = Arc::new(move |_: usize| -> Result<()> {
            let mut reader = input.reader();
            func(&mut reader)
        });
        let pool = WorkerPool::start_in(&builder.done.clone(), name, threads, task, None);
        builder.add_pool(pool);
        if let Some(e) = builder.error.take() {
            return Err(e);
        }
        Ok(Pipeline {
            name: builder.name,
            done: builder.done,
            queues: builder.queues,
            pools: builder.pools,
        })
    }
}

impl<T: Send + 'static, U: Send + 'static> WorkerStage<T, U> {
    pub fn add_buffer(self, name: &str, capacity: usize, batch_size: usize) -> Stage<U> {
        let mut builder = self.builder;
        let output = builder.new_queue::<U>(name, capacity, batch_size);

        let input = self.input;
        let out = output.clone();
        let func = self.func;
        let task = Arc::new(move |_: usize| -> Result<()> {
            let mut reader = input.reader();
            let mut writer = out.writer();
            func(&mut reader, &mut writer)?;
            writer.flush()
        });
        let out = output.clone();
        let pool = WorkerPool::start_in(
            &builder.done.clone(),
            &self.name,
            self.threads,
            task,
            Some(Box::new(move || out.close())),
        );
        builder.add_pool(pool);
        Stage {
            builder,
            queue: output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Error;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn test_generator_worker_sink() {
        let total = Arc::new(AtomicI64::new(0));
        let count = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        let c = count.clone();
        let pipeline = Pipeline::new("test")
            .from_generator("gen", Box::new(|out: &mut dyn QueueSink<i64>| -> Result<()> {
                for i in 0..10_000 {
                    out.accept(i)?;
                }
                Ok(())
            }))
            .add_buffer("numbers", 1000, 50)
            .add_worker::<i64>("double", 3, Arc::new(|inp: &mut dyn Iterator<Item = i64>, out: &mut dyn QueueSink<i64>| -> Result<()> {
                for i in inp {
                    out.accept(i * 2)?;
                }
                Ok(())
            }))
            .add_buffer("doubled", 1000, 50)
            .sink_to("sum", 2, Arc::new(move |inp: &mut dyn Iterator<Item = i64>| -> Result<()> {
                for i in inp {
                    t.fetch_add(i, Ordering::SeqCst);
                    c.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }))
            .unwrap();
        assert_eq!(pipeline.queues().len(), 2);
        pipeline.await_done().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10_000);
        assert_eq!(total.load(Ordering::SeqCst), 9_999 * 10_000);
    }

    #[test]
    fn test_worker_failure_aborts_pipeline() {
        let start = Instant::now();
        let pipeline = Pipeline::new("failing")
            .from_generator("gen", Box::new(|out: &mut dyn QueueSink<i64>| -> Result<()> {
                // far more than the queues can hold, so the generator blocks
                for i in 0..10_000_000 {
                    out.accept(i)?;
                }
                Ok(())
            }))
            .add_buffer("numbers", 100, 10)
            .add_worker::<i64>("check", 2, Arc::new(|inp: &mut dyn Iterator<Item = i64>, out: &mut dyn QueueSink<i64>| -> Result<()> {
                for i in inp {
                    if i == 5000 {
                        return Err(Error::InvalidData(String::from("found 5000")));
                    }
                    out.accept(i)?;
                }
                Ok(())
            }))
            .add_buffer("checked", 100, 10)
            .sink_to("slow", 1, Arc::new(|inp: &mut dyn Iterator<Item = i64>| -> Result<()> {
                for _ in inp {
                    std::thread::sleep(Duration::from_micros(10));
                }
                Ok(())
            }))
            .unwrap();

        match pipeline.await_done() {
            Err(Error::InvalidData(m)) => assert_eq!(m, "found 5000"),
            x => panic!("unexpected {:?}", x),
        }
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_stage_completion_cancelled_on_failure() {
        let stage = Pipeline::new("cancelled")
            .from_generator("gen", Box::new(|out: &mut dyn QueueSink<i64>| -> Result<()> {
                out.accept(1)?;
                Err(Error::InvalidData(String::from("gen")))
            }))
            .add_buffer("numbers", 100, 10);
        let done = stage.completion();
        let seen_cancel = Arc::new(AtomicUsize::new(0));
        let sc = seen_cancel.clone();
        let pipeline = stage
            .sink_to("check", 1, Arc::new(move |inp: &mut dyn Iterator<Item = i64>| -> Result<()> {
                for _ in inp {}
                if done.is_cancelled() {
                    sc.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }))
            .unwrap();
        assert!(matches!(pipeline.await_done(), Err(Error::InvalidData(_))));
        // the sink thread winds down by itself after the failure is returned
        let start = Instant::now();
        while seen_cancel.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(10) {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(seen_cancel.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sink_failure() {
        let pipeline = Pipeline::new("sinkfail")
            .from_generator("gen", Box::new(|out: &mut dyn QueueSink<i64>| -> Result<()> {
                for i in 0..1_000_000 {
                    out.accept(i)?;
                }
                Ok(())
            }))
            .add_buffer("numbers", 100, 10)
            .sink_to("fail", 1, Arc::new(|inp: &mut dyn Iterator<Item = i64>| -> Result<()> {
                for i in inp {
                    if i > 10 {
                        return Err(Error::Unsupported(String::from("sink")));
                    }
                }
                Ok(())
            }))
            .unwrap();
        assert!(matches!(pipeline.await_done(), Err(Error::Unsupported(_))));
    }
}
