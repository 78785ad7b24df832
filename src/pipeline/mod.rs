//! Threaded stages connected by bounded, batched queues.

pub mod builder;
pub mod progress;
pub mod queue;
pub mod worker;

pub use crate::pipeline::builder::{Pipeline, PipelineBuilder, SinkFunc, SourceFunc, Stage, WorkerFunc};
pub use crate::pipeline::progress::ProgressLogger;
pub use crate::pipeline::queue::{BatchedQueue, QueueReader, QueueSink, QueueStats, QueueWriter};
pub use crate::pipeline::worker::{Completion, WorkerPool};
