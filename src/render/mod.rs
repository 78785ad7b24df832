//! Encodes the tiles of a [`FeatureGroup`] on a pool of threads and passes
//! them on to a tile writer.

pub mod encoder;
pub mod writetiles;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::callback::CallFinish;
use crate::config::TileGenConfig;
use crate::features::{FeatureGroup, TileCoord, TileFeatures};
use crate::message;
use crate::pipeline::queue::lock;
use crate::pipeline::{BatchedQueue, Pipeline, ProgressLogger, QueueSink, SinkFunc, WorkerFunc};
use crate::utils::{Error, Result, ThreadTimer, Timer, Timings};

pub use crate::render::encoder::{decode_packed_tile, PackedTileEncoder, TileEncoder};
pub use crate::render::writetiles::{read_tile, read_tile_locs, CollectTiles, TileLoc, WriteTileFile};

pub type TileWriter<R> = Box<dyn CallFinish<CallType = Vec<(TileCoord, Vec<u8>)>, ReturnType = R>>;

const WRITE_BATCH: usize = 64;
const MAX_LOGGED: u64 = 10;

pub struct RenderStats {
    pub tiles: u64,
    pub empty_tiles: u64,
    pub oversized_tiles: u64,
    pub tiles_written: u64,
    pub features: u64,
    pub bytes: u64,
    pub timings: Timings,
}

impl fmt::Display for RenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tiles ({} empty, {} oversized), {} features, wrote {} tiles [{} bytes]\n{}",
            self.tiles, self.empty_tiles, self.oversized_tiles, self.features, self.tiles_written, self.bytes, self.timings
        )
    }
}

struct EncodedTile {
    seq: u64,
    tile: TileCoord,
    data: Option<Vec<u8>>,
}

#[derive(Default)]
struct SharedCounts {
    oversized: AtomicU64,
    written: AtomicU64,
    bytes: AtomicU64,
}

/// Puts encoded tiles back into the order they were read.
struct Resequence {
    next: u64,
    pending: BTreeMap<u64, EncodedTile>,
}

impl Resequence {
    fn new() -> Resequence {
        Resequence {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    fn add(&mut self, t: EncodedTile, out: &mut Vec<EncodedTile>) {
        self.pending.insert(t.seq, t);
        while let Some(t) = self.pending.remove(&self.next) {
            out.push(t);
            self.next += 1;
        }
    }
}

fn write_batch<R: 'static>(writer: &mut TileWriter<R>, counts: &SharedCounts, batch: Vec<EncodedTile>) -> Result<()> {
    let mut tiles = Vec::with_capacity(batch.len());
    for t in batch {
        if let Some(d) = t.data {
            counts.written.fetch_add(1, Ordering::Relaxed);
            counts.bytes.fetch_add(d.len() as u64, Ordering::Relaxed);
            tiles.push((t.tile, d));
        }
    }
    if tiles.is_empty() {
        return Ok(());
    }
    writer.call(tiles)
}

/// Reads every tile from `features` (which must be prepared), encodes them
/// on `config.encode_threads()` threads and passes them to `writer` in
/// batches. With `emit_tiles_in_order` the writer sees the tiles in
/// ascending tile id order. Tiles larger than `max_tile_bytes` are logged
/// and skipped.
pub fn write_tiles<R: Send + 'static>(
    features: &FeatureGroup,
    encoder: Arc<dyn TileEncoder>,
    writer: TileWriter<R>,
    config: &TileGenConfig,
) -> Result<(RenderStats, R)> {
    let tm = Timer::new();
    let counts = Arc::new(SharedCounts::default());
    let timings = Arc::new(Mutex::new(Timings::new()));
    let result: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));

    let tiles_queue = BatchedQueue::new("tiles", config.queue_capacity, config.queue_batch_size);

    let max_tile_bytes = config.max_tile_bytes;
    let enc_counts = counts.clone();
    let enc_timings = timings.clone();
    let encode: Arc<WorkerFunc<(u64, TileFeatures), EncodedTile>> = Arc::new(
        move |inp: &mut dyn Iterator<Item = (u64, TileFeatures)>, out: &mut dyn QueueSink<EncodedTile>| -> Result<()> {
            let tx = ThreadTimer::new();
            for (seq, tf) in inp {
                let data = encoder.encode(&tf)?;
                let data = if max_tile_bytes > 0 && data.len() > max_tile_bytes {
                    let n = enc_counts.oversized.fetch_add(1, Ordering::Relaxed);
                    if n < MAX_LOGGED {
                        message!("skipping tile {}: {} bytes > {}", tf.tile, data.len(), max_tile_bytes);
                    }
                    None
                } else {
                    Some(data)
                };
                out.accept(EncodedTile {
                    seq,
                    tile: tf.tile,
                    data,
                })?;
            }
            lock(&enc_timings).add("encode tiles", tx.since());
            Ok(())
        },
    );

    let stage = Pipeline::new("render")
        .read_from_queue(tiles_queue.clone())
        .add_worker("encode", config.encode_threads(), encode)
        .add_buffer("encoded", config.queue_capacity, config.queue_batch_size);
    let done = stage.completion();

    let in_order = config.emit_tiles_in_order;
    let writer = Mutex::new(Some(writer));
    let sink_counts = counts.clone();
    let sink_timings = timings.clone();
    let sink_result = result.clone();
    let write: Arc<SinkFunc<EncodedTile>> = Arc::new(move |inp: &mut dyn Iterator<Item = EncodedTile>| -> Result<()> {
        let mut writer = match lock(&writer).take() {
            Some(w) => w,
            None => return Err(Error::InvalidInput(String::from("tile writer already used"))),
        };
        let tx = ThreadTimer::new();
        let mut reseq = Resequence::new();
        let mut batch = Vec::with_capacity(WRITE_BATCH);
        for t in inp {
            if in_order {
                reseq.add(t, &mut batch);
            } else {
                batch.push(t);
            }
            if batch.len() >= WRITE_BATCH {
                write_batch(&mut writer, &sink_counts, std::mem::take(&mut batch))?;
            }
        }
        // input also ends when the pipeline is cancelled; the writer is then never finished
        if done.is_cancelled() {
            return Err(Error::Aborted);
        }
        if !reseq.pending.is_empty() {
            return Err(Error::InvalidData(format!(
                "{} tiles never written, waiting for tile {}",
                reseq.pending.len(),
                reseq.next
            )));
        }
        write_batch(&mut writer, &sink_counts, batch)?;
        let r = writer.finish()?;
        *lock(&sink_result) = Some(r);
        lock(&sink_timings).add("write tiles", tx.since());
        Ok(())
    });

    let pipeline = stage.sink_to("write", 1, write)?;

    let progress = if config.log_interval_secs > 0.0 {
        Some(ProgressLogger::start(
            "render",
            pipeline.queues(),
            Duration::from_secs_f64(config.log_interval_secs),
        )?)
    } else {
        None
    };

    let mut num_tiles = 0;
    let mut empty_tiles = 0;
    let mut num_features = 0;
    let read_res = (|| -> Result<()> {
        let mut w = tiles_queue.writer();
        for tf in features.iter_tiles()? {
            let tf = tf?;
            if tf.layers.is_empty() {
                empty_tiles += 1;
                continue;
            }
            num_features += tf.num_features() as u64;
            w.accept((num_tiles, tf))?;
            num_tiles += 1;
        }
        w.flush()
    })();

    match read_res {
        Ok(()) => {
            tiles_queue.close()?;
            pipeline.await_done()?;
        }
        Err(Error::Aborted) => {
            // a pipeline stage failed first
            pipeline.await_done()?;
            return Err(Error::Aborted);
        }
        Err(e) => {
            pipeline.cancel();
            let _ = pipeline.await_done();
            return Err(e);
        }
    }
    drop(progress);

    let r = match lock(&result).take() {
        Some(r) => r,
        None => return Err(Error::InvalidData(String::from("tile writer not finished"))),
    };
    let mut tms = std::mem::replace(&mut *lock(&timings), Timings::new());
    tms.add("render total", tm.since());
    let stats = RenderStats {
        tiles: num_tiles + empty_tiles,
        empty_tiles,
        oversized_tiles: counts.oversized.load(Ordering::Relaxed),
        tiles_written: counts.written.load(Ordering::Relaxed),
        features: num_features,
        bytes: counts.bytes.load(Ordering::Relaxed),
        timings: tms,
    };
    message!("{}", stats);
    Ok((stats, r))
}
