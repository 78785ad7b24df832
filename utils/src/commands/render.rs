use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Args, ValueHint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use osmtiles::config::TileGenConfig;
use osmtiles::features::{
    AttrValue, FeatureGroup, FeatureGroupWriter, GeometryType, GroupInfo, LayerInterner, RenderedFeature, TileCoord,
    MAX_ZOOM,
};
use osmtiles::callback::Callback;
use osmtiles::{message, task_sequence};
use osmtiles::pipeline::{Pipeline, ProgressLogger, QueueSink, SinkFunc, SourceFunc};
use osmtiles::render::{write_tiles, PackedTileEncoder, TileWriter, WriteTileFile};
use osmtiles::utils::{LogTimes, Timings};

use crate::commands::{numchan_or_default, tempdir_or_default, Defaults, RunCmd};
use crate::error::{Error, Result};

const LAYER_NAMES: [&str; 6] = ["water", "landuse", "roads", "buildings", "pois", "labels"];

#[derive(Args, Debug)]
pub struct Render {
    ///output tile file; tile locations are written to <OUTPUT>-tilelocs.json
    #[arg(value_hint = ValueHint::FilePath)]
    output: String,

    ///number of tiles
    #[arg(short = 'T', long, default_value_t = 10_000)]
    num_tiles: u32,

    ///features generated for each tile
    #[arg(short, long, default_value_t = 50)]
    features_per_tile: u32,

    ///json file of tile generation settings
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    config: Option<String>,

    ///directory for scratch files
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    tempdir: Option<String>,

    ///replaces an existing output file
    #[arg(long)]
    overwrite: bool,

    ///uses <NUMCHAN> parallel threads
    #[arg(short, long)]
    #[arg(value_parser = clap::value_parser!(u16).range(0..64))]
    numchan: Option<u16>,
}

/// Smallest zoom with room for `num_tiles` tiles.
fn zoom_for(num_tiles: u32) -> Result<u8> {
    for z in 0..=MAX_ZOOM {
        if (1u64 << (2 * z)) >= num_tiles as u64 {
            return Ok(z);
        }
    }
    Err(Error::InvalidInputError(format!("{} tiles do not fit in zoom {}", num_tiles, MAX_ZOOM)))
}

fn random_feature(rng: &mut StdRng, tile: TileCoord, id: u64) -> RenderedFeature {
    let layer = LAYER_NAMES[rng.gen_range(0..LAYER_NAMES.len())];
    let group = if layer == "labels" {
        Some(GroupInfo {
            group: rng.gen_range(0..4),
            limit: 5,
        })
    } else {
        None
    };
    let x: u32 = rng.gen_range(0..4096);
    let y: u32 = rng.gen_range(0..4096);
    RenderedFeature {
        tile,
        layer: String::from(layer),
        feature_id: id,
        geometry_type: GeometryType::Point,
        attrs: vec![
            (String::from("kind"), AttrValue::String(String::from(layer))),
            (String::from("rank"), AttrValue::Int(rng.gen_range(0..20))),
        ],
        z_order: rng.gen_range(-100..100),
        group,
        commands: vec![9, x << 1, y << 1],
    }
}

fn generate_features(fg: &FeatureGroup, config: &TileGenConfig, num_tiles: u32, per_tile: u32) -> Result<()> {
    let z = zoom_for(num_tiles)?;
    let generate: Box<SourceFunc<RenderedFeature>> =
        Box::new(move |out: &mut dyn QueueSink<RenderedFeature>| -> osmtiles::utils::Result<()> {
            let mut rng = StdRng::seed_from_u64(num_tiles as u64);
            let mut id = 0;
            for i in 0..num_tiles {
                let tile = TileCoord::new(z, i & ((1 << z) - 1), i >> z)?;
                for _ in 0..per_tile {
                    out.accept(random_feature(&mut rng, tile, id))?;
                    id += 1;
                }
            }
            Ok(())
        });

    let writers: Mutex<Vec<FeatureGroupWriter>> = Mutex::new((0..config.numchan).map(|_| fg.writer()).collect());
    let add: Arc<SinkFunc<RenderedFeature>> =
        Arc::new(move |inp: &mut dyn Iterator<Item = RenderedFeature>| -> osmtiles::utils::Result<()> {
            let w = match writers.lock() {
                Ok(mut ws) => ws.pop(),
                Err(_) => None,
            };
            let mut w = match w {
                Some(w) => w,
                None => return Err(osmtiles::utils::Error::InvalidInput(String::from("no feature writer left"))),
            };
            for f in inp {
                w.add(&f)?;
            }
            w.finish()
        });

    let pipeline = Pipeline::new("features")
        .from_generator("generate", generate)
        .add_buffer("features", config.queue_capacity, config.queue_batch_size)
        .sink_to("sort", config.numchan, add)?;

    let _progress = if config.log_interval_secs > 0.0 {
        Some(ProgressLogger::start(
            "features",
            pipeline.queues(),
            Duration::from_secs_f64(config.log_interval_secs),
        )?)
    } else {
        None
    };
    pipeline.await_done()?;
    Ok(())
}

impl RunCmd for Render {
    fn run(&self, defaults: &Defaults) -> Result<()> {
        let output = Path::new(&self.output);
        if output.exists() && !self.overwrite {
            return Err(Error::OutputFileExists(self.output.clone()));
        }

        let mut config = match &self.config {
            Some(c) => TileGenConfig::from_file(Path::new(c))?,
            None => {
                let mut c = TileGenConfig::default();
                c.sort_chunk_bytes = defaults.sort_chunk_bytes(numchan_or_default(self.numchan, defaults));
                c
            }
        };
        if self.numchan.is_some() || self.config.is_none() {
            config.numchan = numchan_or_default(self.numchan, defaults);
        }
        if self.tempdir.is_some() || config.tempdir.is_none() {
            config.tempdir = Some(tempdir_or_default(&self.tempdir)?);
        }
        config.check()?;

        let mut lt = LogTimes::new();
        let tasks = task_sequence!("render", 3);
        let mut fg = FeatureGroup::new(config.sort_config(), Arc::new(LayerInterner::new()));
        tasks.start_task("generate features");
        generate_features(&fg, &config, self.num_tiles, self.features_per_tile)?;
        lt.add("generate features");

        tasks.start_task("sort features");
        fg.prepare()?;
        lt.add("sort features");

        tasks.start_task("write tiles");
        let wf: TileWriter<Timings> = Box::new(WriteTileFile::new(output)?);
        let writer: TileWriter<Timings> = Box::new(Callback::new("write tile file", wf)?);
        let (mut stats, timings) = write_tiles(&fg, Arc::new(PackedTileEncoder), writer, &config)?;
        lt.add("write tiles");
        tasks.finish();

        let fs = fg.stats();
        message!(
            "{} features, {} with invalid z order, {} group limited",
            fs.features,
            fs.invalid_z_order,
            fs.group_limited
        );
        stats.timings.combine(timings);
        message!("{}", stats);
        message!("{}", lt);
        Ok(())
    }
}
