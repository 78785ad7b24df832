use std::iter::Peekable;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::extsort::{ExternalMergeSort, ExternalSortConfig, SortWriter, SortableEntry, SortedIter};
use crate::features::feature::{encode_value, RenderedFeature};
use crate::features::layers::LayerInterner;
use crate::features::sortkey::{encode_key, key_tile};
use crate::features::tilefeatures::{AssembleCounts, LayerPostProcessor, NoPostProcess, TileBuilder, TileFeatures};
use crate::message;
use crate::pipeline::queue::QueueSink;
use crate::utils::{Error, Result};

const MAX_LOGGED: u64 = 10;

#[derive(Default)]
struct GroupCounts {
    invalid_z_order: AtomicU64,
    group_limited: AtomicU64,
    postprocess_failed: AtomicU64,
    tiles: AtomicU64,
}

impl GroupCounts {
    fn skip_invalid(&self, f: &RenderedFeature) {
        let n = self.invalid_z_order.fetch_add(1, Ordering::Relaxed);
        if n < MAX_LOGGED {
            message!(
                "skipping feature {} in {} layer {}: z_order {} out of range",
                f.feature_id,
                f.tile,
                f.layer,
                f.z_order
            );
        }
    }

    fn add_assembled(&self, c: &AssembleCounts) {
        self.group_limited.fetch_add(c.group_limited, Ordering::Relaxed);
        self.postprocess_failed.fetch_add(c.postprocess_failed, Ordering::Relaxed);
        self.tiles.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGroupStats {
    pub features: u64,
    pub invalid_z_order: u64,
    pub group_limited: u64,
    pub postprocess_failed: u64,
    pub tiles: u64,
}

/// Encodes the features for every tile into an external sort, then reads
/// them back one tile at a time.
pub struct FeatureGroup {
    sorter: ExternalMergeSort,
    layers: Arc<LayerInterner>,
    post_process: Arc<dyn LayerPostProcessor>,
    parallel_read: bool,
    counts: Arc<GroupCounts>,
}

fn encode_entry(layers: &LayerInterner, counts: &GroupCounts, f: &RenderedFeature) -> Result<Option<SortableEntry>> {
    let layer = layers.intern(&f.layer)?;
    let key = match encode_key(f.tile.encode(), layer, f.z_order, f.group.is_some()) {
        Ok(k) => k,
        Err(Error::InvalidZOrder(_)) => {
            counts.skip_invalid(f);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    Ok(Some(SortableEntry::new(key, encode_value(f))))
}

impl FeatureGroup {
    pub fn new(config: ExternalSortConfig, layers: Arc<LayerInterner>) -> FeatureGroup {
        let parallel_read = config.read_threads > 1;
        FeatureGroup {
            sorter: ExternalMergeSort::new(config),
            layers,
            post_process: Arc::new(NoPostProcess),
            parallel_read,
            counts: Arc::new(GroupCounts::default()),
        }
    }

    pub fn with_post_process(mut self, post_process: Arc<dyn LayerPostProcessor>) -> FeatureGroup {
        self.post_process = post_process;
        self
    }

    pub fn layers(&self) -> &Arc<LayerInterner> {
        &self.layers
    }

    /// Computes the sort key and value of a feature. Returns `None`, after
    /// logging, for a feature whose `z_order` is out of range.
    pub fn encode(&self, f: &RenderedFeature) -> Result<Option<SortableEntry>> {
        encode_entry(&self.layers, &self.counts, f)
    }

    pub fn accept(&self, f: &RenderedFeature) -> Result<()> {
        match self.encode(f)? {
            Some(e) => self.sorter.add(e),
            None => Ok(()),
        }
    }

    /// A handle for one producer thread, which sorts into its own chunks.
    pub fn writer(&self) -> FeatureGroupWriter {
        FeatureGroupWriter {
            writer: self.sorter.writer(),
            layers: self.layers.clone(),
            counts: self.counts.clone(),
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.sorter.sort()?;
        message!(
            "sorted {} features in {} chunks ({} bytes spilled)",
            self.sorter.len(),
            self.sorter.num_chunks(),
            self.sorter.bytes_spilled()
        );
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.sorter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorter.is_empty()
    }

    pub fn stats(&self) -> FeatureGroupStats {
        FeatureGroupStats {
            features: self.sorter.len(),
            invalid_z_order: self.counts.invalid_z_order.load(Ordering::Relaxed),
            group_limited: self.counts.group_limited.load(Ordering::Relaxed),
            postprocess_failed: self.counts.postprocess_failed.load(Ordering::Relaxed),
            tiles: self.counts.tiles.load(Ordering::Relaxed),
        }
    }

    /// Tiles in ascending tile id order. Must be called after [`prepare`].
    ///
    /// [`prepare`]: FeatureGroup::prepare
    pub fn iter_tiles(&self) -> Result<TileIter<'_>> {
        let entries = if self.parallel_read {
            self.sorter.iter_parallel()?
        } else {
            self.sorter.iter()?
        };
        Ok(TileIter {
            entries: entries.peekable(),
            layers: &self.layers,
            post_process: self.post_process.as_ref(),
            counts: &self.counts,
            failed: false,
        })
    }
}

pub struct FeatureGroupWriter {
    writer: SortWriter,
    layers: Arc<LayerInterner>,
    counts: Arc<GroupCounts>,
}

impl FeatureGroupWriter {
    pub fn add(&mut self, f: &RenderedFeature) -> Result<()> {
        match encode_entry(&self.layers, &self.counts, f)? {
            Some(e) => self.writer.add(e),
            None => Ok(()),
        }
    }

    pub fn finish(&mut self) -> Result<()> {
        self.writer.finish()
    }
}

impl QueueSink<RenderedFeature> for FeatureGroupWriter {
    fn accept(&mut self, f: RenderedFeature) -> Result<()> {
        self.add(&f)
    }
}

/// Tiles where every feature was removed by post processing are still
/// returned, with no layers.
pub struct TileIter<'a> {
    entries: Peekable<SortedIter<'a>>,
    layers: &'a LayerInterner,
    post_process: &'a dyn LayerPostProcessor,
    counts: &'a GroupCounts,
    failed: bool,
}

impl TileIter<'_> {
    fn next_tile(&mut self) -> Result<Option<TileFeatures>> {
        let first = match self.entries.next() {
            None => return Ok(None),
            Some(e) => e?,
        };
        let mut tb = TileBuilder::new(key_tile(first.key));
        tb.add(first)?;
        loop {
            match self.entries.peek() {
                Some(Ok(e)) if key_tile(e.key) == tb.tile() => {}
                Some(Err(_)) => {}
                _ => break,
            }
            if let Some(e) = self.entries.next() {
                tb.add(e?)?;
            }
        }
        let (tf, counts) = tb.finish(self.layers, self.post_process)?;
        self.counts.add_assembled(&counts);
        Ok(Some(tf))
    }
}

impl Iterator for TileIter<'_> {
    type Item = Result<TileFeatures>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_tile() {
            Ok(Some(t)) => Some(Ok(t)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::feature::{AttrValue, GeometryType, GroupInfo};
    use crate::features::sortkey::ZMAX;
    use crate::features::tile::TileCoord;
    use std::path::PathBuf;

    fn config(dir: &std::path::Path, read_threads: usize) -> ExternalSortConfig {
        ExternalSortConfig {
            chunk_bytes: 4096,
            compress: false,
            parallel_sort: false,
            read_threads,
            tempdir: PathBuf::from(dir),
        }
    }

    fn feature(tile: TileCoord, layer: &str, id: u64, z_order: i32, group: Option<GroupInfo>) -> RenderedFeature {
        RenderedFeature {
            tile,
            layer: String::from(layer),
            feature_id: id,
            geometry_type: GeometryType::LineString,
            attrs: vec![(String::from("class"), AttrValue::String(String::from("primary")))],
            z_order,
            group,
            commands: vec![9, 0, 0, 10, 20, 20],
        }
    }

    #[test]
    fn test_tiles_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for read_threads in [1, 4] {
            let mut fg = FeatureGroup::new(config(dir.path(), read_threads), Arc::new(LayerInterner::new()));
            let mut expected = Vec::new();
            for x in (0..64u32).rev() {
                let t = TileCoord::new(6, x, 63 - x).unwrap();
                expected.push(t);
                for i in 0..20 {
                    fg.accept(&feature(t, "roads", (x * 100 + i) as u64, i as i32, None)).unwrap();
                }
            }
            expected.sort();
            fg.prepare().unwrap();

            let tiles: Vec<TileFeatures> = fg.iter_tiles().unwrap().map(|t| t.unwrap()).collect();
            assert_eq!(tiles.iter().map(|t| t.tile).collect::<Vec<_>>(), expected);
            for t in &tiles {
                assert_eq!(t.num_features(), 20);
                let zs: Vec<i32> = t.layers[0].features.iter().map(|f| f.z_order).collect();
                assert_eq!(zs, (0..20).rev().collect::<Vec<i32>>());
            }
            assert_eq!(fg.stats().tiles, 64);
        }
    }

    #[test]
    fn test_invalid_z_order_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut fg = FeatureGroup::new(config(dir.path(), 1), Arc::new(LayerInterner::new()));
        let t = TileCoord::new(2, 1, 1).unwrap();
        fg.accept(&feature(t, "a", 1, ZMAX + 1, None)).unwrap();
        fg.accept(&feature(t, "a", 2, 0, None)).unwrap();
        fg.prepare().unwrap();
        assert_eq!(fg.stats().invalid_z_order, 1);
        assert_eq!(fg.len(), 1);
        let tiles: Vec<TileFeatures> = fg.iter_tiles().unwrap().map(|t| t.unwrap()).collect();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].layers[0].features[0].id, 2);
    }

    #[test]
    fn test_writers_and_group_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut fg = FeatureGroup::new(config(dir.path(), 2), Arc::new(LayerInterner::new()));
        let t = TileCoord::new(4, 5, 6).unwrap();
        std::thread::scope(|sc| {
            for w in 0..3u64 {
                let mut wr = fg.writer();
                sc.spawn(move || {
                    for i in 0..10u64 {
                        let g = Some(GroupInfo { group: (i % 2) as i64, limit: 4 });
                        wr.accept(feature(t, "labels", w * 100 + i, (w * 10 + i) as i32, g)).unwrap();
                    }
                    wr.finish().unwrap();
                });
            }
        });
        fg.prepare().unwrap();
        let tiles: Vec<TileFeatures> = fg.iter_tiles().unwrap().map(|t| t.unwrap()).collect();
        assert_eq!(tiles.len(), 1);
        let feats = &tiles[0].layers[0].features;
        assert_eq!(feats.len(), 8);
        // the four highest z_order features of each group are kept
        let mut ids: Vec<u64> = feats.iter().map(|f| f.id).collect();
        ids.sort();
        // writer 2 has the highest z_order values, 20 to 29
        assert_eq!(ids, (202..210).collect::<Vec<u64>>());
        assert_eq!(fg.stats().group_limited, 22);
    }

    #[test]
    fn test_not_prepared() {
        let dir = tempfile::tempdir().unwrap();
        let fg = FeatureGroup::new(config(dir.path(), 1), Arc::new(LayerInterner::new()));
        assert!(matches!(fg.iter_tiles(), Err(Error::NotSorted)));
    }
}
