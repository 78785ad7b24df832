use std::collections::HashMap;

use crate::extsort::SortableEntry;
use crate::features::feature::{decode_value, peek_group, Feature};
use crate::features::layers::LayerInterner;
use crate::features::sortkey::{decode_key, key_layer, key_tile};
use crate::features::tile::TileCoord;
use crate::message;
use crate::utils::{Error, Result};

/// Hook run on the features of each layer of a tile before encoding, for
/// instance to merge lines or drop tiny polygons.
pub trait LayerPostProcessor: Send + Sync {
    /// Returns `None` to keep the features unchanged.
    fn process(&self, tile: &TileCoord, layer: &str, features: &[Feature]) -> Result<Option<Vec<Feature>>>;
}

pub struct NoPostProcess;

impl LayerPostProcessor for NoPostProcess {
    fn process(&self, _tile: &TileCoord, _layer: &str, _features: &[Feature]) -> Result<Option<Vec<Feature>>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileLayer {
    pub name: String,
    pub features: Vec<Feature>,
}

/// Every feature in one tile, by layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFeatures {
    pub tile: TileCoord,
    pub layers: Vec<TileLayer>,
}

impl TileFeatures {
    pub fn num_features(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }

    pub fn layer(&self, name: &str) -> Option<&TileLayer> {
        self.layers.iter().find(|l| l.name == name)
    }
}

/// Counts kept while assembling one tile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssembleCounts {
    pub kept: u64,
    pub group_limited: u64,
    pub postprocess_failed: u64,
}

/// Collects the sorted entries of a single tile, applying group limits as
/// entries are added.
pub struct TileBuilder {
    tile: i32,
    entries: Vec<SortableEntry>,
    layer: Option<u8>,
    group_counts: HashMap<i64, u32>,
    pub counts: AssembleCounts,
}

impl TileBuilder {
    pub fn new(tile: i32) -> TileBuilder {
        TileBuilder {
            tile,
            entries: Vec::new(),
            layer: None,
            group_counts: HashMap::new(),
            counts: AssembleCounts::default(),
        }
    }

    pub fn tile(&self) -> i32 {
        self.tile
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries must be added in ascending key order, all with this tile.
    pub fn add(&mut self, entry: SortableEntry) -> Result<()> {
        if key_tile(entry.key) != self.tile {
            return Err(Error::InvalidInput(format!(
                "entry for tile {} added to tile {}",
                key_tile(entry.key),
                self.tile
            )));
        }
        let layer = key_layer(entry.key);
        if self.layer != Some(layer) {
            self.layer = Some(layer);
            self.group_counts.clear();
        }
        if (entry.key & 1) == 1 {
            let (g, _) = peek_group(&entry.value)?;
            if g.limit > 0 {
                let c = self.group_counts.entry(g.group).or_insert(0);
                if *c >= g.limit {
                    self.counts.group_limited += 1;
                    return Ok(());
                }
                *c += 1;
            }
        }
        self.counts.kept += 1;
        self.entries.push(entry);
        Ok(())
    }

    /// Decodes the kept features, one layer at a time in ascending layer id,
    /// passing each through `post_process`. A failing hook is logged and the
    /// layer is kept as it was; layers left with no features are dropped.
    pub fn finish(mut self, layers: &LayerInterner, post_process: &dyn LayerPostProcessor) -> Result<(TileFeatures, AssembleCounts)> {
        let tile = TileCoord::decode(self.tile)?;
        let mut result = TileFeatures {
            tile,
            layers: Vec::new(),
        };

        let mut current: Option<(u8, Vec<Feature>)> = None;
        for e in std::mem::take(&mut self.entries) {
            let k = decode_key(e.key);
            let f = decode_value(&e.value, k.has_group, k.z_order)?;
            match current.as_mut() {
                Some((l, feats)) if *l == k.layer => feats.push(f),
                _ => {
                    if let Some((l, feats)) = current.take() {
                        self.finish_layer(&mut result, layers, post_process, l, feats)?;
                    }
                    current = Some((k.layer, vec![f]));
                }
            }
        }
        if let Some((l, feats)) = current.take() {
            self.finish_layer(&mut result, layers, post_process, l, feats)?;
        }
        Ok((result, self.counts))
    }

    fn finish_layer(
        &mut self,
        result: &mut TileFeatures,
        layers: &LayerInterner,
        post_process: &dyn LayerPostProcessor,
        layer: u8,
        features: Vec<Feature>,
    ) -> Result<()> {
        let name = match layers.name(layer) {
            Some(n) => n,
            None => return Err(Error::InvalidData(format!("unknown layer id {}", layer))),
        };
        let features = match post_process.process(&result.tile, &name, &features) {
            Ok(Some(f)) => f,
            Ok(None) => features,
            Err(e) => {
                message!("post process of {} layer {} failed: {}", result.tile, name, e);
                self.counts.postprocess_failed += 1;
                features
            }
        };
        if !features.is_empty() {
            result.layers.push(TileLayer { name, features });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::feature::{encode_value, AttrValue, GeometryType, GroupInfo, RenderedFeature};
    use crate::features::sortkey::encode_key;

    fn entry(li: &LayerInterner, layer: &str, z: i32, id: u64, group: Option<GroupInfo>) -> SortableEntry {
        let tile = TileCoord::new(5, 3, 4).unwrap();
        let rf = RenderedFeature {
            tile,
            layer: String::from(layer),
            feature_id: id,
            geometry_type: GeometryType::Point,
            attrs: vec![(String::from("id"), AttrValue::Int(id as i64))],
            z_order: z,
            group,
            commands: vec![9, 2, 2],
        };
        let key = encode_key(tile.encode(), li.intern(layer).unwrap(), z, group.is_some()).unwrap();
        SortableEntry::new(key, encode_value(&rf))
    }

    fn build(li: &LayerInterner, mut entries: Vec<SortableEntry>, pp: &dyn LayerPostProcessor) -> (TileFeatures, AssembleCounts) {
        entries.sort_by_key(|e| e.key);
        let mut tb = TileBuilder::new(TileCoord::new(5, 3, 4).unwrap().encode());
        for e in entries {
            tb.add(e).unwrap();
        }
        tb.finish(li, pp).unwrap()
    }

    fn ids(l: &TileLayer) -> Vec<u64> {
        l.features.iter().map(|f| f.id).collect()
    }

    #[test]
    fn test_group_limit() {
        let li = LayerInterner::new();
        li.intern("a").unwrap();
        li.intern("b").unwrap();
        let g = |group, limit| Some(GroupInfo { group, limit });
        let mut entries = Vec::new();
        for i in 0..5 {
            entries.push(entry(&li, "a", 10 - i, i as u64, g(1, 2)));
            entries.push(entry(&li, "a", 10 - i, 100 + i as u64, g(2, 0)));
            entries.push(entry(&li, "b", 10 - i, 200 + i as u64, g(1, 2)));
        }
        entries.push(entry(&li, "a", 0, 300, None));

        let (tf, counts) = build(&li, entries, &NoPostProcess);
        assert_eq!(tf.layers.len(), 2);
        let a = tf.layer("a").unwrap();
        let mut aids = ids(a);
        aids.sort();
        assert_eq!(aids, vec![0, 1, 100, 101, 102, 103, 104, 300]);
        // the count for group 1 restarts in layer b
        assert_eq!(ids(tf.layer("b").unwrap()), vec![200, 201]);
        assert_eq!(counts.group_limited, 6);
        assert_eq!(counts.kept, 10);
    }

    #[test]
    fn test_paint_order() {
        let li = LayerInterner::new();
        let entries = vec![
            entry(&li, "a", 0, 1, None),
            entry(&li, "a", 2, 2, None),
            entry(&li, "a", 1, 3, None),
        ];
        let (tf, _) = build(&li, entries, &NoPostProcess);
        let zs: Vec<i32> = tf.layers[0].features.iter().map(|f| f.z_order).collect();
        assert_eq!(zs, vec![2, 1, 0]);
        assert_eq!(ids(&tf.layers[0]), vec![2, 3, 1]);
    }

    struct DropLayer(&'static str);
    impl LayerPostProcessor for DropLayer {
        fn process(&self, _tile: &TileCoord, layer: &str, features: &[Feature]) -> Result<Option<Vec<Feature>>> {
            if layer == self.0 {
                return Ok(Some(Vec::new()));
            }
            if features.len() > 1 {
                return Err(Error::InvalidData(String::from("can't merge")));
            }
            Ok(None)
        }
    }

    #[test]
    fn test_post_process() {
        let li = LayerInterner::new();
        let entries = vec![
            entry(&li, "a", 0, 1, None),
            entry(&li, "b", 0, 2, None),
            entry(&li, "c", 0, 3, None),
            entry(&li, "c", 1, 4, None),
        ];
        let (tf, counts) = build(&li, entries, &DropLayer("b"));
        let names: Vec<&str> = tf.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(ids(&tf.layers[1]), vec![4, 3]);
        assert_eq!(counts.postprocess_failed, 1);
    }

    #[test]
    fn test_wrong_tile() {
        let li = LayerInterner::new();
        let mut tb = TileBuilder::new(7);
        assert!(tb.add(entry(&li, "a", 0, 1, None)).is_err());
        assert!(tb.is_empty());
    }
}
