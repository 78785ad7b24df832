use crate::features::feature::{pack_feature_body, unpack_feature_body};
use crate::features::tile::TileCoord;
use crate::features::tilefeatures::{TileFeatures, TileLayer};
use crate::pbfformat::read_pbf::{IterTags, PbfTag};
use crate::pbfformat::write_pbf::{pack_data, pack_value};
use crate::utils::{Error, Result};

/// Serializes the assembled features of one tile.
pub trait TileEncoder: Send + Sync {
    fn encode(&self, tile: &TileFeatures) -> Result<Vec<u8>>;
}

/// A simple layered protocol buffer encoding, for tests and benchmarks:
///
/// ```text
/// tile:    1: z, 2: x, 3: y, 4: repeated layer
/// layer:   1: name, 2: repeated feature
/// feature: 1: id, 2: geometry type, 3: repeated attribute, 4: packed commands
/// ```
pub struct PackedTileEncoder;

impl TileEncoder for PackedTileEncoder {
    fn encode(&self, tile: &TileFeatures) -> Result<Vec<u8>> {
        let mut res = Vec::new();
        pack_value(&mut res, 1, tile.tile.z as u64);
        pack_value(&mut res, 2, tile.tile.x as u64);
        pack_value(&mut res, 3, tile.tile.y as u64);
        for l in &tile.layers {
            let mut layer = Vec::new();
            pack_data(&mut layer, 1, l.name.as_bytes());
            for f in &l.features {
                let mut body = Vec::new();
                pack_feature_body(&mut body, f.id, f.geometry_type, &f.attrs, &f.commands);
                pack_data(&mut layer, 2, &body);
            }
            pack_data(&mut res, 4, &layer);
        }
        Ok(res)
    }
}

fn decode_layer(data: &[u8]) -> Result<TileLayer> {
    let mut layer = TileLayer {
        name: String::new(),
        features: Vec::new(),
    };
    for t in IterTags::new(data, 0) {
        match t? {
            PbfTag::Data(1, d) => {
                layer.name = match std::str::from_utf8(d) {
                    Ok(s) => String::from(s),
                    Err(e) => return Err(Error::InvalidData(format!("bad layer name: {}", e))),
                }
            }
            PbfTag::Data(2, d) => layer.features.push(unpack_feature_body(d)?),
            _ => {}
        }
    }
    Ok(layer)
}

/// Reads a tile written by [`PackedTileEncoder`]. The `z_order` of each
/// feature is not stored, and is returned as zero.
pub fn decode_packed_tile(data: &[u8]) -> Result<TileFeatures> {
    let (mut z, mut x, mut y) = (0, 0, 0);
    let mut layers = Vec::new();
    for t in IterTags::new(data, 0) {
        match t? {
            PbfTag::Value(1, v) => z = v,
            PbfTag::Value(2, v) => x = v,
            PbfTag::Value(3, v) => y = v,
            PbfTag::Data(4, d) => layers.push(decode_layer(d)?),
            _ => {}
        }
    }
    if z > 255 || x > (u32::MAX as u64) || y > (u32::MAX as u64) {
        return Err(Error::InvalidData(format!("bad tile {}/{}/{}", z, x, y)));
    }
    Ok(TileFeatures {
        tile: TileCoord::new(z as u8, x as u32, y as u32)?,
        layers,
    })
}
