use crate::utils::{Error, Result};

pub const ZMIN: i32 = -(1 << 22);
pub const ZMAX: i32 = (1 << 22) - 1;

const LAYER_SHIFT: i64 = 24;
const ZORDER_SHIFT: i64 = 1;
const ZORDER_MASK: i64 = (1 << 23) - 1;

/// Fields packed into the 64 bit key used to sort features. From the most
/// significant bits down: tile id (32 bits), layer id (8), `ZMAX - z_order`
/// (23) and a flag set when the value starts with group information.
///
/// Sorting by key groups features by tile, then by layer, then puts the
/// highest `z_order` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub tile: i32,
    pub layer: u8,
    pub z_order: i32,
    pub has_group: bool,
}

impl SortKey {
    pub fn encode(&self) -> Result<i64> {
        encode_key(self.tile, self.layer, self.z_order, self.has_group)
    }
}

pub fn encode_key(tile: i32, layer: u8, z_order: i32, has_group: bool) -> Result<i64> {
    if tile < 0 {
        return Err(Error::InvalidInput(format!("negative tile id {}", tile)));
    }
    if !(ZMIN..=ZMAX).contains(&z_order) {
        return Err(Error::InvalidZOrder(z_order));
    }
    Ok(((tile as i64) << 32)
        | ((layer as i64) << LAYER_SHIFT)
        | (((ZMAX - z_order) as i64) << ZORDER_SHIFT)
        | (has_group as i64))
}

pub fn decode_key(key: i64) -> SortKey {
    SortKey {
        tile: (key >> 32) as i32,
        layer: ((key >> LAYER_SHIFT) & 0xff) as u8,
        z_order: ZMAX - ((key >> ZORDER_SHIFT) & ZORDER_MASK) as i32,
        has_group: (key & 1) == 1,
    }
}

pub fn key_tile(key: i64) -> i32 {
    (key >> 32) as i32
}

pub fn key_layer(key: i64) -> u8 {
    ((key >> LAYER_SHIFT) & 0xff) as u8
}
