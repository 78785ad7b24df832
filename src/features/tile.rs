use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

pub const MAX_ZOOM: u8 = 15;

/// Number of tiles in every zoom level below `z`.
fn zoom_start(z: u8) -> i64 {
    ((1i64 << (2 * z as i64)) - 1) / 3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Result<TileCoord> {
        if z > MAX_ZOOM {
            return Err(Error::InvalidInput(format!("zoom {} > {}", z, MAX_ZOOM)));
        }
        let n = 1u32 << z;
        if x >= n || y >= n {
            return Err(Error::InvalidInput(format!("tile {}/{}/{} out of range", z, x, y)));
        }
        Ok(TileCoord { z, x, y })
    }

    /// Tile containing a point given in degrees, web mercator projection.
    pub fn from_lonlat(lon: f64, lat: f64, z: u8) -> Result<TileCoord> {
        if z > MAX_ZOOM {
            return Err(Error::InvalidInput(format!("zoom {} > {}", z, MAX_ZOOM)));
        }
        let n = (1u32 << z) as f64;
        let lat = lat.clamp(-85.0511, 85.0511).to_radians();
        let x = ((lon + 180.0) / 360.0 * n).floor();
        let y = ((1.0 - lat.tan().asinh() / std::f64::consts::PI) / 2.0 * n).floor();
        let clamp = |v: f64| v.max(0.0).min(n - 1.0) as u32;
        Ok(TileCoord { z, x: clamp(x), y: clamp(y) })
    }

    /// Tiles are numbered by zoom, then row, then column. The largest id, at
    /// zoom 15, still fits in a positive `i32`.
    pub fn encode(&self) -> i32 {
        (zoom_start(self.z) + ((self.y as i64) << self.z) + (self.x as i64)) as i32
    }

    pub fn decode(id: i32) -> Result<TileCoord> {
        if id < 0 {
            return Err(Error::InvalidData(format!("negative tile id {}", id)));
        }
        let id = id as i64;
        for z in 0..=MAX_ZOOM {
            let start = zoom_start(z);
            let end = zoom_start(z + 1);
            if id < end {
                let rem = id - start;
                return Ok(TileCoord {
                    z,
                    x: (rem & ((1 << z) - 1)) as u32,
                    y: (rem >> z) as u32,
                });
            }
        }
        Err(Error::InvalidData(format!("tile id {} beyond zoom {}", id, MAX_ZOOM)))
    }
}

impl PartialOrd for TileCoord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileCoord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.encode().cmp(&other.encode())
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tile_ids() {
        assert_eq!(TileCoord::new(0, 0, 0).unwrap().encode(), 0);
        assert_eq!(TileCoord::new(1, 0, 0).unwrap().encode(), 1);
        assert_eq!(TileCoord::new(1, 1, 0).unwrap().encode(), 2);
        assert_eq!(TileCoord::new(1, 0, 1).unwrap().encode(), 3);
        assert_eq!(TileCoord::new(2, 0, 0).unwrap().encode(), 5);

        let last = TileCoord::new(15, 32767, 32767).unwrap();
        assert_eq!(last.encode(), 1_431_655_764);
        assert_eq!(TileCoord::decode(last.encode()).unwrap(), last);
        assert!(TileCoord::decode(1_431_655_765).is_err());
        assert!(TileCoord::decode(-1).is_err());

        assert!(TileCoord::new(16, 0, 0).is_err());
        assert!(TileCoord::new(3, 8, 0).is_err());
    }

    #[test]
    fn test_from_lonlat() {
        assert_eq!(TileCoord::from_lonlat(0.0, 0.0, 0).unwrap(), TileCoord { z: 0, x: 0, y: 0 });
        assert_eq!(TileCoord::from_lonlat(-0.1276, 51.5072, 10).unwrap(), TileCoord { z: 10, x: 511, y: 340 });
        assert_eq!(TileCoord::from_lonlat(180.0, -90.0, 2).unwrap(), TileCoord { z: 2, x: 3, y: 3 });
    }

    proptest! {
        #[test]
        fn prop_round_trip(z in 0u8..=15, x in 0u32..32768, y in 0u32..32768) {
            let t = TileCoord::new(z, x >> (15 - z), y >> (15 - z)).unwrap();
            prop_assert_eq!(TileCoord::decode(t.encode()).unwrap(), t);
        }

        #[test]
        fn prop_order(a in 0i32..1_431_655_765, b in 0i32..1_431_655_765) {
            let ta = TileCoord::decode(a).unwrap();
            let tb = TileCoord::decode(b).unwrap();
            prop_assert_eq!(ta.cmp(&tb), a.cmp(&b));
            prop_assert_eq!(ta.cmp(&tb), (ta.z, ta.y, ta.x).cmp(&(tb.z, tb.y, tb.x)));
        }
    }
}
