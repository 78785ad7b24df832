//! Write-once, read-many maps from `i64` keys to `i64` values, used to
//! resolve node locations when assembling way geometries.

pub mod appendstore;
pub mod sortedtable;
pub mod sparsearray;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use crate::longlong::appendstore::AppendStore;
pub use crate::longlong::sortedtable::SortedTable;
pub use crate::longlong::sparsearray::SparseArray;
use crate::utils::{as_float, as_int, Error, Result};

/// Value returned for keys which were never written.
pub const MISSING: i64 = i64::MIN;

pub const CHUNK_SHIFT: i64 = 8;

pub fn chunk_of(key: i64) -> i64 {
    key >> CHUNK_SHIFT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongLongLayout {
    Noop,
    SortedTable,
    SparseArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongLongStorage {
    Ram,
    Mmap,
}

impl FromStr for LongLongLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "noop" => Ok(LongLongLayout::Noop),
            "sortedtable" => Ok(LongLongLayout::SortedTable),
            "sparsearray" => Ok(LongLongLayout::SparseArray),
            _ => Err(Error::InvalidInput(format!("unknown long long layout {}", s))),
        }
    }
}

impl FromStr for LongLongStorage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ram" => Ok(LongLongStorage::Ram),
            "mmap" => Ok(LongLongStorage::Mmap),
            _ => Err(Error::InvalidInput(format!("unknown long long storage {}", s))),
        }
    }
}

impl fmt::Display for LongLongLayout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LongLongLayout::Noop => write!(f, "noop"),
            LongLongLayout::SortedTable => write!(f, "sortedtable"),
            LongLongLayout::SparseArray => write!(f, "sparsearray"),
        }
    }
}

impl fmt::Display for LongLongStorage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LongLongStorage::Ram => write!(f, "ram"),
            LongLongStorage::Mmap => write!(f, "mmap"),
        }
    }
}

fn new_store(storage: LongLongStorage, tempdir: &Path, name: &str) -> AppendStore {
    match storage {
        LongLongStorage::Ram => AppendStore::new_ram(),
        LongLongStorage::Mmap => AppendStore::new_mmap(tempdir, name),
    }
}

/// Keys must be written in non-decreasing order by a single writer. When a
/// key is repeated the first value is kept. Once writing is finished any
/// number of threads may call [`LongLongMap::get`].
pub enum LongLongMap {
    Noop,
    SortedTable(SortedTable),
    SparseArray(SparseArray),
}

impl LongLongMap {
    pub fn new(layout: LongLongLayout, storage: LongLongStorage, tempdir: Option<&Path>) -> LongLongMap {
        let dir = match tempdir {
            Some(d) => PathBuf::from(d),
            None => std::env::temp_dir(),
        };
        match layout {
            LongLongLayout::Noop => LongLongMap::Noop,
            LongLongLayout::SortedTable => LongLongMap::SortedTable(SortedTable::new(
                new_store(storage, &dir, "sortedtable-keys"),
                new_store(storage, &dir, "sortedtable-values"),
            )),
            LongLongLayout::SparseArray => {
                LongLongMap::SparseArray(SparseArray::new(new_store(storage, &dir, "sparsearray")))
            }
        }
    }

    pub fn put(&mut self, key: i64, value: i64) -> Result<()> {
        match self {
            LongLongMap::Noop => Ok(()),
            LongLongMap::SortedTable(st) => st.put(key, value),
            LongLongMap::SparseArray(sa) => sa.put(key, value),
        }
    }

    pub fn get(&self, key: i64) -> Result<i64> {
        match self {
            LongLongMap::Noop => Err(Error::Unsupported(String::from("get from noop long long map"))),
            LongLongMap::SortedTable(st) => st.get(key),
            LongLongMap::SparseArray(sa) => sa.get(key),
        }
    }

    pub fn multi_get(&self, keys: &[i64]) -> Result<Vec<i64>> {
        let mut res = Vec::with_capacity(keys.len());
        for k in keys {
            res.push(self.get(*k)?);
        }
        Ok(res)
    }

    pub fn layout(&self) -> LongLongLayout {
        match self {
            LongLongMap::Noop => LongLongLayout::Noop,
            LongLongMap::SortedTable(_) => LongLongLayout::SortedTable,
            LongLongMap::SparseArray(_) => LongLongLayout::SparseArray,
        }
    }
}

pub fn pack_coords(lon: i32, lat: i32) -> i64 {
    ((lon as i64) << 32) | ((lat as u32) as i64)
}

pub fn unpack_coords(v: i64) -> (i32, i32) {
    ((v >> 32) as i32, (v & 0xffffffff) as u32 as i32)
}

/// Node locations, in units of 1e-7 degrees, keyed by node id.
pub struct NodeLocations {
    map: LongLongMap,
}

impl NodeLocations {
    pub fn new(map: LongLongMap) -> NodeLocations {
        NodeLocations { map }
    }

    pub fn put(&mut self, id: i64, lon: i32, lat: i32) -> Result<()> {
        self.map.put(id, pack_coords(lon, lat))
    }

    pub fn put_lonlat(&mut self, id: i64, lon: f64, lat: f64) -> Result<()> {
        self.put(id, as_int(lon), as_int(lat))
    }

    pub fn get_lonlat(&self, id: i64) -> Result<Option<(f64, f64)>> {
        Ok(self.get(id)?.map(|(lon, lat)| (as_float(lon), as_float(lat))))
    }

    pub fn get(&self, id: i64) -> Result<Option<(i32, i32)>> {
        let v = self.map.get(id)?;
        if v == MISSING {
            return Ok(None);
        }
        Ok(Some(unpack_coords(v)))
    }

    /// Coordinates of every node in a way, or `None` if any are missing.
    pub fn get_way_coords(&self, ids: &[i64]) -> Result<Option<Vec<(i32, i32)>>> {
        let mut res = Vec::with_capacity(ids.len());
        for v in self.map.multi_get(ids)? {
            if v == MISSING {
                return Ok(None);
            }
            res.push(unpack_coords(v));
        }
        Ok(Some(res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn check_map(layout: LongLongLayout, storage: LongLongStorage, vals: &BTreeMap<i64, i64>, lookups: &[i64]) {
        let dir = tempfile::tempdir().unwrap();
        let mut map = LongLongMap::new(layout, storage, Some(dir.path()));
        for (k, v) in vals {
            map.put(*k, *v).unwrap();
        }
        for (k, v) in vals {
            assert_eq!(map.get(*k).unwrap(), *v);
        }
        for p in lookups {
            let expected = vals.get(p).copied().unwrap_or(MISSING);
            assert_eq!(map.get(*p).unwrap(), expected);
        }
    }

    fn all_variants() -> Vec<(LongLongLayout, LongLongStorage)> {
        let mut res = Vec::new();
        for l in [LongLongLayout::SortedTable, LongLongLayout::SparseArray] {
            for s in [LongLongStorage::Ram, LongLongStorage::Mmap] {
                res.push((l, s));
            }
        }
        res
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn prop_round_trip(
            vals in prop::collection::btree_map(-5000i64..200_000, -1_000_000i64..1_000_000, 0..500),
            lookups in prop::collection::vec(-6000i64..210_000, 0..50),
        ) {
            for (l, s) in all_variants() {
                check_map(l, s, &vals, &lookups);
            }
        }
    }

    #[test]
    fn test_concurrent_readers() {
        let dir = tempfile::tempdir().unwrap();
        for (l, s) in all_variants() {
            let mut map = LongLongMap::new(l, s, Some(dir.path()));
            for k in (0..100_000i64).step_by(3) {
                map.put(k, k * 2).unwrap();
            }
            std::thread::scope(|sc| {
                for t in 0..4i64 {
                    let map = &map;
                    sc.spawn(move || {
                        for k in (t..100_000).step_by(7) {
                            let expected = if k % 3 == 0 { k * 2 } else { MISSING };
                            assert_eq!(map.get(k).unwrap(), expected);
                        }
                    });
                }
            });
        }
    }

    #[test]
    fn test_noop() {
        let mut map = LongLongMap::new(LongLongLayout::Noop, LongLongStorage::Ram, None);
        map.put(1, 2).unwrap();
        assert!(map.get(1).is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("sorted_table".parse::<LongLongLayout>().unwrap(), LongLongLayout::SortedTable);
        assert_eq!("SparseArray".parse::<LongLongLayout>().unwrap(), LongLongLayout::SparseArray);
        assert_eq!("mmap".parse::<LongLongStorage>().unwrap(), LongLongStorage::Mmap);
        assert!("disk".parse::<LongLongStorage>().is_err());
        assert_eq!(LongLongLayout::SparseArray.to_string(), "sparsearray");
    }

    #[test]
    fn test_node_locations() {
        let mut nl = NodeLocations::new(LongLongMap::new(LongLongLayout::SparseArray, LongLongStorage::Ram, None));
        nl.put(10, -1_234_567_890, 515_000_000).unwrap();
        nl.put(11, 1_799_999_999, -899_999_999).unwrap();
        nl.put(13, 0, 0).unwrap();

        assert_eq!(nl.get(10).unwrap(), Some((-1_234_567_890, 515_000_000)));
        assert_eq!(nl.get(12).unwrap(), None);
        assert_eq!(
            nl.get_way_coords(&[13, 11]).unwrap(),
            Some(vec![(0, 0), (1_799_999_999, -899_999_999)])
        );
        assert_eq!(nl.get_way_coords(&[10, 12]).unwrap(), None);

        nl.put_lonlat(20, -0.1275, 51.5072).unwrap();
        assert_eq!(nl.get(20).unwrap(), Some((-1_275_000, 515_072_000)));
        let (lon, lat) = nl.get_lonlat(20).unwrap().unwrap();
        assert!((lon + 0.1275).abs() < 1e-7 && (lat - 51.5072).abs() < 1e-7);
        assert_eq!(nl.get_lonlat(21).unwrap(), None);
    }
}
