//! Grouping rendered features by tile: each feature is given a sort key
//! packing its tile, layer and z order, sorted externally, and read back as
//! one [`TileFeatures`] per tile.

pub mod feature;
pub mod group;
pub mod layers;
pub mod sortkey;
pub mod tile;
pub mod tilefeatures;

pub use crate::features::feature::{AttrValue, Feature, GeometryType, GroupInfo, RenderedFeature};
pub use crate::features::group::{FeatureGroup, FeatureGroupStats, FeatureGroupWriter, TileIter};
pub use crate::features::layers::{LayerInterner, MAX_LAYERS};
pub use crate::features::sortkey::{decode_key, encode_key, SortKey, ZMAX, ZMIN};
pub use crate::features::tile::{TileCoord, MAX_ZOOM};
pub use crate::features::tilefeatures::{LayerPostProcessor, NoPostProcess, TileFeatures, TileLayer};
