//! Building blocks for generating map tiles from OpenStreetMap data: a
//! threaded pipeline, node location maps, an external merge sort, and
//! ordering of rendered features into tiles.

pub mod logging;

pub mod callback;
pub mod config;
pub mod defaultlogger;
pub mod extsort;
pub mod features;
pub mod longlong;
pub mod pbfformat;
pub mod pipeline;
pub mod render;
pub mod utils;

