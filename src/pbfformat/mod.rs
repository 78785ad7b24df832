pub mod read_pbf;
pub mod write_pbf;

pub use crate::pbfformat::read_pbf::{read_uint, un_zig_zag, IterTags, PbfTag};
pub use crate::pbfformat::write_pbf::{pack_data, pack_int, pack_value, write_varint, zig_zag};
