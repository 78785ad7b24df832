use crate::features::tile::TileCoord;
use crate::pbfformat::read_pbf::{read_uint, un_zig_zag, IterTags, PbfTag};
use crate::pbfformat::write_pbf::{pack_data, pack_int, pack_value, write_varint, zig_zag};
use crate::utils::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

/// Vector tile geometry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryType {
    Unknown = 0,
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

impl GeometryType {
    pub fn from_u64(v: u64) -> GeometryType {
        match v {
            1 => GeometryType::Point,
            2 => GeometryType::LineString,
            3 => GeometryType::Polygon,
            _ => GeometryType::Unknown,
        }
    }
}

/// At most `limit` features with the same `group` are kept in each layer of
/// a tile. A limit of zero keeps them all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    pub group: i64,
    pub limit: u32,
}

/// A candidate output feature, as produced by the profile for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    pub tile: TileCoord,
    pub layer: String,
    pub feature_id: u64,
    pub geometry_type: GeometryType,
    pub attrs: Vec<(String, AttrValue)>,
    pub z_order: i32,
    pub group: Option<GroupInfo>,
    /// Encoded geometry, as vector tile commands.
    pub commands: Vec<u32>,
}

/// A feature read back for tile assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: u64,
    pub geometry_type: GeometryType,
    pub attrs: Vec<(String, AttrValue)>,
    pub commands: Vec<u32>,
    pub z_order: i32,
    pub group: Option<GroupInfo>,
}

fn pack_attr(key: &str, val: &AttrValue) -> Vec<u8> {
    let mut res = Vec::with_capacity(key.len() + 12);
    pack_data(&mut res, 1, key.as_bytes());
    match val {
        AttrValue::String(s) => pack_data(&mut res, 2, s.as_bytes()),
        AttrValue::Int(i) => pack_value(&mut res, 3, zig_zag(*i)),
        AttrValue::Double(d) => pack_data(&mut res, 4, &d.to_le_bytes()),
        AttrValue::Bool(b) => pack_value(&mut res, 5, *b as u64),
    }
    res
}

fn read_string(d: &[u8]) -> Result<String> {
    match std::str::from_utf8(d) {
        Ok(s) => Ok(String::from(s)),
        Err(e) => Err(Error::InvalidData(format!("bad string: {}", e))),
    }
}

fn unpack_attr(data: &[u8]) -> Result<(String, AttrValue)> {
    let mut key = None;
    let mut val = None;
    for t in IterTags::new(data, 0) {
        match t? {
            PbfTag::Data(1, d) => key = Some(read_string(d)?),
            PbfTag::Data(2, d) => val = Some(AttrValue::String(read_string(d)?)),
            PbfTag::Value(3, v) => val = Some(AttrValue::Int(un_zig_zag(v))),
            PbfTag::Data(4, d) => {
                if d.len() != 8 {
                    return Err(Error::InvalidData(format!("double attribute of {} bytes", d.len())));
                }
                let mut b = [0u8; 8];
                b.copy_from_slice(d);
                val = Some(AttrValue::Double(f64::from_le_bytes(b)));
            }
            PbfTag::Value(5, v) => val = Some(AttrValue::Bool(v != 0)),
            _ => {}
        }
    }
    match (key, val) {
        (Some(k), Some(v)) => Ok((k, v)),
        _ => Err(Error::InvalidData(String::from("incomplete attribute"))),
    }
}

/// Writes the id, geometry type, attributes and commands of a feature.
pub fn pack_feature_body(
    res: &mut Vec<u8>,
    id: u64,
    geometry_type: GeometryType,
    attrs: &[(String, AttrValue)],
    commands: &[u32],
) {
    pack_value(res, 1, id);
    pack_value(res, 2, geometry_type as u64);
    for (k, v) in attrs {
        pack_data(res, 3, &pack_attr(k, v));
    }
    if !commands.is_empty() {
        pack_data(res, 4, &pack_int(commands.iter().map(|c| *c as u64)));
    }
}

/// Reads a feature body written by [`pack_feature_body`].
pub fn unpack_feature_body(data: &[u8]) -> Result<Feature> {
    let mut f = Feature {
        id: 0,
        geometry_type: GeometryType::Unknown,
        attrs: Vec::new(),
        commands: Vec::new(),
        z_order: 0,
        group: None,
    };
    for t in IterTags::new(data, 0) {
        match t? {
            PbfTag::Value(1, v) => f.id = v,
            PbfTag::Value(2, v) => f.geometry_type = GeometryType::from_u64(v),
            PbfTag::Data(3, d) => f.attrs.push(unpack_attr(d)?),
            PbfTag::Data(4, d) => {
                let mut pos = 0;
                while pos < d.len() {
                    let (c, npos) = read_uint(d, pos)?;
                    f.commands.push(c as u32);
                    pos = npos;
                }
            }
            _ => {}
        }
    }
    Ok(f)
}

/// The sort value of a feature: group id (zig zag varint) and limit
/// (varint) when the feature has a group, then the feature body.
pub fn encode_value(f: &RenderedFeature) -> Vec<u8> {
    let mut res = Vec::with_capacity(32 + f.commands.len() * 2);
    if let Some(g) = &f.group {
        write_varint(&mut res, zig_zag(g.group));
        write_varint(&mut res, g.limit as u64);
    }
    pack_feature_body(&mut res, f.feature_id, f.geometry_type, &f.attrs, &f.commands);
    res
}

/// Reads the group prefix, returning the position of the feature body.
pub fn peek_group(value: &[u8]) -> Result<(GroupInfo, usize)> {
    let (g, pos) = read_uint(value, 0)?;
    let (l, pos) = read_uint(value, pos)?;
    if l > (u32::MAX as u64) {
        return Err(Error::InvalidData(format!("group limit {} too large", l)));
    }
    Ok((
        GroupInfo {
            group: un_zig_zag(g),
            limit: l as u32,
        },
        pos,
    ))
}

pub fn decode_value(value: &[u8], has_group: bool, z_order: i32) -> Result<Feature> {
    let (group, pos) = if has_group {
        let (g, p) = peek_group(value)?;
        (Some(g), p)
    } else {
        (None, 0)
    };
    let mut f = unpack_feature_body(&value[pos..])?;
    f.group = group;
    f.z_order = z_order;
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(group: Option<GroupInfo>) -> RenderedFeature {
        RenderedFeature {
            tile: TileCoord::new(3, 1, 2).unwrap(),
            layer: String::from("poi"),
            feature_id: 123456789,
            geometry_type: GeometryType::Point,
            attrs: vec![
                (String::from("name"), AttrValue::String(String::from("Café"))),
                (String::from("rank"), AttrValue::Int(-4)),
                (String::from("height"), AttrValue::Double(12.5)),
                (String::from("open"), AttrValue::Bool(true)),
            ],
            z_order: 17,
            group,
            commands: vec![9, 50, 34],
        }
    }

    #[test]
    fn test_value() {
        let f = feature(None);
        let v = encode_value(&f);
        let d = decode_value(&v, false, 17).unwrap();
        assert_eq!(d.id, f.feature_id);
        assert_eq!(d.geometry_type, GeometryType::Point);
        assert_eq!(d.attrs, f.attrs);
        assert_eq!(d.commands, f.commands);
        assert_eq!(d.z_order, 17);
        assert_eq!(d.group, None);
    }

    #[test]
    fn test_value_with_group() {
        let g = GroupInfo { group: -77, limit: 3 };
        let v = encode_value(&feature(Some(g)));
        let (pg, pos) = peek_group(&v).unwrap();
        assert_eq!(pg, g);
        assert_eq!(pos, 3);
        let d = decode_value(&v, true, 0).unwrap();
        assert_eq!(d.group, Some(g));
        assert_eq!(d.commands, vec![9, 50, 34]);
    }

    #[test]
    fn test_bad_value() {
        let v = encode_value(&feature(None));
        assert!(decode_value(&v[..v.len() - 2], false, 0).is_err());
        assert!(peek_group(&[0x80]).is_err());
    }
}
