pub fn zig_zag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn write_varint(res: &mut Vec<u8>, val: u64) {
    let mut v = val;
    for _ in 0..10 {
        if v > 0x7f {
            res.push(((v & 0x7F) | 0x80) as u8);
            v >>= 7;
        } else {
            res.push(v as u8);
            return;
        }
    }
}

pub fn pack_value(res: &mut Vec<u8>, key: u64, val: u64) {
    write_varint(res, key << 3);
    write_varint(res, val);
}

pub fn pack_data(res: &mut Vec<u8>, key: u64, data: &[u8]) {
    write_varint(res, (key << 3) | 2);
    write_varint(res, data.len() as u64);
    res.extend(data);
}

pub fn pack_int(vals: impl Iterator<Item = u64>) -> Vec<u8> {
    let mut res = Vec::new();
    for v in vals {
        write_varint(&mut res, v);
    }
    res
}

#[cfg(test)]
mod tests {
    use crate::pbfformat::write_pbf;

    #[test]
    fn test_write_tags() {
        let mut res = Vec::new();
        write_pbf::pack_value(&mut res, 1, 27);
        write_pbf::pack_value(&mut res, 2, 99233120053);
        write_pbf::pack_data(&mut res, 3, b"frog");

        let should_equal: Vec<u8> = vec![
            8, 27, 16, 181, 254, 132, 214, 241, 2, 26, 4, 102, 114, 111, 103,
        ];

        assert_eq!(res, should_equal);
    }

    #[test]
    fn test_pack_int() {
        let vals = vec![25, 33 * 128 + 27, 3 * 128 * 128 + 26 * 128 + 104, 0];
        let packed = write_pbf::pack_int(vals.into_iter());
        assert_eq!(packed, vec![25, 155, 33, 232, 154, 3, 0]);
    }

    #[test]
    fn test_zig_zag() {
        assert_eq!(write_pbf::zig_zag(0), 0);
        assert_eq!(write_pbf::zig_zag(-1), 1);
        assert_eq!(write_pbf::zig_zag(1), 2);
        assert_eq!(write_pbf::zig_zag(i64::MIN), u64::MAX);
    }
}
