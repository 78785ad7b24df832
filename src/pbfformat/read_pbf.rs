use crate::utils::{Error, Result};

#[derive(PartialEq, Debug)]
pub enum PbfTag<'a> {
    Value(u64, u64),
    Data(u64, &'a [u8]),
}

fn too_short(pos: usize) -> Error {
    Error::InvalidData(format!("pbf data too short at {}", pos))
}

pub fn un_zig_zag(uv: u64) -> i64 {
    let x = (uv >> 1) as i64;
    if (uv & 1) != 0 {
        return x ^ -1;
    }
    x
}

pub fn read_uint(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    let mut res: u64 = 0;
    for i in 0..10 {
        let x = match data.get(pos + i) {
            Some(x) => *x,
            None => return Err(too_short(pos + i)),
        };
        res |= ((x & 127) as u64) << (7 * i);

        if (x & 128) == 0 {
            return Ok((res, pos + i + 1));
        }
    }
    Ok((res, pos + 10))
}

pub fn read_data<'a>(data: &'a [u8], pos: usize) -> Result<(&'a [u8], usize)> {
    let (ln, pos) = read_uint(data, pos)?;

    let l = ln as usize;
    if pos + l > data.len() {
        return Err(too_short(pos));
    }
    Ok((&data[pos..pos + l], pos + l))
}

pub fn read_tag<'a>(data: &'a [u8], pos: usize) -> Result<(PbfTag<'a>, usize)> {
    let (t, pos) = read_uint(data, pos)?;

    match t & 7 {
        0 => {
            let (v, pos) = read_uint(data, pos)?;
            Ok((PbfTag::Value(t >> 3, v), pos))
        }
        2 => {
            let (s, pos) = read_data(data, pos)?;
            Ok((PbfTag::Data(t >> 3, s), pos))
        }
        w => Err(Error::InvalidData(format!("unexpected wire type {} at {}", w, pos))),
    }
}

pub struct IterTags<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> IterTags<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> IterTags<'a> {
        IterTags { data, pos }
    }
}

impl<'a> Iterator for IterTags<'a> {
    type Item = Result<PbfTag<'a>>;

    fn next(&mut self) -> Option<Result<PbfTag<'a>>> {
        if self.pos < self.data.len() {
            match read_tag(self.data, self.pos) {
                Ok((t, npos)) => {
                    self.pos = npos;
                    Some(Ok(t))
                }
                Err(e) => {
                    self.pos = self.data.len();
                    Some(Err(e))
                }
            }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::pbfformat::read_pbf;

    #[test]
    fn test_read_all_tags() {
        let data: Vec<u8> = vec![8, 27, 16, 181, 254, 132, 214, 241, 2, 26, 4, 102, 114, 111, 103];
        let decoded = read_pbf::IterTags::new(&data, 0)
            .collect::<crate::utils::Result<Vec<_>>>()
            .unwrap();

        let should_equal = vec![
            read_pbf::PbfTag::Value(1, 27),
            read_pbf::PbfTag::Value(2, 99233120053),
            read_pbf::PbfTag::Data(3, b"frog"),
        ];

        assert_eq!(decoded, should_equal);
    }

    #[test]
    fn test_truncated_data() {
        let data: Vec<u8> = vec![26, 10, 102, 114];
        let res: Vec<_> = read_pbf::IterTags::new(&data, 0).collect();
        assert_eq!(res.len(), 1);
        assert!(res[0].is_err());

        assert!(read_pbf::read_uint(&[0x80, 0x80], 0).is_err());
    }
}
