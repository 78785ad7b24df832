use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::callback::CallFinish;
use crate::features::tile::TileCoord;
use crate::utils::{Error, Result, ThreadTimer, Timings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLoc {
    pub id: i32,
    pub z: u8,
    pub x: u32,
    pub y: u32,
    pub offset: u64,
    pub length: u64,
}

pub fn tilelocs_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push("-tilelocs.json");
    PathBuf::from(p)
}

/// Appends zlib compressed tiles to a single file, then writes the location
/// of each tile to `<file>-tilelocs.json`.
pub struct WriteTileFile {
    path: PathBuf,
    outf: Option<BufWriter<File>>,
    pos: u64,
    locs: Vec<TileLoc>,
    tm: f64,
}

impl WriteTileFile {
    pub fn new(path: &Path) -> Result<WriteTileFile> {
        Ok(WriteTileFile {
            path: PathBuf::from(path),
            outf: Some(BufWriter::new(File::create(path)?)),
            pos: 0,
            locs: Vec::new(),
            tm: 0.0,
        })
    }
}

impl CallFinish for WriteTileFile {
    type CallType = Vec<(TileCoord, Vec<u8>)>;
    type ReturnType = Timings;

    fn call(&mut self, tiles: Vec<(TileCoord, Vec<u8>)>) -> Result<()> {
        let tx = ThreadTimer::new();
        let outf = match self.outf.as_mut() {
            Some(f) => f,
            None => return Err(Error::InvalidInput(String::from("call after finish"))),
        };
        for (t, data) in tiles {
            let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
            enc.write_all(&data)?;
            let comp = enc.finish()?;
            outf.write_all(&comp)?;
            self.locs.push(TileLoc {
                id: t.encode(),
                z: t.z,
                x: t.x,
                y: t.y,
                offset: self.pos,
                length: comp.len() as u64,
            });
            self.pos += comp.len() as u64;
        }
        self.tm += tx.since();
        Ok(())
    }

    fn finish(&mut self) -> Result<Timings> {
        if let Some(mut f) = self.outf.take() {
            f.flush()?;
        }
        let jf = BufWriter::new(File::create(tilelocs_path(&self.path))?);
        serde_json::to_writer(jf, &self.locs)?;

        let mut tms = Timings::new();
        tms.add("WriteTileFile", self.tm);
        tms.add_count("tiles written", self.locs.len() as u64);
        tms.add_count("bytes written", self.pos);
        Ok(tms)
    }
}

pub fn read_tile_locs(path: &Path) -> Result<Vec<TileLoc>> {
    let f = File::open(tilelocs_path(path))?;
    Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
}

/// Reads and decompresses one tile written by [`WriteTileFile`].
pub fn read_tile(file: &mut File, loc: &TileLoc) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(loc.offset))?;
    let mut comp = vec![0u8; loc.length as usize];
    file.read_exact(&mut comp)?;
    let mut res = Vec::new();
    ZlibDecoder::new(&comp[..]).read_to_end(&mut res)?;
    Ok(res)
}

/// Keeps every tile in memory.
pub struct CollectTiles {
    tiles: Vec<(TileCoord, Vec<u8>)>,
}

impl CollectTiles {
    pub fn new() -> CollectTiles {
        CollectTiles { tiles: Vec::new() }
    }
}

impl CallFinish for CollectTiles {
    type CallType = Vec<(TileCoord, Vec<u8>)>;
    type ReturnType = Vec<(TileCoord, Vec<u8>)>;

    fn call(&mut self, tiles: Vec<(TileCoord, Vec<u8>)>) -> Result<()> {
        self.tiles.extend(tiles);
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<(TileCoord, Vec<u8>)>> {
        Ok(std::mem::take(&mut self.tiles))
    }
}
