use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rayon::slice::ParallelSliceMut;

use crate::extsort::SortableEntry;
use crate::utils::{Error, Result};

/// Fixed per-entry overhead used when estimating the size of a chunk.
pub const ENTRY_OVERHEAD: usize = 40;

/// Entries held in memory until the chunk is full.
pub struct Chunk {
    pub entries: Vec<SortableEntry>,
    pub bytes: usize,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk {
            entries: Vec::new(),
            bytes: 0,
        }
    }

    pub fn add(&mut self, e: SortableEntry) {
        self.bytes += e.value.len() + ENTRY_OVERHEAD;
        self.entries.push(e);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sort(&mut self, parallel: bool) {
        if parallel {
            self.entries.par_sort_unstable_by_key(|e| e.key);
        } else {
            self.entries.sort_unstable_by_key(|e| e.key);
        }
    }

    pub fn take(&mut self) -> Chunk {
        std::mem::replace(self, Chunk::new())
    }
}

/// A sorted chunk written to disk.
pub struct SpilledChunk {
    pub path: PathBuf,
    pub count: usize,
    pub bytes: u64,
    pub compressed: bool,
}

fn write_entries<W: Write>(w: &mut W, entries: &[SortableEntry]) -> Result<()> {
    for e in entries {
        w.write_all(&e.key.to_le_bytes())?;
        w.write_all(&(e.value.len() as u32).to_le_bytes())?;
        w.write_all(&e.value)?;
    }
    Ok(())
}

/// Sorts the chunk and writes it to `path`, as a sequence of records
/// `[key: i64 le][length: u32 le][value bytes]`, optionally zlib compressed.
pub fn spill_chunk(mut chunk: Chunk, path: &Path, compress: bool, parallel_sort: bool) -> Result<SpilledChunk> {
    chunk.sort(parallel_sort);
    for e in &chunk.entries {
        if e.value.len() > (u32::MAX as usize) {
            return Err(Error::InvalidInput(format!("entry {} too large to spill", e.key)));
        }
    }
    let file = BufWriter::new(File::create(path)?);
    let bytes = match write_chunk_file(file, path, &chunk.entries, compress) {
        Ok(b) => b,
        Err(e) => {
            let _ = std::fs::remove_file(path);
            return Err(e);
        }
    };
    Ok(SpilledChunk {
        path: PathBuf::from(path),
        count: chunk.entries.len(),
        bytes,
        compressed: compress,
    })
}

fn write_chunk_file(mut file: BufWriter<File>, path: &Path, entries: &[SortableEntry], compress: bool) -> Result<u64> {
    if compress {
        let mut enc = ZlibEncoder::new(file, Compression::fast());
        write_entries(&mut enc, entries)?;
        enc.finish()?.flush()?;
    } else {
        write_entries(&mut file, entries)?;
        file.flush()?;
    }
    Ok(std::fs::metadata(path)?.len())
}

/// Reads the entries of a spilled chunk back in order.
pub struct ChunkReader {
    reader: Box<dyn Read + Send>,
    path: PathBuf,
    remaining: usize,
}

impl ChunkReader {
    pub fn open(chunk: &SpilledChunk) -> Result<ChunkReader> {
        let file = BufReader::new(File::open(&chunk.path)?);
        let reader: Box<dyn Read + Send> = if chunk.compressed {
            Box::new(ZlibDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(ChunkReader {
            reader,
            path: chunk.path.clone(),
            remaining: chunk.count,
        })
    }

    fn read_entry(&mut self) -> Result<SortableEntry> {
        let mut head = [0u8; 12];
        match self.reader.read_exact(&mut head) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(Error::InvalidData(format!(
                    "{}: truncated, {} entries missing",
                    self.path.display(),
                    self.remaining
                )));
            }
            Err(e) => return Err(Error::Io(e)),
        }
        let mut kb = [0u8; 8];
        kb.copy_from_slice(&head[0..8]);
        let mut lb = [0u8; 4];
        lb.copy_from_slice(&head[8..12]);
        let mut value = vec![0u8; u32::from_le_bytes(lb) as usize];
        self.reader.read_exact(&mut value)?;
        Ok(SortableEntry::new(i64::from_le_bytes(kb), value))
    }
}

impl Iterator for ChunkReader {
    type Item = Result<SortableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let r = self.read_entry();
        self.remaining = match r {
            Ok(_) => self.remaining - 1,
            Err(_) => 0,
        };
        Some(r)
    }
}
