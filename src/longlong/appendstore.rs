use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use memmap2::Mmap;

use crate::pipeline::queue::lock;
use crate::utils::{Error, Result};

/// Number of values held in each segment file (8 MiB).
pub const SEGMENT_VALUES: usize = 1 << 20;

static NEXT_STORE: AtomicUsize = AtomicUsize::new(0);

/// Unique prefix for scratch files created by this process.
pub fn scratch_prefix(prefix: &str) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        NEXT_STORE.fetch_add(1, Ordering::SeqCst)
    )
}

struct SegmentWriter {
    file: BufWriter<File>,
    count: usize,
}

/// Append-only column of `i64` values, written by one thread and then read
/// by many.
pub enum AppendStore {
    Ram(Vec<i64>),
    Mmap(MmapStore),
}

impl AppendStore {
    pub fn new_ram() -> AppendStore {
        AppendStore::Ram(Vec::new())
    }

    pub fn new_mmap(dir: &Path, name: &str) -> AppendStore {
        AppendStore::Mmap(MmapStore::new(dir, name))
    }

    pub fn append(&mut self, v: i64) -> Result<()> {
        match self {
            AppendStore::Ram(vals) => {
                vals.push(v);
                Ok(())
            }
            AppendStore::Mmap(store) => store.append(v),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AppendStore::Ram(vals) => vals.len(),
            AppendStore::Mmap(store) => store.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Result<i64> {
        match self {
            AppendStore::Ram(vals) => match vals.get(idx) {
                Some(v) => Ok(*v),
                None => Err(Error::InvalidInput(format!("index {} >= {}", idx, vals.len()))),
            },
            AppendStore::Mmap(store) => store.get(idx),
        }
    }
}

/// Values are written to a sequence of fixed-size segment files. The first
/// read flushes the open segment and maps every file; no further appends are
/// allowed after that. The files are removed on drop.
pub struct MmapStore {
    dir: PathBuf,
    name: String,
    paths: Vec<PathBuf>,
    len: usize,
    writer: Mutex<Option<SegmentWriter>>,
    maps: OnceLock<Vec<Mmap>>,
}

impl MmapStore {
    fn new(dir: &Path, name: &str) -> MmapStore {
        MmapStore {
            dir: PathBuf::from(dir),
            name: scratch_prefix(name),
            paths: Vec::new(),
            len: 0,
            writer: Mutex::new(None),
            maps: OnceLock::new(),
        }
    }

    fn append(&mut self, v: i64) -> Result<()> {
        if self.maps.get().is_some() {
            return Err(Error::Unsupported(format!("{}: append after read", self.name)));
        }
        let writer = self.writer.get_mut().unwrap_or_else(|p| p.into_inner());

        let full = match writer.as_ref() {
            Some(w) => w.count == SEGMENT_VALUES,
            None => true,
        };
        if full {
            if let Some(mut w) = writer.take() {
                w.file.flush()?;
            }
            let path = self.dir.join(format!("{}-{:05}.bin", self.name, self.paths.len()));
            let file = File::create(&path)?;
            self.paths.push(path);
            *writer = Some(SegmentWriter {
                file: BufWriter::new(file),
                count: 0,
            });
        }

        if let Some(w) = writer.as_mut() {
            w.file.write_all(&v.to_le_bytes())?;
            w.count += 1;
        }
        self.len += 1;
        Ok(())
    }

    fn mapped(&self) -> Result<&[Mmap]> {
        if let Some(m) = self.maps.get() {
            return Ok(m);
        }
        let mut writer = lock(&self.writer);
        if self.maps.get().is_none() {
            if let Some(mut w) = writer.take() {
                w.file.flush()?;
            }
            let mut maps = Vec::with_capacity(self.paths.len());
            for p in &self.paths {
                let file = File::open(p)?;
                // the segment files are private to this store and never written again
                maps.push(unsafe { Mmap::map(&file)? });
            }
            let _ = self.maps.set(maps);
        }
        match self.maps.get() {
            Some(m) => Ok(m),
            None => Err(Error::InvalidData(format!("{}: failed to map segments", self.name))),
        }
    }

    fn get(&self, idx: usize) -> Result<i64> {
        if idx >= self.len {
            return Err(Error::InvalidInput(format!("index {} >= {}", idx, self.len)));
        }
        let maps = self.mapped()?;
        let seg = idx / SEGMENT_VALUES;
        let pos = (idx % SEGMENT_VALUES) * 8;
        match maps.get(seg).and_then(|m| m.get(pos..pos + 8)) {
            Some(b) => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(b);
                Ok(i64::from_le_bytes(bytes))
            }
            None => Err(Error::InvalidData(format!("{}: segment {} too short", self.name, seg))),
        }
    }
}

impl Drop for MmapStore {
    fn drop(&mut self) {
        *self.writer.get_mut().unwrap_or_else(|p| p.into_inner()) = None;
        self.maps.take();
        for p in &self.paths {
            let _ = std::fs::remove_file(p);
        }
    }
}
