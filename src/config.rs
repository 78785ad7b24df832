use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::extsort::ExternalSortConfig;
use crate::longlong::{LongLongLayout, LongLongStorage};
use crate::utils::{Error, Result};

fn default_numchan() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_queue_batch_size() -> usize {
    100
}
fn default_sort_chunk_bytes() -> usize {
    256 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_longlong_layout() -> LongLongLayout {
    LongLongLayout::SparseArray
}
fn default_longlong_storage() -> LongLongStorage {
    LongLongStorage::Mmap
}
fn default_max_tile_bytes() -> usize {
    500 * 1024
}
fn default_log_interval_secs() -> f64 {
    10.0
}

/// Settings for one tile generation run. Every field can be left out of the
/// json file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGenConfig {
    #[serde(default = "default_numchan")]
    pub numchan: usize,

    /// Threads encoding tiles; 0 uses `numchan`.
    #[serde(default)]
    pub encode_threads: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,

    #[serde(default = "default_sort_chunk_bytes")]
    pub sort_chunk_bytes: usize,

    #[serde(default)]
    pub sort_compress: bool,

    #[serde(default = "default_true")]
    pub sort_parallel_sort: bool,

    /// Threads merging sorted chunks; 0 uses `numchan`.
    #[serde(default)]
    pub sort_read_threads: usize,

    #[serde(default = "default_longlong_layout")]
    pub longlong_layout: LongLongLayout,

    #[serde(default = "default_longlong_storage")]
    pub longlong_storage: LongLongStorage,

    #[serde(default = "default_true")]
    pub emit_tiles_in_order: bool,

    #[serde(default = "default_max_tile_bytes")]
    pub max_tile_bytes: usize,

    /// Interval between progress messages; 0 turns them off.
    #[serde(default = "default_log_interval_secs")]
    pub log_interval_secs: f64,

    /// Directory for scratch files; the system temp directory if unset.
    #[serde(default)]
    pub tempdir: Option<PathBuf>,
}

impl Default for TileGenConfig {
    fn default() -> Self {
        TileGenConfig {
            numchan: default_numchan(),
            encode_threads: 0,
            queue_capacity: default_queue_capacity(),
            queue_batch_size: default_queue_batch_size(),
            sort_chunk_bytes: default_sort_chunk_bytes(),
            sort_compress: false,
            sort_parallel_sort: true,
            sort_read_threads: 0,
            longlong_layout: default_longlong_layout(),
            longlong_storage: default_longlong_storage(),
            emit_tiles_in_order: true,
            max_tile_bytes: default_max_tile_bytes(),
            log_interval_secs: default_log_interval_secs(),
            tempdir: None,
        }
    }
}

impl TileGenConfig {
    pub fn from_file(path: &Path) -> Result<TileGenConfig> {
        let f = File::open(path)?;
        let config: TileGenConfig = serde_json::from_reader(BufReader::new(f))?;
        config.check()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<TileGenConfig> {
        let config: TileGenConfig = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        if self.numchan == 0 {
            return Err(Error::InvalidInput(String::from("numchan must be at least 1")));
        }
        if self.queue_batch_size == 0 || self.queue_capacity < self.queue_batch_size {
            return Err(Error::InvalidInput(format!(
                "queue capacity {} must be at least the batch size {} (and that at least 1)",
                self.queue_capacity, self.queue_batch_size
            )));
        }
        if self.sort_chunk_bytes == 0 {
            return Err(Error::InvalidInput(String::from("sort_chunk_bytes must be positive")));
        }
        if self.log_interval_secs < 0.0 {
            return Err(Error::InvalidInput(String::from("log_interval_secs must not be negative")));
        }
        Ok(())
    }

    pub fn tempdir(&self) -> PathBuf {
        match &self.tempdir {
            Some(t) => t.clone(),
            None => std::env::temp_dir(),
        }
    }

    pub fn encode_threads(&self) -> usize {
        if self.encode_threads == 0 {
            self.numchan
        } else {
            self.encode_threads
        }
    }

    pub fn sort_config(&self) -> ExternalSortConfig {
        ExternalSortConfig {
            chunk_bytes: self.sort_chunk_bytes,
            compress: self.sort_compress,
            parallel_sort: self.sort_parallel_sort,
            read_threads: if self.sort_read_threads == 0 {
                self.numchan
            } else {
                self.sort_read_threads
            },
            tempdir: self.tempdir(),
        }
    }
}
