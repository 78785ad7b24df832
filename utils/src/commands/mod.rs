mod cli;
mod longlongbench;
mod render;
mod sortbench;

pub use cli::{Cli, Commands};
pub use longlongbench::LongLongBench;
pub use render::Render;
pub use sortbench::SortBench;

use std::path::PathBuf;

use osmtiles::message;
use sysinfo::System;

use crate::error::{Error, Result};

const RAM_GB_DEFAULT: usize = 8;
const SORT_CHUNK_MB_MAX: usize = 256;

pub struct Defaults {
    numchan_default: usize,
    ram_gb_default: usize,
}

impl Defaults {
    pub fn new() -> Defaults {
        let numchan_default = num_cpus::get();
        let ram_gb_default = if sysinfo::IS_SUPPORTED_SYSTEM {
            let mut s = System::new_all();
            s.refresh_all();
            let tm = f64::round((s.total_memory() as f64) / 1024.0 / 1024.0);
            (tm / 1024.0) as usize
        } else {
            RAM_GB_DEFAULT
        };
        message!("numchan_default={}, ram_gb_default={}", numchan_default, ram_gb_default);
        Defaults {
            numchan_default,
            ram_gb_default,
        }
    }

    /// Keeps the in memory sort chunks of every thread within a quarter of
    /// the available memory.
    pub fn sort_chunk_bytes(&self, numchan: usize) -> usize {
        let mb = usize::max(1, self.ram_gb_default) * 1024 / (4 * usize::max(1, numchan));
        usize::clamp(mb, 16, SORT_CHUNK_MB_MAX) * 1024 * 1024
    }
}

pub trait RunCmd {
    fn run(&self, defaults: &Defaults) -> Result<()>;
}

fn numchan_or_default(numchan: Option<u16>, defaults: &Defaults) -> usize {
    match numchan {
        None | Some(0) => defaults.numchan_default,
        Some(n) => n.into(),
    }
}

fn tempdir_or_default(tempdir: &Option<String>) -> Result<PathBuf> {
    match tempdir {
        None => Ok(std::env::temp_dir()),
        Some(t) => {
            let p = PathBuf::from(t);
            if !p.is_dir() {
                return Err(Error::InvalidInputError(format!("{} is not a directory", t)));
            }
            Ok(p)
        }
    }
}

fn join_scoped<T>(handle: std::thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(r) => r,
        Err(_) => Err(Error::ThreadPanic(String::from("benchmark thread panicked"))),
    }
}
