use clap::{Args, ValueHint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use osmtiles::longlong::{LongLongLayout, LongLongMap, LongLongStorage, MISSING};
use osmtiles::{message, progress_percent};
use osmtiles::utils::LogTimes;

use crate::commands::{join_scoped, numchan_or_default, tempdir_or_default, Defaults, RunCmd};
use crate::error::{Error, Result};

const LOOKUP_BATCH: usize = 1024;

#[derive(Args, Debug)]
pub struct LongLongBench {
    ///number of keys to write
    #[arg(short = 'k', long, default_value_t = 100_000_000)]
    num_keys: i64,

    ///gap between consecutive keys
    #[arg(long, default_value_t = 1)]
    step: i64,

    ///number of random lookups, spread over NUMCHAN threads
    #[arg(short = 'r', long, default_value_t = 10_000_000)]
    lookups: u64,

    ///layout: sortedtable or sparsearray
    #[arg(short, long, default_value = "sparsearray")]
    layout: String,

    ///storage: ram or mmap
    #[arg(short, long, default_value = "mmap")]
    storage: String,

    ///directory for scratch files
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    tempdir: Option<String>,

    ///uses <NUMCHAN> parallel threads
    #[arg(short, long)]
    #[arg(value_parser = clap::value_parser!(u16).range(0..64))]
    numchan: Option<u16>,
}

fn value_for(key: i64) -> i64 {
    key.wrapping_mul(31) ^ 0x5555
}

fn check_lookups(map: &LongLongMap, num_keys: i64, step: i64, lookups: u64, seed: u64) -> Result<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let max_key = num_keys * step;
    let mut found = 0;
    let mut left = lookups;
    let mut keys = Vec::with_capacity(LOOKUP_BATCH);
    while left > 0 {
        keys.clear();
        for _ in 0..u64::min(left, LOOKUP_BATCH as u64) {
            keys.push(rng.gen_range(0..max_key));
        }
        left -= keys.len() as u64;
        for (k, v) in keys.iter().zip(map.multi_get(&keys)?) {
            let expected = if k % step == 0 { value_for(*k) } else { MISSING };
            if v != expected {
                return Err(Error::InvalidInputError(format!("key {}: found {}, expected {}", k, v, expected)));
            }
            if v != MISSING {
                found += 1;
            }
        }
    }
    Ok(found)
}

impl RunCmd for LongLongBench {
    fn run(&self, defaults: &Defaults) -> Result<()> {
        let layout: LongLongLayout = self.layout.parse()?;
        let storage: LongLongStorage = self.storage.parse()?;
        if layout == LongLongLayout::Noop {
            return Err(Error::InvalidInputError(String::from("cannot read from a noop map")));
        }
        if self.num_keys <= 0 || self.step <= 0 {
            return Err(Error::InvalidInputError(String::from("num_keys and step must be positive")));
        }
        let numchan = numchan_or_default(self.numchan, defaults);
        let tempdir = tempdir_or_default(&self.tempdir)?;

        let mut lt = LogTimes::new();
        let mut map = LongLongMap::new(layout, storage, Some(tempdir.as_path()));
        let pp = progress_percent!(&format!("write {} keys", self.num_keys));
        for i in 0..self.num_keys {
            let k = i * self.step;
            map.put(k, value_for(k))?;
            if i % 1_000_000 == 0 {
                pp.progress_percent(100.0 * (i as f64) / (self.num_keys as f64));
            }
        }
        pp.finish();
        lt.add(&format!("write {} keys [{}, {}]", self.num_keys, layout, storage));

        let map = &map;
        let found = std::thread::scope(|sc| -> Result<u64> {
            let mut handles = Vec::new();
            for i in 0..numchan {
                let n = self.lookups / numchan as u64;
                let (num_keys, step) = (self.num_keys, self.step);
                handles.push(sc.spawn(move || check_lookups(map, num_keys, step, n, i as u64)));
            }
            let mut found = 0;
            for h in handles {
                found += join_scoped(h)?;
            }
            Ok(found)
        })?;
        lt.add(&format!("read on {} threads", numchan));

        message!("{} of {} lookups found\n{}", found, self.lookups, lt);
        Ok(())
    }
}
