use clap::{Args, ValueHint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use osmtiles::extsort::{ExternalMergeSort, ExternalSortConfig, SortableEntry};
use osmtiles::{message, progress_bytes};
use osmtiles::utils::LogTimes;

use crate::commands::{join_scoped, numchan_or_default, tempdir_or_default, Defaults, RunCmd};
use crate::error::{Error, Result};

#[derive(Args, Debug)]
pub struct SortBench {
    ///number of entries to sort
    #[arg(short = 'e', long, default_value_t = 10_000_000)]
    num_entries: u64,

    ///length of each entry's value in bytes
    #[arg(short, long, default_value_t = 32)]
    value_len: usize,

    ///in memory chunk size in megabytes, defaults to a share of the available ram
    #[arg(short, long)]
    chunk_mb: Option<usize>,

    ///compresses spilled chunks
    #[arg(long)]
    compress: bool,

    ///reads the sorted chunks on a single thread
    #[arg(long)]
    single_read: bool,

    ///directory for scratch files
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    tempdir: Option<String>,

    ///uses <NUMCHAN> parallel threads
    #[arg(short, long)]
    #[arg(value_parser = clap::value_parser!(u16).range(0..64))]
    numchan: Option<u16>,
}

fn add_entries(sorter: &ExternalMergeSort, num_entries: u64, value_len: usize, numchan: usize) -> Result<()> {
    std::thread::scope(|sc| {
        let mut handles = Vec::new();
        for i in 0..numchan {
            let mut w = sorter.writer();
            let n = num_entries / numchan as u64 + if (i as u64) < num_entries % numchan as u64 { 1 } else { 0 };
            handles.push(sc.spawn(move || -> Result<()> {
                let mut rng = StdRng::seed_from_u64(i as u64);
                for _ in 0..n {
                    let mut value = vec![0u8; value_len];
                    rng.fill(&mut value[..]);
                    w.add(SortableEntry::new(rng.gen(), value))?;
                }
                w.finish()?;
                Ok(())
            }));
        }
        for h in handles {
            join_scoped(h)?;
        }
        Ok(())
    })
}

impl RunCmd for SortBench {
    fn run(&self, defaults: &Defaults) -> Result<()> {
        let numchan = numchan_or_default(self.numchan, defaults);
        let chunk_bytes = match self.chunk_mb {
            Some(c) => c * 1024 * 1024,
            None => defaults.sort_chunk_bytes(numchan),
        };
        let config = ExternalSortConfig {
            chunk_bytes,
            compress: self.compress,
            parallel_sort: true,
            read_threads: numchan,
            tempdir: tempdir_or_default(&self.tempdir)?,
        };
        let mut lt = LogTimes::new();
        let mut sorter = ExternalMergeSort::new(config);

        add_entries(&sorter, self.num_entries, self.value_len, numchan)?;
        lt.add("add entries");

        sorter.sort()?;
        lt.add("sort");
        message!(
            "sorted {} entries in {} chunks, {} bytes spilled",
            sorter.len(),
            sorter.num_chunks(),
            sorter.bytes_spilled()
        );

        let iter = if self.single_read {
            sorter.iter()?
        } else {
            sorter.iter_parallel()?
        };
        let total_bytes = self.num_entries * self.value_len as u64;
        let pb = progress_bytes!("read sorted entries", total_bytes);
        let mut count = 0u64;
        let mut bytes = 0u64;
        let mut last = i64::MIN;
        for e in iter {
            let e = e?;
            if e.key < last {
                return Err(Error::InvalidInputError(format!("entry {} out of order: {} < {}", count, e.key, last)));
            }
            last = e.key;
            count += 1;
            bytes += e.value.len() as u64;
            if count % 100_000 == 0 {
                pb.progress_bytes(bytes);
            }
        }
        pb.finish();
        lt.add("read");

        if count != self.num_entries {
            return Err(Error::InvalidInputError(format!("read {} entries, expected {}", count, self.num_entries)));
        }
        message!("{}", lt);
        Ok(())
    }
}
